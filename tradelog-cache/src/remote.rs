//! The remote persistence API the cache flushes to.

use std::fmt;

use async_trait::async_trait;
use shared::models::{ChatMessage, ChatSession, NewMessage, NewSession};

use crate::error::RemoteError;

/// Create/list/delete capability of the journal backend.
///
/// Creates must tolerate being called more than once for the same local
/// entry: a restart can deliver an outbox entry the previous process already
/// sent but never confirmed.
#[async_trait]
pub trait ChatRemote: Send + Sync + fmt::Debug {
    async fn create_message(&self, message: &NewMessage) -> Result<ChatMessage, RemoteError>;

    async fn create_session(&self, session: &NewSession) -> Result<ChatSession, RemoteError>;

    async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, RemoteError>;

    async fn list_sessions(&self) -> Result<Vec<ChatSession>, RemoteError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), RemoteError>;
}

#[cfg(not(target_arch = "wasm32"))]
pub use http::HttpChatRemote;

#[cfg(not(target_arch = "wasm32"))]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::{Client, Response};
    use serde::de::DeserializeOwned;
    use shared::{
        config::RemoteConfig,
        models::{ChatMessage, ChatSession, NewMessage, NewSession},
    };
    use tracing::{debug, instrument};
    use url::Url;

    use super::ChatRemote;
    use crate::error::RemoteError;

    const USER_AGENT: &str = concat!("tradelog-chat-cache/", env!("CARGO_PKG_VERSION"));

    /// REST client for the journal chat endpoints.
    #[derive(Debug, Clone)]
    pub struct HttpChatRemote {
        base_url: Url,
        client: Client,
    }

    impl HttpChatRemote {
        /// # Errors
        /// Returns an error if the HTTP client cannot be built.
        pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
            let client = Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .user_agent(USER_AGENT)
                .build()?;
            Ok(Self {
                base_url: config.base_url.clone(),
                client,
            })
        }

        /// `{base}/chat/sessions[/{id}[/messages]]`, with the id percent-encoded.
        fn sessions_url(&self, session_id: Option<&str>, messages: bool) -> Result<Url, RemoteError> {
            let mut url = self.base_url.join("chat/sessions")?;
            {
                let mut segments = url.path_segments_mut().map_err(|()| {
                    RemoteError::Rejected(format!("base URL {} cannot carry a path", self.base_url))
                })?;
                if let Some(id) = session_id {
                    segments.push(id);
                    if messages {
                        segments.push("messages");
                    }
                }
            }
            Ok(url)
        }

        async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
            let response = Self::check(response).await?;
            Ok(response.json().await?)
        }

        async fn check(response: Response) -> Result<Response, RemoteError> {
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    #[async_trait]
    impl ChatRemote for HttpChatRemote {
        #[instrument(skip(self, message), fields(session_id = %message.session_id))]
        async fn create_message(&self, message: &NewMessage) -> Result<ChatMessage, RemoteError> {
            let url = self.sessions_url(Some(&message.session_id), true)?;
            let response = self.client.post(url).json(message).send().await?;
            let created: ChatMessage = Self::read_json(response).await?;
            debug!(message_id = %created.id, "remote accepted message");
            Ok(created)
        }

        #[instrument(skip(self, session))]
        async fn create_session(&self, session: &NewSession) -> Result<ChatSession, RemoteError> {
            let url = self.sessions_url(None, false)?;
            let response = self.client.post(url).json(session).send().await?;
            let created: ChatSession = Self::read_json(response).await?;
            debug!(session_id = %created.id, "remote accepted session");
            Ok(created)
        }

        async fn list_messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, RemoteError> {
            let url = self.sessions_url(Some(session_id), true)?;
            Self::read_json(self.client.get(url).send().await?).await
        }

        async fn list_sessions(&self) -> Result<Vec<ChatSession>, RemoteError> {
            let url = self.sessions_url(None, false)?;
            Self::read_json(self.client.get(url).send().await?).await
        }

        async fn delete_session(&self, session_id: &str) -> Result<(), RemoteError> {
            let url = self.sessions_url(Some(session_id), false)?;
            Self::check(self.client.delete(url).send().await?).await?;
            Ok(())
        }
    }

}
