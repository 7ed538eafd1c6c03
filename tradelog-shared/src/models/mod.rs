//! Wire models shared between the chat cache, the REST client and the CLI.

pub mod message;
pub mod session;
pub mod timestamp;

pub use message::{ChatMessage, MessageKind, MessageRole, NewMessage};
pub use session::{ChatSession, NewSession};
pub use timestamp::Timestamp;
