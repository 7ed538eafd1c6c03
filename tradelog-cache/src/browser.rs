//! Browser integration: `localStorage` backing and developer console hooks.

use wasm_bindgen::{JsValue, closure::Closure};
use web_sys::Storage;

use crate::{cache::LocalChatCache, error::StorageError, storage::KeyValueStore};

/// `window.localStorage`, looked up on every call.
///
/// Holds no JS handle so it can live behind the `Send + Sync` store trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrowserStore;

fn local_storage() -> Option<Storage> {
    web_sys::window()?.local_storage().ok().flatten()
}

fn backend_error(key: &str, err: &JsValue) -> StorageError {
    StorageError::backend(key, err.as_string().unwrap_or_else(|| format!("{err:?}")))
}

impl KeyValueStore for BrowserStore {
    fn is_available(&self) -> bool {
        local_storage().is_some()
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let storage = local_storage().ok_or(StorageError::Unavailable)?;
        storage.get_item(key).map_err(|err| backend_error(key, &err))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let storage = local_storage().ok_or(StorageError::Unavailable)?;
        storage.set_item(key, value).map_err(|err| backend_error(key, &err))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let storage = local_storage().ok_or(StorageError::Unavailable)?;
        storage.remove_item(key).map_err(|err| backend_error(key, &err))
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let storage = local_storage().ok_or(StorageError::Unavailable)?;
        let length = storage.length().map_err(|err| backend_error("*", &err))?;
        let mut keys = Vec::with_capacity(length as usize);
        for index in 0..length {
            if let Some(key) = storage.key(index).map_err(|err| backend_error("*", &err))? {
                keys.push(key);
            }
        }
        Ok(keys)
    }
}

/// Exposes `removeDuplicateMessages(sessionId)` and `clearSessionData(sessionId)`
/// on `window` for use from the developer console.
///
/// # Errors
/// Returns the JS exception if there is no `window` or the properties cannot
/// be set.
pub fn install_debug_bindings(cache: &LocalChatCache) -> Result<(), JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("no window"))?;

    let dedupe_cache = cache.clone();
    let remove_duplicates = Closure::<dyn Fn(String) -> u32>::new(move |session_id: String| {
        u32::try_from(dedupe_cache.remove_duplicate_messages(&session_id)).unwrap_or(u32::MAX)
    });
    js_sys::Reflect::set(
        window.as_ref(),
        &JsValue::from_str("removeDuplicateMessages"),
        remove_duplicates.as_ref(),
    )?;
    remove_duplicates.forget();

    let clear_cache = cache.clone();
    let clear_session = Closure::<dyn Fn(String)>::new(move |session_id: String| {
        clear_cache.clear_session_data(&session_id);
    });
    js_sys::Reflect::set(
        window.as_ref(),
        &JsValue::from_str("clearSessionData"),
        clear_session.as_ref(),
    )?;
    clear_session.forget();

    tracing::debug!("installed chat cache debug bindings");
    Ok(())
}
