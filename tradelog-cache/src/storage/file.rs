use std::{
    fmt::Write as _,
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use super::KeyValueStore;
use crate::error::StorageError;

const EXTENSION: &str = "json";

/// Stores each key as one JSON file inside a directory.
///
/// Writes go through a temporary sibling file and a rename so a crash never
/// leaves a half-written value behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| StorageError::io(root.display().to_string(), err))?;
        debug!(root = %root.display(), "opened file store");
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{EXTENSION}", encode_key(key)))
    }
}

impl KeyValueStore for FileStore {
    fn is_available(&self) -> bool {
        self.root.is_dir()
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(key, err)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let staging = path.with_extension(format!("{EXTENSION}.tmp"));
        fs::write(&staging, value).map_err(|err| StorageError::io(key, err))?;
        fs::rename(&staging, &path).map_err(|err| StorageError::io(key, err))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(StorageError::io(key, err)),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|err| StorageError::io(self.root.display().to_string(), err))?;

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| StorageError::io(self.root.display().to_string(), err))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(key) = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(decode_key)
            {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Escapes everything outside `[A-Za-z0-9_-]` as `%XX` so any key is a safe
/// file name.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

fn decode_key(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let hex = encoded.get(index + 1..index + 3)?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            index += 3;
        } else {
            decoded.push(bytes[index]);
            index += 1;
        }
    }
    String::from_utf8(decoded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn key_encoding_round_trips() {
        for key in [
            "tradelog_chat_sessions",
            "tradelog_chat_messages_6ba7b810-9dad",
            "weird/key with spaces.and%percent",
            "ünïcödé",
        ] {
            let encoded = encode_key(key);
            assert!(
                encoded
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'%')
            );
            assert_eq!(decode_key(&encoded).as_deref(), Some(key));
        }
    }

    #[test]
    fn file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("cache")).unwrap();
        assert!(store.is_available());

        assert_eq!(store.get("a/b").unwrap(), None);
        store.set("a/b", r#"{"version":1,"data":[]}"#).unwrap();
        store.set("plain", "x").unwrap();

        assert_eq!(
            store.get("a/b").unwrap().as_deref(),
            Some(r#"{"version":1,"data":[]}"#)
        );
        assert_eq!(store.keys().unwrap(), vec!["a/b".to_string(), "plain".to_string()]);

        store.remove("a/b").unwrap();
        store.remove("a/b").unwrap();
        assert_eq!(store.keys().unwrap(), vec!["plain".to_string()]);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        FileStore::open(dir.path()).unwrap().set("k", "v").unwrap();

        let reopened = FileStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn file_store_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("k.json.tmp"), "partial").unwrap();

        assert!(store.keys().unwrap().is_empty());
    }
}
