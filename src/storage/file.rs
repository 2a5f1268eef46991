use std::{
    collections::BTreeMap,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use tracing::warn;

use super::TokenStorage;

/// Storage persisted as a flat JSON object in a single file.
///
/// The file is re-read on every access so that separate processes sharing
/// the path observe each other's logins and logouts. Failures are logged and
/// behave as if the key were absent.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use minibiz_session::storage::{FileStorage, TokenStore};
///
/// let store = TokenStore::new(Arc::new(FileStorage::new("/tmp/minibiz-session.json")));
/// store.save("access", Some("refresh"));
/// ```
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> BTreeMap<String, String> {
        match fs::read_to_string(&self.path) {
            Ok(data) if data.trim().is_empty() => BTreeMap::new(),
            Ok(data) => serde_json::from_str(&data).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), "Ignoring unreadable token file: {}", e);
                BTreeMap::new()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read token file: {}", e);
                BTreeMap::new()
            }
        }
    }

    fn store(&self, items: &BTreeMap<String, String>) {
        let result = serde_json::to_string_pretty(items)
            .map_err(io::Error::other)
            .and_then(|data| {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        fs::create_dir_all(parent)?;
                    }
                }
                self.replace_contents(data.as_bytes())
            });

        if let Err(e) = result {
            warn!(path = %self.path.display(), "Failed to write token file: {}", e);
        }
    }

    /// Writes a sibling temp file and renames it over the token file, so
    /// readers see either the old or the new map, never a partial one.
    fn replace_contents(&self, data: &[u8]) -> io::Result<()> {
        let mut temp_name = self.path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(format!(".{}.tmp", std::process::id()));
        let temp_path = self.path.with_file_name(temp_name);

        let written = write_private(&temp_path, data).and_then(|()| fs::rename(&temp_path, &self.path));
        if written.is_err() {
            let _ = fs::remove_file(&temp_path);
        }
        written
    }

    fn update(&self, apply: impl FnOnce(&mut BTreeMap<String, String>)) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.load();
        apply(&mut items);
        self.store(&items);
    }
}

/// The refresh token lives in this file; only the owner may read it.
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(data)?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}

impl TokenStorage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load().remove(key)
    }

    fn set_item(&self, key: &str, value: &str) {
        self.update(|items| {
            items.insert(key.to_string(), value.to_string());
        });
    }

    fn remove_item(&self, key: &str) {
        self.update(|items| {
            items.remove(key);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "minibiz-session-{}-{}-{}.json",
            name,
            std::process::id(),
            uuid::Uuid::new_v4()
        ))
    }

    #[test]
    fn values_survive_a_new_handle() {
        let path = temp_path("persist");
        FileStorage::new(&path).set_item("minibiz_auth_token", "abc");

        let reopened = FileStorage::new(&path);
        assert_eq!(reopened.get_item("minibiz_auth_token").as_deref(), Some("abc"));

        reopened.remove_item("minibiz_auth_token");
        assert_eq!(FileStorage::new(&path).get_item("minibiz_auth_token"), None);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn missing_or_corrupt_file_reads_as_empty() {
        let path = temp_path("corrupt");
        let storage = FileStorage::new(&path);
        assert_eq!(storage.get_item("anything"), None);

        fs::write(&path, "{not json").unwrap();
        assert_eq!(storage.get_item("anything"), None);

        storage.set_item("key", "value");
        assert_eq!(storage.get_item("key").as_deref(), Some("value"));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn rewrites_leave_no_temp_files_behind() {
        let path = temp_path("atomic");
        let storage = FileStorage::new(&path);
        storage.set_item("minibiz_auth_token", "first");
        storage.set_item("minibiz_refresh_token", "second");

        let file_name = path.file_name().unwrap().to_string_lossy().into_owned();
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(&file_name) && *name != file_name)
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
        assert_eq!(storage.get_item("minibiz_auth_token").as_deref(), Some("first"));

        let _ = fs::remove_file(path);
    }

    #[cfg(unix)]
    #[test]
    fn token_file_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let path = temp_path("mode");
        FileStorage::new(&path).set_item("minibiz_refresh_token", "secret");

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let _ = fs::remove_file(path);
    }
}
