use std::{fmt, sync::Arc};

use crate::config::{REFRESH_TOKEN_KEY, SessionConfig, TOKEN_KEY};

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Key-value backend holding the persisted tokens.
///
/// Implementations are synchronous and infallible from the caller's point of
/// view: a backend that cannot read or write behaves as if the key were
/// absent.
///
/// # Example Implementation
///
/// ```rust
/// use std::collections::HashMap;
/// use std::sync::Mutex;
/// use minibiz_session::storage::TokenStorage;
///
/// struct KeyringStorage {
///     entries: Mutex<HashMap<String, String>>,
/// }
///
/// impl TokenStorage for KeyringStorage {
///     fn get_item(&self, key: &str) -> Option<String> {
///         self.entries.lock().ok()?.get(key).cloned()
///     }
///
///     fn set_item(&self, key: &str, value: &str) {
///         if let Ok(mut entries) = self.entries.lock() {
///             entries.insert(key.to_string(), value.to_string());
///         }
///     }
///
///     fn remove_item(&self, key: &str) {
///         if let Ok(mut entries) = self.entries.lock() {
///             entries.remove(key);
///         }
///     }
/// }
/// ```
pub trait TokenStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str);

    fn remove_item(&self, key: &str);
}

/// Owner of the access/refresh token pair.
///
/// A store without a backend (see [`TokenStore::detached`]) is valid: every
/// write is a no-op and every read returns `None`.
#[derive(Clone)]
pub struct TokenStore {
    backend: Option<Arc<dyn TokenStorage>>,
    access_key: String,
    refresh_key: String,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("attached", &self.backend.is_some())
            .field("access_key", &self.access_key)
            .field("refresh_key", &self.refresh_key)
            .finish()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }
}

impl TokenStore {
    pub fn new(backend: Arc<dyn TokenStorage>) -> Self {
        Self {
            backend: Some(backend),
            access_key: TOKEN_KEY.to_string(),
            refresh_key: REFRESH_TOKEN_KEY.to_string(),
        }
    }

    pub fn detached() -> Self {
        Self {
            backend: None,
            access_key: TOKEN_KEY.to_string(),
            refresh_key: REFRESH_TOKEN_KEY.to_string(),
        }
    }

    pub fn with_keys(mut self, access_key: impl Into<String>, refresh_key: impl Into<String>) -> Self {
        self.access_key = access_key.into();
        self.refresh_key = refresh_key.into();
        self
    }

    pub(crate) fn configured(self, config: &SessionConfig) -> Self {
        self.with_keys(&config.access_token_key, &config.refresh_token_key)
    }

    /// Stores the access token and, when given, the refresh token.
    ///
    /// Omitting the refresh token keeps the one already stored.
    pub fn save(&self, access_token: &str, refresh_token: Option<&str>) {
        let Some(backend) = &self.backend else {
            return;
        };

        backend.set_item(&self.access_key, access_token);
        if let Some(refresh_token) = refresh_token.filter(|token| !token.is_empty()) {
            backend.set_item(&self.refresh_key, refresh_token);
        }
    }

    pub fn get(&self) -> Option<String> {
        self.backend
            .as_ref()
            .and_then(|backend| backend.get_item(&self.access_key))
    }

    pub fn get_refresh(&self) -> Option<String> {
        self.backend
            .as_ref()
            .and_then(|backend| backend.get_item(&self.refresh_key))
    }

    pub fn clear(&self) {
        if let Some(backend) = &self.backend {
            backend.remove_item(&self.access_key);
            backend.remove_item(&self.refresh_key);
        }
    }

    pub fn has_token(&self) -> bool {
        self.get().is_some()
    }
}
