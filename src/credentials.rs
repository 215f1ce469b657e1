//! Credential persistence and the SIP account view built on top of it.
//!
//! The store is an external async key-value collaborator; this module only
//! fixes the key names, their defaults, and how empty values are treated.

use std::collections::HashMap;
use std::path::PathBuf;

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::debug;

use crate::{PhoneConfig, PhoneError, Result, SipCredentials};

pub const KEY_USERNAME: &str = "extensionUsername";
pub const KEY_PASSWORD: &str = "extensionPassword";
pub const KEY_WS_SERVER: &str = "sipWsServer";
pub const KEY_DOMAIN: &str = "sipDomain";
pub const KEY_AUTH_USER: &str = "sipAuthUser";
pub const KEY_REALM: &str = "sipRealm";

const ALL_KEYS: [&str; 6] = [
    KEY_USERNAME,
    KEY_PASSWORD,
    KEY_WS_SERVER,
    KEY_DOMAIN,
    KEY_AUTH_USER,
    KEY_REALM,
];

// Async key-value persistence
pub trait CredentialStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>>;
    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>>;
    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        MemoryCredentialStore {
            values: RwLock::new(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move { Ok(self.values.read().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.values.write().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.values.write().await.remove(key);
            Ok(())
        })
    }
}

/// Flat JSON object on disk. Every write rewrites the whole file.
pub struct FileCredentialStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileCredentialStore {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    async fn load(&self) -> Result<HashMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                PhoneError::Storage(format!("corrupt credential file {}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, values: &HashMap<String, String>) -> Result<()> {
        let contents = serde_json::to_string_pretty(values)?;
        tokio::fs::write(&self.path, contents).await?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<String>>> {
        Box::pin(async move {
            let _guard = self.lock.read().await;
            Ok(self.load().await?.remove(key))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let _guard = self.lock.write().await;
            let mut values = self.load().await?;
            values.insert(key.to_string(), value);
            self.save(&values).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let _guard = self.lock.write().await;
            let mut values = self.load().await?;
            if values.remove(key).is_some() {
                self.save(&values).await?;
            }
            Ok(())
        })
    }
}

/// SIP account settings as read from the store, defaults applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub ws_server: String,
    pub domain: String,
    pub auth_user: Option<String>,
    pub realm: Option<String>,
}

impl SipConfig {
    pub async fn load(store: &dyn CredentialStore, config: &PhoneConfig) -> Result<Self> {
        let (username, password, ws_server, domain, auth_user, realm) = futures::try_join!(
            read_non_empty(store, KEY_USERNAME),
            read_non_empty(store, KEY_PASSWORD),
            read_non_empty(store, KEY_WS_SERVER),
            read_non_empty(store, KEY_DOMAIN),
            read_non_empty(store, KEY_AUTH_USER),
            read_non_empty(store, KEY_REALM),
        )?;

        Ok(SipConfig {
            username,
            password,
            ws_server: ws_server.unwrap_or_else(|| config.default_ws_server.clone()),
            domain: domain.unwrap_or_else(|| config.default_domain.clone()),
            auth_user,
            realm,
        })
    }

    /// Username and password, when both are configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials().is_some()
    }

    pub fn sip_credentials(&self, id: i64) -> Option<SipCredentials> {
        let (username, password) = self.credentials()?;
        Some(SipCredentials {
            username: username.to_string(),
            password: password.to_string(),
            ws_server: self.ws_server.clone(),
            sip_domain: self.domain.clone(),
            id,
        })
    }
}

async fn read_non_empty(store: &dyn CredentialStore, key: &str) -> Result<Option<String>> {
    Ok(store.get(key).await?.filter(|value| !value.trim().is_empty()))
}

/// Extension account returned by a successful backend login.
#[derive(Debug, Clone, Default)]
pub struct ExtensionCredentials {
    pub username: String,
    pub password: String,
    pub ws_server: Option<String>,
    pub domain: Option<String>,
    pub auth_user: Option<String>,
    pub realm: Option<String>,
}

/// Persist a freshly logged-in extension. Optional settings that are absent
/// are removed so stale values from a previous account do not leak through.
pub async fn provision_extension(store: &dyn CredentialStore, extension: ExtensionCredentials) -> Result<()> {
    if extension.username.trim().is_empty() || extension.password.trim().is_empty() {
        return Err(PhoneError::Configuration(
            "extension username and password are required".to_string(),
        ));
    }

    store.set(KEY_USERNAME, extension.username).await?;
    store.set(KEY_PASSWORD, extension.password).await?;

    let optional = [
        (KEY_WS_SERVER, extension.ws_server),
        (KEY_DOMAIN, extension.domain),
        (KEY_AUTH_USER, extension.auth_user),
        (KEY_REALM, extension.realm),
    ];
    for (key, value) in optional {
        match value {
            Some(value) => store.set(key, value).await?,
            None => store.remove(key).await?,
        }
    }

    debug!("extension credentials stored");
    Ok(())
}

/// Forget every SIP setting (logout).
pub async fn clear_extension(store: &dyn CredentialStore) -> Result<()> {
    for key in ALL_KEYS {
        store.remove(key).await?;
    }
    Ok(())
}
