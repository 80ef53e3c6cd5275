//! Identity backend port and the credential verification policy.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{domain::AccountId, errors::Error, Result};

/// An account in the identity backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub name: AccountId,
    pub email: String,
    pub first_name: String,
    pub enabled: bool,
}

/// Details collected by the signup flow.
#[derive(Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for NewAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NewAccount")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Account store the login and signup flows talk to.
///
/// Implementations own their timeouts and retries.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Direct credentials check. Backends without one return
    /// [`Error::Unsupported`], which switches verification to
    /// lookup + [`IdentityBackend::check_password`].
    async fn find_by_credentials(&self, _login: &str, _password: &str) -> Result<Option<Identity>> {
        Err(Error::Unsupported("find_by_credentials"))
    }

    async fn lookup_by_name_or_email(&self, value: &str) -> Result<Option<Identity>>;

    async fn check_password(&self, identity: &Identity, password: &str) -> Result<bool>;

    async fn create_account(&self, account: &NewAccount) -> Result<Identity>;
}

/// Optional secondary authentication (e.g. LDAP).
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn is_enabled(&self) -> Result<bool>;

    async fn authenticate(&self, login: &str, password: &str) -> Result<Option<Identity>>;
}

/// Primary backend check, then the directory service when the primary
/// check did not verify the user.
#[derive(Clone)]
pub struct CredentialVerifier {
    backend: Arc<dyn IdentityBackend>,
    directory: Option<Arc<dyn DirectoryService>>,
}

impl CredentialVerifier {
    pub fn new(backend: Arc<dyn IdentityBackend>) -> Self {
        Self {
            backend,
            directory: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn backend(&self) -> Arc<dyn IdentityBackend> {
        self.backend.clone()
    }

    /// `Some(identity)` only when the credentials were verified.
    ///
    /// Backend failures are logged and reported as unverified.
    pub async fn verify(&self, login: &str, password: &str) -> Option<Identity> {
        match self.primary(login, password).await {
            Ok(Some(identity)) => return Some(identity),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "primary credential check failed"),
        }

        let directory = self.directory.as_ref()?;
        match directory.is_enabled().await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!(error = %e, "directory service state unavailable");
                return None;
            }
        }
        match directory.authenticate(login, password).await {
            Ok(found) => {
                debug!(verified = found.is_some(), "directory authentication");
                found
            }
            Err(e) => {
                warn!(error = %e, "directory authentication failed");
                None
            }
        }
    }

    async fn primary(&self, login: &str, password: &str) -> Result<Option<Identity>> {
        match self.backend.find_by_credentials(login, password).await {
            Err(Error::Unsupported(_)) => {}
            other => return other,
        }

        let Some(identity) = self.backend.lookup_by_name_or_email(login).await? else {
            return Ok(None);
        };
        if self.backend.check_password(&identity, password).await? {
            Ok(Some(identity))
        } else {
            Ok(None)
        }
    }
}

fn hash_password(password: &str) -> String {
    let mut h = Sha256::new();
    h.update(password.as_bytes());
    format!("{:x}", h.finalize())
}

/// In-process backend. Passwords are kept as SHA-256 digests.
///
/// Has no direct credentials check, so verification takes the lookup path.
#[derive(Default)]
pub struct MemoryIdentityBackend {
    accounts: Mutex<HashMap<String, (Identity, String)>>,
}

impl MemoryIdentityBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, identity: Identity, password: &str) {
        self.accounts.lock().await.insert(
            identity.name.as_str().to_string(),
            (identity, hash_password(password)),
        );
    }
}

#[async_trait]
impl IdentityBackend for MemoryIdentityBackend {
    async fn lookup_by_name_or_email(&self, value: &str) -> Result<Option<Identity>> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .values()
            .map(|(identity, _)| identity)
            .find(|i| i.name.as_str() == value || i.email.eq_ignore_ascii_case(value))
            .cloned())
    }

    async fn check_password(&self, identity: &Identity, password: &str) -> Result<bool> {
        let accounts = self.accounts.lock().await;
        Ok(accounts
            .get(identity.name.as_str())
            .map(|(stored, digest)| stored.enabled && *digest == hash_password(password))
            .unwrap_or(false))
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Identity> {
        let mut accounts = self.accounts.lock().await;
        if accounts
            .values()
            .any(|(i, _)| i.email.eq_ignore_ascii_case(&account.email))
        {
            return Err(Error::External(format!(
                "an account for {} already exists",
                account.email
            )));
        }
        let identity = Identity {
            name: AccountId::new(account.email.clone()),
            email: account.email.clone(),
            first_name: account.first_name.clone(),
            enabled: true,
        };
        accounts.insert(
            identity.name.as_str().to_string(),
            (identity.clone(), hash_password(&account.password)),
        );
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            name: AccountId::new("alice"),
            email: "a@b.com".to_string(),
            first_name: "Alice".to_string(),
            enabled: true,
        }
    }

    struct DirectBackend;

    #[async_trait]
    impl IdentityBackend for DirectBackend {
        async fn find_by_credentials(&self, login: &str, password: &str) -> Result<Option<Identity>> {
            Ok((login == "a@b.com" && password == "direct").then(alice))
        }

        async fn lookup_by_name_or_email(&self, _value: &str) -> Result<Option<Identity>> {
            panic!("lookup must not be used when the direct check is supported")
        }

        async fn check_password(&self, _identity: &Identity, _password: &str) -> Result<bool> {
            panic!("check_password must not be used when the direct check is supported")
        }

        async fn create_account(&self, _account: &NewAccount) -> Result<Identity> {
            Err(Error::Unsupported("create_account"))
        }
    }

    struct Directory {
        enabled: bool,
    }

    #[async_trait]
    impl DirectoryService for Directory {
        async fn is_enabled(&self) -> Result<bool> {
            Ok(self.enabled)
        }

        async fn authenticate(&self, login: &str, password: &str) -> Result<Option<Identity>> {
            Ok((login == "a@b.com" && password == "ldap").then(alice))
        }
    }

    #[tokio::test]
    async fn falls_back_to_lookup_and_password_check() {
        let backend = Arc::new(MemoryIdentityBackend::new());
        backend.insert(alice(), "secret123").await;
        let verifier = CredentialVerifier::new(backend);

        assert_eq!(verifier.verify("a@b.com", "secret123").await, Some(alice()));
        assert_eq!(verifier.verify("alice", "secret123").await, Some(alice()));
        assert_eq!(verifier.verify("a@b.com", "wrong").await, None);
        assert_eq!(verifier.verify("nobody@b.com", "secret123").await, None);
    }

    #[tokio::test]
    async fn uses_direct_check_when_supported() {
        let verifier = CredentialVerifier::new(Arc::new(DirectBackend));
        assert_eq!(verifier.verify("a@b.com", "direct").await, Some(alice()));
        assert_eq!(verifier.verify("a@b.com", "nope").await, None);
    }

    #[tokio::test]
    async fn directory_is_consulted_only_when_enabled_and_primary_failed() {
        let backend = Arc::new(MemoryIdentityBackend::new());
        backend.insert(alice(), "secret123").await;

        let enabled = CredentialVerifier::new(backend.clone())
            .with_directory(Arc::new(Directory { enabled: true }));
        assert_eq!(enabled.verify("a@b.com", "ldap").await, Some(alice()));
        assert_eq!(enabled.verify("a@b.com", "secret123").await, Some(alice()));

        let disabled = CredentialVerifier::new(backend)
            .with_directory(Arc::new(Directory { enabled: false }));
        assert_eq!(disabled.verify("a@b.com", "ldap").await, None);
    }

    #[tokio::test]
    async fn disabled_accounts_do_not_verify() {
        let backend = Arc::new(MemoryIdentityBackend::new());
        backend
            .insert(Identity { enabled: false, ..alice() }, "secret123")
            .await;
        assert_eq!(
            CredentialVerifier::new(backend).verify("a@b.com", "secret123").await,
            None
        );
    }

    #[tokio::test]
    async fn create_account_rejects_duplicate_email() {
        let backend = MemoryIdentityBackend::new();
        let new = NewAccount {
            first_name: "Bob".into(),
            last_name: "B".into(),
            email: "bob@b.com".into(),
            password: "pw".into(),
        };
        let created = backend.create_account(&new).await.unwrap();
        assert_eq!(created.name.as_str(), "bob@b.com");
        assert!(backend.check_password(&created, "pw").await.unwrap());
        assert!(backend.create_account(&new).await.is_err());
        assert!(!format!("{new:?}").contains("pw\""));
    }
}
