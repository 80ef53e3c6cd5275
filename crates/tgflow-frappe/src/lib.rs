//! Frappe adapter (identity backend over the site's REST API).
//!
//! Accounts are Frappe `User` documents. Credentials are checked against the
//! session login endpoint; lookups and inserts use the resource API with the
//! configured API key.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use tgflow_core::{
    config::FrappeConfig,
    domain::AccountId,
    errors::Error,
    identity::{DirectoryService, Identity, IdentityBackend, NewAccount},
    Result,
};

const LOGIN_METHOD: &str = "login";
const LDAP_LOGIN_METHOD: &str = "frappe.integrations.doctype.ldap_settings.ldap_settings.login";
const USER_FIELDS: &str = r#"["name","email","first_name","enabled"]"#;

#[derive(Clone, Debug)]
pub struct FrappeClient {
    base_url: String,
    auth: Option<String>,
    http: reqwest::Client,
}

/// `User` document fields we read.
#[derive(Debug, Deserialize)]
struct UserDoc {
    name: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default = "enabled_by_default")]
    enabled: i64,
}

fn enabled_by_default() -> i64 {
    1
}

impl From<UserDoc> for Identity {
    fn from(doc: UserDoc) -> Self {
        Identity {
            email: doc.email.unwrap_or_else(|| doc.name.clone()),
            first_name: doc.first_name.unwrap_or_default(),
            enabled: doc.enabled != 0,
            name: AccountId::new(doc.name),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Vec<UserDoc>,
}

#[derive(Debug, Deserialize)]
struct DocResponse {
    data: UserDoc,
}

fn map_err(e: reqwest::Error) -> Error {
    Error::External(format!("frappe request error: {e}"))
}

impl FrappeClient {
    pub fn new(cfg: &FrappeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Config(format!("frappe http client: {e}")))?;
        Ok(Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            auth: token_header(cfg.api_key.as_deref(), cfg.api_secret.as_deref()),
            http,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/api/method/{method}", self.base_url)
    }

    fn resource_url(&self, doctype: &str) -> String {
        format!("{}/api/resource/{doctype}", self.base_url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some(token) => req.header(reqwest::header::AUTHORIZATION, token),
            None => req,
        }
    }

    /// `Ok(true)` when the site accepted the credentials on `method`.
    async fn try_login(&self, method: &str, login: &str, password: &str) -> Result<bool> {
        let resp = self
            .http
            .post(self.method_url(method))
            .form(&[("usr", login), ("pwd", password)])
            .send()
            .await
            .map_err(map_err)?;

        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        if is_rejection(status) {
            debug!(method, status = status.as_u16(), "login rejected");
            return Ok(false);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::External(format!(
            "frappe {method} failed: {status} {}",
            body.chars().take(200).collect::<String>()
        )))
    }

    /// Login succeeded; fetch the document for the user that logged in.
    async fn identity_after_login(&self, login: &str) -> Result<Option<Identity>> {
        let identity = self.lookup_by_name_or_email(login).await?;
        if identity.is_none() {
            warn!("login accepted but the user document could not be read");
        }
        Ok(identity)
    }
}

/// Frappe answers bad credentials with 401, and some proxies with 403.
fn is_rejection(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

/// `Authorization: token <key>:<secret>` when both halves are configured.
fn token_header(key: Option<&str>, secret: Option<&str>) -> Option<String> {
    match (key, secret) {
        (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => Some(format!("token {k}:{s}")),
        _ => None,
    }
}

/// `or_filters` matching the `User` by document name or email.
fn name_or_email_filter(value: &str) -> String {
    json!([["name", "=", value], ["email", "=", value]]).to_string()
}

fn first_user(body: &str) -> Result<Option<Identity>> {
    let list: ListResponse = serde_json::from_str(body).map_err(Error::Json)?;
    Ok(list.data.into_iter().next().map(Identity::from))
}

fn new_user_payload(account: &NewAccount) -> serde_json::Value {
    json!({
        "email": account.email,
        "first_name": account.first_name,
        "last_name": account.last_name,
        "new_password": account.password,
        "send_welcome_email": 0,
        "enabled": 1,
    })
}

#[async_trait]
impl IdentityBackend for FrappeClient {
    async fn find_by_credentials(&self, login: &str, password: &str) -> Result<Option<Identity>> {
        if !self.try_login(LOGIN_METHOD, login, password).await? {
            return Ok(None);
        }
        self.identity_after_login(login).await
    }

    async fn lookup_by_name_or_email(&self, value: &str) -> Result<Option<Identity>> {
        let req = self.http.get(self.resource_url("User")).query(&[
            ("fields", USER_FIELDS.to_string()),
            ("or_filters", name_or_email_filter(value)),
            ("limit_page_length", "1".to_string()),
        ]);
        let resp = self.authorized(req).send().await.map_err(map_err)?;
        let status = resp.status();
        let body = resp.text().await.map_err(map_err)?;
        if !status.is_success() {
            return Err(Error::External(format!(
                "frappe user lookup failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        first_user(&body)
    }

    async fn check_password(&self, identity: &Identity, password: &str) -> Result<bool> {
        if !identity.enabled {
            return Ok(false);
        }
        self.try_login(LOGIN_METHOD, identity.name.as_str(), password)
            .await
    }

    async fn create_account(&self, account: &NewAccount) -> Result<Identity> {
        let req = self
            .http
            .post(self.resource_url("User"))
            .json(&new_user_payload(account));
        let resp = self.authorized(req).send().await.map_err(map_err)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::External(format!(
                "frappe user insert failed: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        let doc: DocResponse = resp.json().await.map_err(map_err)?;
        Ok(doc.data.into())
    }
}

/// LDAP login through the site's LDAP settings.
#[derive(Clone, Debug)]
pub struct FrappeLdap {
    client: FrappeClient,
    enabled: bool,
}

impl FrappeLdap {
    pub fn new(client: FrappeClient, enabled: bool) -> Self {
        Self { client, enabled }
    }
}

#[async_trait]
impl DirectoryService for FrappeLdap {
    async fn is_enabled(&self) -> Result<bool> {
        Ok(self.enabled)
    }

    async fn authenticate(&self, login: &str, password: &str) -> Result<Option<Identity>> {
        if !self.client.try_login(LDAP_LOGIN_METHOD, login, password).await? {
            return Ok(None);
        }
        self.client.identity_after_login(login).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> FrappeConfig {
        FrappeConfig {
            url: url.to_string(),
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            timeout: Duration::from_secs(10),
            ldap_enabled: false,
        }
    }

    #[test]
    fn urls_are_built_from_a_trimmed_base() {
        let client = FrappeClient::new(&config("https://erp.example.com/")).unwrap();
        assert_eq!(
            client.method_url(LOGIN_METHOD),
            "https://erp.example.com/api/method/login"
        );
        assert_eq!(
            client.resource_url("User"),
            "https://erp.example.com/api/resource/User"
        );
    }

    #[test]
    fn token_header_needs_both_halves() {
        assert_eq!(
            token_header(Some("k"), Some("s")).as_deref(),
            Some("token k:s")
        );
        assert_eq!(token_header(Some("k"), None), None);
        assert_eq!(token_header(Some(""), Some("s")), None);
    }

    #[test]
    fn lookup_filter_matches_name_or_email() {
        let filter: serde_json::Value =
            serde_json::from_str(&name_or_email_filter("a@b.com")).unwrap();
        assert_eq!(filter[0], json!(["name", "=", "a@b.com"]));
        assert_eq!(filter[1], json!(["email", "=", "a@b.com"]));
    }

    #[test]
    fn user_documents_map_to_identities() {
        let found = first_user(
            r#"{"data":[{"name":"alice@example.com","email":"alice@example.com","first_name":"Alice","enabled":0}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(found.name, AccountId::new("alice@example.com"));
        assert_eq!(found.first_name, "Alice");
        assert!(!found.enabled);

        assert_eq!(first_user(r#"{"data":[]}"#).unwrap(), None);
        assert!(first_user("not json").is_err());
    }

    #[test]
    fn missing_fields_fall_back_to_the_document_name() {
        let found = first_user(r#"{"data":[{"name":"bob"}]}"#).unwrap().unwrap();
        assert_eq!(found.email, "bob");
        assert!(found.enabled);
    }

    #[test]
    fn signup_payload_sets_the_password_without_a_welcome_mail() {
        let payload = new_user_payload(&NewAccount {
            first_name: "Bob".into(),
            last_name: "Builder".into(),
            email: "bob@b.com".into(),
            password: "hunter2".into(),
        });
        assert_eq!(payload["email"], "bob@b.com");
        assert_eq!(payload["new_password"], "hunter2");
        assert_eq!(payload["send_welcome_email"], 0);
    }

    #[test]
    fn rejections_are_not_errors() {
        assert!(is_rejection(StatusCode::UNAUTHORIZED));
        assert!(is_rejection(StatusCode::FORBIDDEN));
        assert!(!is_rejection(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
