use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Dispatch loop tuning. Usable without any environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchConfig {
    pub queue_capacity: usize,
    pub poll_timeout: Duration,
    /// Worker pool size for detached handlers.
    pub workers: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            poll_timeout: Duration::from_millis(1000),
            workers: 4,
        }
    }
}

/// Frappe site used as identity backend.
#[derive(Clone, Debug)]
pub struct FrappeConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub timeout: Duration,
    pub ldap_enabled: bool,
}

/// Typed process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub bot_name: String,
    pub dispatch: DispatchConfig,

    // Persistence
    pub session_file: Option<PathBuf>,
    /// Messaging users (account links, guest flags). In memory when unset.
    pub store_file: Option<PathBuf>,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,

    // Identity
    pub frappe: Option<FrappeConfig>,
    pub guest_users: Vec<i64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in
    /// [`Config::load`]).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let bot_name = get("TELEGRAM_BOT_NAME").unwrap_or_else(|| "default".to_string());

        let defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            queue_capacity: parse_num(&get, "UPDATE_QUEUE_CAPACITY")?
                .unwrap_or(defaults.queue_capacity)
                .max(1),
            poll_timeout: parse_num::<u64>(&get, "QUEUE_POLL_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_timeout),
            workers: parse_num(&get, "WORKERS")?.unwrap_or(defaults.workers),
        };

        let session_file = get("SESSION_FILE").map(PathBuf::from);
        let store_file = get("STORE_FILE").map(PathBuf::from);
        let audit_log_path = get("AUDIT_LOG_PATH").map(PathBuf::from);
        let audit_log_json = get("AUDIT_LOG_JSON").map(|s| truthy(&s)).unwrap_or(false);

        let frappe = match get("FRAPPE_URL") {
            Some(url) => Some(FrappeConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key: get("FRAPPE_API_KEY"),
                api_secret: get("FRAPPE_API_SECRET"),
                timeout: Duration::from_millis(
                    parse_num(&get, "FRAPPE_TIMEOUT_MS")?.unwrap_or(10_000),
                ),
                ldap_enabled: get("LDAP_ENABLED").map(|s| truthy(&s)).unwrap_or(false),
            }),
            None => None,
        };

        let guest_users = parse_csv_i64(get("GUEST_USERS"))?;

        Ok(Self {
            telegram_bot_token,
            bot_name,
            dispatch,
            session_file,
            store_file,
            audit_log_path,
            audit_log_json,
            frappe,
            guest_users,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

/// Strip optional surrounding quotes.
fn unquote(val: &str) -> &str {
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn truthy(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    get(key)
        .map(|s| {
            s.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{key} must be a non-negative integer")))
        })
        .transpose()
}

fn parse_csv_i64(v: Option<String>) -> Result<Vec<i64>> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| Error::Config(format!("GUEST_USERS contains invalid user id {s:?}")))
        })
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn token_is_required() {
        assert!(matches!(load(&[]), Err(Error::Config(_))));
        assert!(matches!(
            load(&[("TELEGRAM_BOT_TOKEN", "  ")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("TELEGRAM_BOT_TOKEN", "t")]).unwrap();
        assert_eq!(cfg.bot_name, "default");
        assert_eq!(cfg.dispatch, DispatchConfig::default());
        assert!(cfg.session_file.is_none());
        assert!(cfg.store_file.is_none());
        assert!(cfg.frappe.is_none());
        assert!(cfg.guest_users.is_empty());
        assert!(!cfg.audit_log_json);
    }

    #[test]
    fn reads_every_section() {
        let cfg = load(&[
            ("TELEGRAM_BOT_TOKEN", "t"),
            ("TELEGRAM_BOT_NAME", "helpdesk"),
            ("UPDATE_QUEUE_CAPACITY", "16"),
            ("QUEUE_POLL_TIMEOUT_MS", "250"),
            ("WORKERS", "2"),
            ("SESSION_FILE", "/var/lib/tgflow/sessions.json"),
            ("STORE_FILE", "/var/lib/tgflow/users.json"),
            ("AUDIT_LOG_PATH", "/var/log/tgflow.log"),
            ("AUDIT_LOG_JSON", "yes"),
            ("FRAPPE_URL", "https://erp.example.com/"),
            ("FRAPPE_API_KEY", "key"),
            ("FRAPPE_API_SECRET", "secret"),
            ("LDAP_ENABLED", "1"),
            ("GUEST_USERS", "11, 12,,13"),
        ])
        .unwrap();

        assert_eq!(cfg.bot_name, "helpdesk");
        assert_eq!(cfg.dispatch.queue_capacity, 16);
        assert_eq!(cfg.dispatch.poll_timeout, Duration::from_millis(250));
        assert_eq!(cfg.dispatch.workers, 2);
        assert!(cfg.audit_log_json);
        assert_eq!(cfg.store_file, Some(PathBuf::from("/var/lib/tgflow/users.json")));
        let frappe = cfg.frappe.unwrap();
        assert_eq!(frappe.url, "https://erp.example.com");
        assert_eq!(frappe.timeout, Duration::from_millis(10_000));
        assert!(frappe.ldap_enabled);
        assert_eq!(cfg.guest_users, vec![11, 12, 13]);
    }

    #[test]
    fn rejects_malformed_numbers() {
        assert!(load(&[("TELEGRAM_BOT_TOKEN", "t"), ("WORKERS", "many")]).is_err());
        assert!(load(&[("TELEGRAM_BOT_TOKEN", "t"), ("GUEST_USERS", "1,x")]).is_err());
    }

    #[test]
    fn unquote_strips_matching_quotes_only() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"abc"), "\"abc");
    }
}
