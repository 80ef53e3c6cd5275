use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

/// RFC3339 timestamp in UTC.
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

/// One line of the audit trail.
///
/// Never carries incoming message bodies.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, bot: &str, update_id: i64, chat_id: i64, user_id: Option<i64>) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            bot: Some(bot.to_string()),
            update_id: Some(update_id),
            chat_id: Some(chat_id),
            user_id,
            ..Default::default()
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update(
        bot: &str,
        update_id: i64,
        chat_id: i64,
        user_id: Option<i64>,
        handled: bool,
        stopped: bool,
        handlers: Vec<String>,
        sent: usize,
        duration_ms: u64,
    ) -> Self {
        Self {
            handled: Some(handled),
            stopped: Some(stopped),
            handlers,
            sent: Some(sent),
            duration_ms: Some(duration_ms),
            ..Self::base("update", bot, update_id, chat_id, user_id)
        }
    }

    pub fn auth(
        bot: &str,
        update_id: i64,
        chat_id: i64,
        user_id: Option<i64>,
        account: Option<&str>,
        authorized: bool,
    ) -> Self {
        Self {
            account: account.map(|s| s.to_string()),
            authorized: Some(authorized),
            ..Self::base("auth", bot, update_id, chat_id, user_id)
        }
    }

    pub fn error(
        bot: &str,
        update_id: i64,
        chat_id: i64,
        user_id: Option<i64>,
        error: &str,
        context: Option<&str>,
    ) -> Self {
        Self {
            error: Some(error.to_string()),
            context: context.map(|s| s.to_string()),
            ..Self::base("error", bot, update_id, chat_id, user_id)
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }
        if let Some(s) = &event.context {
            event.context = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        // Plain text format for readability.
        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            out.push_str(&json_value_to_display(v));
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

fn json_value_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => s.to_string(),
        other => serde_json::to_string(other).unwrap_or_else(|_| "<unprintable>".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), AUDIT_MAX_TEXT + 3);
        assert_eq!(truncate_text("short", AUDIT_MAX_TEXT), "short");
    }

    #[test]
    fn json_lines_skip_empty_fields_and_truncate_errors() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), true);

        log.write(AuditEvent::update(
            "bot",
            1,
            10,
            Some(7),
            true,
            false,
            vec!["auth:gate".to_string()],
            1,
            3,
        ))
        .unwrap();
        let long = "e".repeat(AUDIT_MAX_TEXT + 1);
        log.write(AuditEvent::error("bot", 2, 10, None, &long, Some("handler")))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "update");
        assert_eq!(lines[0]["handlers"][0], "auth:gate");
        assert!(lines[0].get("error").is_none());
        assert!(lines[1]["error"].as_str().unwrap().ends_with("..."));
        assert!(lines[1].get("user_id").is_none());
    }

    #[test]
    fn plain_format_writes_key_value_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), false);
        log.write(AuditEvent::auth("bot", 1, 10, Some(7), Some("alice"), true))
            .unwrap();
        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: auth"));
        assert!(written.contains("account: alice"));
        assert!(written.contains("authorized: true"));
    }
}
