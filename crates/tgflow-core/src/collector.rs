//! Multi-turn, type-validated field collection.
//!
//! A caller declares a [`FieldSet`] and calls [`collect`] once per inbound
//! update under a stable collection key. Progress lives in the user's session
//! scratch map between turns and is removed as soon as the collection
//! completes; the caller receives the final values in the returned
//! [`CollectionState`].

use std::{collections::BTreeMap, fmt};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    context::ExecutionContext,
    errors::Error,
    messaging::types::{ReplyKeyboard, ReplyMarkup},
    update::InboundUpdate,
    Result,
};

#[derive(Clone, Debug)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    /// Must match at the start of the input.
    Regex(Regex),
    /// One of the listed options, offered as a one-time keyboard.
    Choice(Vec<String>),
    /// Any text; the incoming message is redacted once accepted.
    Secret,
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
    pub key: String,
    pub label: String,
    pub kind: FieldKind,
    pub prompt: Option<String>,
    pub required: bool,
}

impl FieldSpec {
    fn new(key: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            kind,
            prompt: None,
            required: true,
        }
    }

    pub fn string(key: &str, label: &str) -> Self {
        Self::new(key, label, FieldKind::String)
    }

    pub fn integer(key: &str, label: &str) -> Self {
        Self::new(key, label, FieldKind::Integer)
    }

    pub fn float(key: &str, label: &str) -> Self {
        Self::new(key, label, FieldKind::Float)
    }

    pub fn regex(key: &str, label: &str, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern).map_err(|e| Error::InvalidField {
            key: key.to_string(),
            reason: format!("invalid pattern: {e}"),
        })?;
        Ok(Self::new(key, label, FieldKind::Regex(re)))
    }

    pub fn choice<I, S>(key: &str, label: &str, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let options = options.into_iter().map(Into::into).collect();
        Self::new(key, label, FieldKind::Choice(options))
    }

    pub fn secret(key: &str, label: &str) -> Self {
        Self::new(key, label, FieldKind::Secret)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    fn prompt_text(&self) -> String {
        self.prompt
            .clone()
            .unwrap_or_else(|| format!("Please provide your {}", self.label))
    }

    fn markup(&self) -> Option<ReplyMarkup> {
        match &self.kind {
            FieldKind::Choice(options) => {
                Some(ReplyMarkup::Keyboard(ReplyKeyboard::one_time(options)))
            }
            _ => None,
        }
    }

    /// `Ok(None)` accepts an empty optional field without storing a value.
    fn validate(&self, text: &str) -> std::result::Result<Option<FieldValue>, String> {
        if let FieldKind::Choice(options) = &self.kind {
            if !options.iter().any(|o| o == text) {
                return Err("Please select from the given options".to_string());
            }
            return Ok(Some(FieldValue::Text(text.to_string())));
        }

        if text.is_empty() {
            if self.required {
                return Err("This is a required field".to_string());
            }
            return Ok(None);
        }

        match &self.kind {
            FieldKind::String => Ok(Some(FieldValue::Text(text.to_string()))),
            FieldKind::Integer => text
                .trim()
                .parse::<i64>()
                .map(|v| Some(FieldValue::Integer(v)))
                .map_err(|_| "Please enter a valid integer".to_string()),
            FieldKind::Float => text
                .trim()
                .parse::<f64>()
                .map(|v| Some(FieldValue::Float(v)))
                .map_err(|_| "Please enter a valid float".to_string()),
            FieldKind::Regex(re) => match re.find(text) {
                Some(m) if m.start() == 0 => Ok(Some(FieldValue::Text(text.to_string()))),
                _ => Err(format!("Please enter a valid {}", self.label)),
            },
            FieldKind::Secret => Ok(Some(FieldValue::Secret(text.to_string()))),
            FieldKind::Choice(_) => Ok(Some(FieldValue::Text(text.to_string()))),
        }
    }
}

/// Ordered, validated list of fields. Declaration order is asking order.
#[derive(Clone, Debug)]
pub struct FieldSet {
    fields: Vec<FieldSpec>,
}

impl FieldSet {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        for (i, f) in fields.iter().enumerate() {
            if f.key.trim().is_empty() {
                return Err(Error::InvalidField {
                    key: f.key.clone(),
                    reason: "empty key".to_string(),
                });
            }
            if fields[..i].iter().any(|prev| prev.key == f.key) {
                return Err(Error::InvalidField {
                    key: f.key.clone(),
                    reason: "duplicate key".to_string(),
                });
            }
            if let FieldKind::Choice(options) = &f.kind {
                if options.is_empty() {
                    return Err(Error::InvalidField {
                        key: f.key.clone(),
                        reason: "choice field without options".to_string(),
                    });
                }
            }
        }
        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.key == key)
    }

    fn first_key(&self) -> Option<String> {
        self.fields.first().map(|f| f.key.clone())
    }

    fn key_after(&self, key: &str) -> Option<String> {
        let pos = self.fields.iter().position(|f| f.key == key)?;
        self.fields.get(pos + 1).map(|f| f.key.clone())
    }
}

/// A collected value. Secrets never appear in `Debug` output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Secret(String),
}

impl FieldValue {
    /// Text of `Text` and `Secret` values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) | FieldValue::Secret(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => f.debug_tuple("Text").field(s).finish(),
            FieldValue::Integer(v) => f.debug_tuple("Integer").field(v).finish(),
            FieldValue::Float(v) => f.debug_tuple("Float").field(v).finish(),
            FieldValue::Secret(_) => f.write_str("Secret(*****)"),
        }
    }
}

/// Progress of one in-flight collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionState {
    complete: bool,
    last_asked: Option<String>,
    next_to_ask: Option<String>,
    values: BTreeMap<String, FieldValue>,
}

impl CollectionState {
    fn start(fields: &FieldSet) -> Self {
        let next_to_ask = fields.first_key();
        Self {
            complete: next_to_ask.is_none(),
            next_to_ask,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn last_asked(&self) -> Option<&str> {
        self.last_asked.as_deref()
    }

    pub fn next_to_ask(&self) -> Option<&str> {
        self.next_to_ask.as_deref()
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_str)
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(FieldValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(FieldValue::Float(v)) => Some(*v),
            _ => None,
        }
    }
}

fn scratch_key(key: &str) -> String {
    format!("collect:{key}")
}

/// Advance the collection `key` by one turn.
///
/// Validates the update against the field asked last time, prompts for the
/// next one, and clears the stored progress once every field is collected.
/// Validation failures are answered in chat and leave the state unchanged.
pub async fn collect(
    key: &str,
    fields: &FieldSet,
    update: &InboundUpdate,
    ctx: &mut ExecutionContext,
) -> Result<CollectionState> {
    let slot = scratch_key(key);
    let mut state = match ctx.scratch_get::<CollectionState>(&slot)? {
        Some(stored) => stored,
        None => CollectionState::start(fields),
    };

    if state.complete {
        ctx.scratch_remove(&slot);
        return Ok(state);
    }

    let asked = state.last_asked.as_deref().map(|k| (k.to_string(), fields.get(k)));
    if let Some((asked, None)) = &asked {
        warn!(collection = key, field = %asked, "stored field no longer declared; restarting");
        state = CollectionState::start(fields);
    }

    if let Some((_, Some(spec))) = asked {
        let text = update.text().unwrap_or_default();
        match spec.validate(text) {
            Err(message) => {
                debug!(collection = key, field = %spec.key, "field rejected");
                ctx.reply(&message).await?;
                ctx.reply("Please try again").await?;
                return Ok(state);
            }
            Ok(value) => {
                if matches!(value, Some(FieldValue::Secret(_))) {
                    ctx.redact_incoming().await?;
                }
                if let Some(value) = value {
                    state.values.insert(spec.key.clone(), value);
                }
                state.next_to_ask = fields.key_after(&spec.key);
                if state.next_to_ask.is_none() {
                    state.complete = true;
                }
            }
        }
    }

    if let Some(next) = state.next_to_ask.take() {
        let Some(spec) = fields.get(&next) else {
            return Err(Error::InvalidField {
                key: next,
                reason: "not declared in this field set".to_string(),
            });
        };
        let prompt = spec.prompt_text();
        match spec.markup() {
            Some(markup) => ctx.reply_with(&prompt, markup).await?,
            None => ctx.reply(&prompt).await?,
        };
        state.last_asked = Some(next);
    }

    if state.complete {
        ctx.scratch_remove(&slot);
    } else {
        ctx.scratch_put(&slot, &state)?;
    }
    Ok(state)
}

/// Drop any in-flight progress for `key`.
pub fn reset(key: &str, ctx: &mut ExecutionContext) {
    ctx.scratch_remove(&scratch_key(key));
}
