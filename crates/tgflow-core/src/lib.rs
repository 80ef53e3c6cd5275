//! Core update-processing engine for chat bots.
//!
//! This crate is intentionally framework-agnostic. Telegram and the identity
//! backend live behind ports (traits) implemented in adapter crates.

pub mod audit;
pub mod collector;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod handler;
pub mod hooks;
pub mod identity;
pub mod logging;
pub mod message_log;
pub mod messaging;
pub mod notify;
pub mod registry;
pub mod session;
pub mod store;
pub mod update;

#[cfg(test)]
pub(crate) mod test_support;

pub use errors::{Error, Result};
