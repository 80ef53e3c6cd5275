//! Outbound messaging abstractions (Telegram today, other messengers later).

pub mod audited;
pub mod port;
pub mod types;
