//! Pomo focus timer engine.
//!
//! Runs at most one timed session per user and reports each session's end
//! exactly once, marked as completed or cancelled.

pub mod commands;
pub mod config;
pub mod duration;
pub mod notify;
pub mod session;

pub use config::{AppConfig, ConfigError, ConfigSources};
pub use notify::{NotifyInfo, User};
pub use session::{Session, SessionId, SessionOutcome, SessionRegistry, SessionState};
