//! Line commands accepted by the console driver.

use std::time::Duration;

use thiserror::Error;

use crate::duration::parse_duration;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command: {0}")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
}

/// A parsed console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Start a session; `None` means the configured default length
    Start {
        user: String,
        duration: Option<Duration>,
    },
    Stop {
        user: String,
    },
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub const HELP: &'static str = "\
Commands:
  start <user> [duration]   start a session (e.g. 25m, 1h30m, 90s)
  stop <user>               cancel the user's active session
  status                    show how many sessions are active
  help                      show this message
  quit                      cancel all sessions and exit";

    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };

        let command = match verb.to_lowercase().as_str() {
            "start" | "pom" | "pomodoro" => {
                let user = words
                    .next()
                    .ok_or(CommandError::Usage("start <user> [duration]"))?;
                let duration = match words.next() {
                    Some(text) => Some(
                        parse_duration(text)
                            .ok_or_else(|| CommandError::InvalidDuration(text.to_string()))?,
                    ),
                    None => None,
                };
                Self::Start {
                    user: user.to_string(),
                    duration,
                }
            }
            "stop" | "cancel" => {
                let user = words.next().ok_or(CommandError::Usage("stop <user>"))?;
                Self::Stop {
                    user: user.to_string(),
                }
            }
            "status" | "count" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(CommandError::Unknown(other.to_string())),
        };

        Ok(Some(command))
    }
}
