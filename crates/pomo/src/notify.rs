//! Notification payload carried by a session to its completion callback.

use serde::{Deserialize, Serialize};

use crate::session::SessionOutcome;

/// The user a session was started for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Stable identifier, used as the registry key
    pub id: String,
    /// Display name used in messages
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Everything the sink needs to tell a user their session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyInfo {
    /// Identifier of the conversation or channel the notice goes to
    pub title_id: String,
    pub user: User,
}

impl NotifyInfo {
    pub fn new(title_id: impl Into<String>, user: User) -> Self {
        Self {
            title_id: title_id.into(),
            user,
        }
    }

    /// Registry key for this notification's user.
    pub fn key(&self) -> &str {
        &self.user.id
    }

    /// Text delivered to the user when the session ends.
    pub fn message(&self, outcome: SessionOutcome) -> String {
        match outcome {
            SessionOutcome::Completed => {
                format!("Pomodoro finished, {}! Time for a break.", self.user.name)
            }
            SessionOutcome::Cancelled => format!("Pomodoro cancelled for {}.", self.user.name),
        }
    }
}
