use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A site user as stored in `users.json`, keyed by login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(skip)]
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// Password hash.
    #[serde(default)]
    pub password: String,
    #[serde(
        rename = "password-changed",
        default = "crate::time::epoch",
        with = "crate::time"
    )]
    pub password_changed: DateTime<Utc>,
}
