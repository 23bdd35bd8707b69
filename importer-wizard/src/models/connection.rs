use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::de_string_id;

/// Identity of a backend connection. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    #[serde(deserialize_with = "de_string_id")]
    pub id: String,
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn new(id: impl Into<String>, url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            username: username.into(),
            created_at: None,
        }
    }

    pub fn created_now(mut self) -> Self {
        self.created_at = Some(Utc::now());
        self
    }

    /// Short label for lists and the header bar.
    pub fn display_label(&self) -> String {
        format!("{}@{}", self.username, self.url)
    }
}
