//! Session entity and partial updates

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::tsid::Tsid;

/// A virtual grouping of traces sharing a session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: Tsid,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub bookmarked: bool,
    #[serde(default)]
    pub public: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub version: u64,
}

/// Partial session update.
///
/// `None` preserves the existing value; `Some` overwrites, including
/// booleans. An empty metadata map clears the metadata, `None` preserves it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionUpdate {
    pub user_id: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
    pub bookmarked: Option<bool>,
    pub public: Option<bool>,
}

impl Session {
    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(user_id) = &update.user_id {
            self.user_id = Some(user_id.clone());
        }
        if let Some(metadata) = &update.metadata {
            // Empty map means "clear"
            self.metadata = metadata.clone();
        }
        if let Some(bookmarked) = update.bookmarked {
            self.bookmarked = bookmarked;
        }
        if let Some(public) = update.public {
            self.public = public;
        }
        self.updated_at = Utc::now();
    }
}
