//! Queue entities returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Topic lifecycle: `planned -> writing -> published`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TopicStatus {
    Planned,
    Writing,
    Published,
}

#[derive(Debug, Error)]
#[error("unknown topic status {0:?}")]
pub struct UnknownStatus(pub String);

impl TopicStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopicStatus::Planned => "planned",
            TopicStatus::Writing => "writing",
            TopicStatus::Published => "published",
        }
    }

    pub fn parse_status(s: &str) -> Result<Self, UnknownStatus> {
        match s {
            "planned" => Ok(TopicStatus::Planned),
            "writing" => Ok(TopicStatus::Writing),
            "published" => Ok(TopicStatus::Published),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One row of the topic queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Topic {
    pub id: i64,
    pub topic: String,
    pub reason: Option<String>,
    pub summary: Option<String>,
    pub target_date: Option<NaiveDate>,
    pub status: TopicStatus,
    pub media_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Input for [`crate::db::enqueue`].
#[derive(Debug, Clone)]
pub struct NewTopic<'a> {
    pub topic: &'a str,
    pub reason: &'a str,
    pub summary: &'a str,
    pub target_date: NaiveDate,
}
