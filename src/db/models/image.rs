//! Image record data model.
//!
//! One row per captured picture waiting for (or done with) delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: i64,
    /// File name inside the pictures directory; unique across the table.
    pub name: String,
    pub size_kb: f64,
    pub created_at: DateTime<Utc>,
    /// Short-lived lease taken by the dispatcher around the file presence check.
    pub ignore: bool,
    pub sent: bool,
    pub sent_at: Option<DateTime<Utc>>,
    /// Server-side classification code, see [`ImageStatus`].
    pub status: i64,
}

impl ImageRecord {
    /// Eligible records are the only ones the dispatcher may select.
    pub fn is_eligible(&self) -> bool {
        !self.ignore && !self.sent
    }

    pub fn remote_status(&self) -> Option<ImageStatus> {
        ImageStatus::from_code(self.status)
    }
}

/// Classification reported by the server for a delivered picture.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ImageStatus {
    Pending,
    Invalid,
    Valid,
}

impl ImageStatus {
    pub fn code(self) -> i64 {
        match self {
            ImageStatus::Pending => -1,
            ImageStatus::Invalid => 0,
            ImageStatus::Valid => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            -1 => Some(ImageStatus::Pending),
            0 => Some(ImageStatus::Invalid),
            1 => Some(ImageStatus::Valid),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageStatus::Pending => "pending",
            ImageStatus::Invalid => "invalid",
            ImageStatus::Valid => "valid",
        }
    }
}

impl Default for ImageStatus {
    fn default() -> Self {
        ImageStatus::Pending
    }
}
