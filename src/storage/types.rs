use chrono::{DateTime, Utc};
use serde::Serialize;

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed queries: id, title, link, feed_link, error
pub(crate) type FeedRow = (i64, String, String, String, Option<String>);

/// Row type for item queries
pub(crate) type ItemRow = (
    String,         // guid
    i64,            // feed_id
    String,         // title
    String,         // link
    String,         // content
    i64,            // date
    i64,            // status
    Option<String>, // image
    Option<String>, // audio_url
);

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feed {
    pub id: i64,
    pub title: String,
    /// Human-facing site address; may be empty.
    pub link: String,
    /// The fetchable feed address.
    pub feed_link: String,
    /// Last fetch/parse error recorded for the current refresh cycle.
    pub error: Option<String>,
}

impl From<FeedRow> for Feed {
    fn from((id, title, link, feed_link, error): FeedRow) -> Self {
        Self {
            id,
            title,
            link,
            feed_link,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Unread,
    Read,
    Starred,
}

impl ItemStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            ItemStatus::Unread => 0,
            ItemStatus::Read => 1,
            ItemStatus::Starred => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => ItemStatus::Read,
            2 => ItemStatus::Starred,
            _ => ItemStatus::Unread,
        }
    }
}

/// A persistable feed entry.
///
/// `image_url` and `audio_url` distinguish "no attachment" (`None`) from an
/// attachment with an empty address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub guid: String,
    pub feed_id: i64,
    pub title: String,
    pub link: String,
    pub content: String,
    pub date: DateTime<Utc>,
    pub status: ItemStatus,
    pub image_url: Option<String>,
    pub audio_url: Option<String>,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        let (guid, feed_id, title, link, content, date, status, image_url, audio_url) = row;
        Self {
            guid,
            feed_id,
            title,
            link,
            content,
            date: DateTime::from_timestamp(date, 0).unwrap_or_default(),
            status: ItemStatus::from_i64(status),
            image_url,
            audio_url,
        }
    }
}

/// Cache validators from the last successful fetch of a feed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpState {
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}
