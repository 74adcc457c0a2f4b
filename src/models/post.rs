use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery state of a stored post. The discriminants are what the
/// `posts.push_status` column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PushStatus {
    #[default]
    Pending = 0,
    MatchedUndelivered = 1,
    NoMatch = 2,
    Delivered = 3,
}

impl PushStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(PushStatus::Pending),
            1 => Some(PushStatus::MatchedUndelivered),
            2 => Some(PushStatus::NoMatch),
            3 => Some(PushStatus::Delivered),
            _ => None,
        }
    }

    /// The only transitions the pipeline is allowed to make.
    pub fn can_transition_to(self, next: PushStatus) -> bool {
        matches!(
            (self, next),
            (PushStatus::Pending, PushStatus::MatchedUndelivered)
                | (PushStatus::Pending, PushStatus::NoMatch)
                | (PushStatus::MatchedUndelivered, PushStatus::Delivered)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            PushStatus::Pending => "pending",
            PushStatus::MatchedUndelivered => "matched",
            PushStatus::NoMatch => "no match",
            PushStatus::Delivered => "delivered",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub post_id: i64,
    pub title: String,
    pub summary: String,
    /// Plain-text body, used for non-title matching.
    pub content: String,
    pub category: String,
    pub creator: String,
    pub pub_date: DateTime<Utc>,
    pub push_status: PushStatus,
    pub matched_subscription_id: Option<i64>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// A normalized feed entry that has not been stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub post_id: i64,
    pub title: String,
    pub summary: String,
    pub content: String,
    pub category: String,
    pub creator: String,
    pub pub_date: DateTime<Utc>,
}

/// One row of a batch status write.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub post_id: i64,
    pub from: PushStatus,
    pub to: PushStatus,
    pub matched_subscription_id: Option<i64>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn matched(post_id: i64, subscription_id: i64) -> Self {
        Self {
            post_id,
            from: PushStatus::Pending,
            to: PushStatus::MatchedUndelivered,
            matched_subscription_id: Some(subscription_id),
            delivered_at: None,
        }
    }

    pub fn no_match(post_id: i64) -> Self {
        Self {
            post_id,
            from: PushStatus::Pending,
            to: PushStatus::NoMatch,
            matched_subscription_id: None,
            delivered_at: None,
        }
    }

    pub fn delivered(post_id: i64, subscription_id: i64, at: DateTime<Utc>) -> Self {
        Self {
            post_id,
            from: PushStatus::MatchedUndelivered,
            to: PushStatus::Delivered,
            matched_subscription_id: Some(subscription_id),
            delivered_at: Some(at),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.from.can_transition_to(self.to)
    }
}
