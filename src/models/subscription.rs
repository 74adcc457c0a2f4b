use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const MAX_KEYWORDS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub keyword1: Option<String>,
    pub keyword2: Option<String>,
    pub keyword3: Option<String>,
    pub creator: Option<String>,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Non-empty keyword slots, in slot order.
    pub fn keywords(&self) -> Vec<&str> {
        [&self.keyword1, &self.keyword2, &self.keyword3]
            .into_iter()
            .filter_map(|k| non_blank(k.as_deref()))
            .collect()
    }

    pub fn creator_filter(&self) -> Option<&str> {
        non_blank(self.creator.as_deref())
    }

    pub fn category_filter(&self) -> Option<&str> {
        non_blank(self.category.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub keywords: Vec<String>,
    pub creator: Option<String>,
    pub category: Option<String>,
}

impl NewSubscription {
    /// Trim everything, drop blank slots and reject rules that could never
    /// filter anything.
    pub fn validate(self) -> Result<Self> {
        let keywords: Vec<String> = self
            .keywords
            .iter()
            .filter_map(|k| non_blank(Some(k)))
            .map(str::to_string)
            .collect();
        if keywords.len() > MAX_KEYWORDS {
            return Err(AppError::Validation(format!(
                "at most {} keywords per subscription",
                MAX_KEYWORDS
            )));
        }

        let creator = non_blank(self.creator.as_deref()).map(str::to_string);
        let category = non_blank(self.category.as_deref()).map(str::to_string);

        if keywords.is_empty() && creator.is_none() && category.is_none() {
            return Err(AppError::Validation(
                "a subscription needs a keyword, a creator or a category".to_string(),
            ));
        }

        Ok(Self {
            keywords,
            creator,
            category,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
