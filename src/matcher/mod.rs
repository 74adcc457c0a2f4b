//! Subscription matching.
//!
//! Everything here is pure: given a post, the compiled subscriptions and a
//! settings snapshot, decide which subscriptions match and how.

mod keyword;

use std::fmt;

use serde::Serialize;

use crate::models::{Post, SettingsSnapshot, Subscription};

pub use keyword::Keyword;

/// Where the keywords of a match were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Title,
    Content,
    Author,
    Category,
    Mixed,
    /// Rule without keywords; only the creator/category filters applied.
    CategoryOrAuthor,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchType::Title => "title",
            MatchType::Content => "content",
            MatchType::Author => "author",
            MatchType::Category => "category",
            MatchType::Mixed => "mixed",
            MatchType::CategoryOrAuthor => "category_or_author",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Content,
    Creator,
    Category,
}

impl Field {
    fn match_type(self) -> MatchType {
        match self {
            Field::Title => MatchType::Title,
            Field::Content => MatchType::Content,
            Field::Creator => MatchType::Author,
            Field::Category => MatchType::Category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub subscription_id: i64,
    pub matched_keywords: Vec<String>,
    pub match_type: MatchType,
}

/// A subscription with its keyword directives resolved.
#[derive(Debug, Clone)]
pub struct CompiledSubscription {
    pub subscription: Subscription,
    keywords: Vec<Keyword>,
    creator_filter: Option<String>,
    category_filter: Option<String>,
}

impl CompiledSubscription {
    pub fn compile(subscription: Subscription) -> Self {
        let keywords = subscription
            .keywords()
            .into_iter()
            .map(Keyword::parse)
            .collect();
        let creator_filter = subscription.creator_filter().map(str::to_lowercase);
        let category_filter = subscription.category_filter().map(str::to_lowercase);
        Self {
            subscription,
            keywords,
            creator_filter,
            category_filter,
        }
    }

    pub fn id(&self) -> i64 {
        self.subscription.id
    }

    pub fn keywords(&self) -> &[Keyword] {
        &self.keywords
    }

    /// Evaluate this rule against one post.
    pub fn evaluate(&self, post: &Post, settings: &SettingsSnapshot) -> Option<MatchResult> {
        let creator_lower = post.creator.to_lowercase();
        let category_lower = post.category.to_lowercase();

        if let Some(filter) = &self.creator_filter {
            if !creator_lower.contains(filter.as_str()) {
                return None;
            }
        }
        if let Some(filter) = &self.category_filter {
            if !category_lower.contains(filter.as_str()) {
                return None;
            }
        }

        if self.keywords.is_empty() {
            return Some(MatchResult {
                subscription_id: self.id(),
                matched_keywords: Vec::new(),
                match_type: MatchType::CategoryOrAuthor,
            });
        }

        let title_lower = post.title.to_lowercase();
        let content_lower = post.content.to_lowercase();

        // Candidate fields in priority order; a keyword is credited to the
        // first field it matches.
        let mut fields: Vec<(Field, &str, &str)> =
            vec![(Field::Title, post.title.as_str(), title_lower.as_str())];
        if !settings.only_title {
            fields.push((Field::Content, post.content.as_str(), content_lower.as_str()));
        }
        if self.creator_filter.is_none() {
            fields.push((Field::Creator, post.creator.as_str(), creator_lower.as_str()));
        }
        if self.category_filter.is_none() {
            fields.push((Field::Category, post.category.as_str(), category_lower.as_str()));
        }

        let mut hit_fields = Vec::with_capacity(self.keywords.len());
        for keyword in &self.keywords {
            let hit = fields
                .iter()
                .find(|(_, text, lower)| keyword.is_match(text, lower))
                .map(|(field, _, _)| *field)?;
            hit_fields.push(hit);
        }

        let match_type = match hit_fields.split_first() {
            Some((first, rest)) if rest.iter().all(|f| f == first) => first.match_type(),
            _ => MatchType::Mixed,
        };

        Some(MatchResult {
            subscription_id: self.id(),
            matched_keywords: self.keywords.iter().map(|k| k.text().to_string()).collect(),
            match_type,
        })
    }
}

pub fn compile_all(subscriptions: Vec<Subscription>) -> Vec<CompiledSubscription> {
    subscriptions
        .into_iter()
        .map(CompiledSubscription::compile)
        .collect()
}

/// Every subscription that matches `post`, in subscription order. The
/// caller treats the first result as the match.
pub fn match_post(
    post: &Post,
    subscriptions: &[CompiledSubscription],
    settings: &SettingsSnapshot,
) -> Vec<MatchResult> {
    subscriptions
        .iter()
        .filter_map(|sub| sub.evaluate(post, settings))
        .collect()
}
