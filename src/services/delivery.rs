use std::sync::Arc;

use crate::models::{Post, Subscription};

use super::telegram::MessageSender;

/// Characters that break Telegram Markdown, and their look-alikes.
const LOOKALIKES: &[(char, char)] = &[
    ('(', '（'),
    (')', '）'),
    ('[', '［'),
    (']', '］'),
    ('*', '∗'),
    ('_', '＿'),
    ('`', 'ˋ'),
];

pub fn sanitize_markdown(text: &str) -> String {
    text.chars()
        .map(|c| {
            LOOKALIKES
                .iter()
                .find(|(from, _)| *from == c)
                .map_or(c, |(_, to)| *to)
        })
        .collect()
}

pub fn post_url(site_base_url: &str, post_id: i64) -> String {
    format!("{}/post-{}-1", site_base_url.trim_end_matches('/'), post_id)
}

pub fn format_message(
    post: &Post,
    subscription: &Subscription,
    matched_keywords: &[String],
    site_base_url: &str,
) -> String {
    let mut lines = Vec::new();

    if matched_keywords.is_empty() {
        lines.push("*Keywords:* (any)".to_string());
    } else {
        let keywords: Vec<String> = matched_keywords
            .iter()
            .map(|k| sanitize_markdown(k))
            .collect();
        lines.push(format!("*Keywords:* {}", keywords.join(", ")));
    }
    if let Some(creator) = subscription.creator_filter() {
        lines.push(format!("*Author:* {}", sanitize_markdown(creator)));
    }
    if let Some(category) = subscription.category_filter() {
        lines.push(format!("*Category:* {}", sanitize_markdown(category)));
    }

    lines.push(String::new());
    lines.push(format!(
        "[{}]({})",
        sanitize_markdown(&post.title),
        post_url(site_base_url, post.post_id)
    ));
    if !post.creator.is_empty() {
        lines.push(format!("by {}", sanitize_markdown(&post.creator)));
    }
    if !post.summary.is_empty() {
        lines.push(String::new());
        lines.push(sanitize_markdown(&post.summary));
    }

    lines.join("\n")
}

/// Formats matched posts and hands them to a [`MessageSender`].
pub struct DeliverySink {
    sender: Arc<dyn MessageSender>,
    site_base_url: String,
}

impl DeliverySink {
    pub fn new(sender: Arc<dyn MessageSender>, site_base_url: &str) -> Self {
        Self {
            sender,
            site_base_url: site_base_url.to_string(),
        }
    }

    pub async fn deliver(
        &self,
        destination: &str,
        post: &Post,
        subscription: &Subscription,
        matched_keywords: &[String],
    ) -> bool {
        let text = format_message(post, subscription, matched_keywords, &self.site_base_url);
        let sent = self.sender.send(destination, &text).await;
        if sent {
            tracing::info!(
                "Delivered post {} (subscription {})",
                post.post_id,
                subscription.id
            );
        } else {
            tracing::warn!(
                "Post {} not delivered (subscription {})",
                post.post_id,
                subscription.id
            );
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PushStatus;
    use chrono::Utc;

    fn post(title: &str) -> Post {
        Post {
            post_id: 4242,
            title: title.to_string(),
            summary: "short_summary".to_string(),
            content: String::new(),
            category: "trade".to_string(),
            creator: "alice2024".to_string(),
            pub_date: Utc::now(),
            push_status: PushStatus::MatchedUndelivered,
            matched_subscription_id: Some(1),
            delivered_at: None,
        }
    }

    fn subscription() -> Subscription {
        Subscription {
            id: 1,
            keyword1: Some("RTX".to_string()),
            keyword2: None,
            keyword3: None,
            creator: Some("alice".to_string()),
            category: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn title_brackets_become_lookalikes() {
        assert_eq!(sanitize_markdown("Free (RTX) [deal]"), "Free （RTX） ［deal］");
        assert_eq!(sanitize_markdown("a*b_c`d"), "a∗b＿cˋd");
    }

    #[test]
    fn canonical_url() {
        assert_eq!(
            post_url("https://www.nodeseek.com/", 4242),
            "https://www.nodeseek.com/post-4242-1"
        );
    }

    #[test]
    fn message_layout() {
        let text = format_message(
            &post("Free (RTX) [deal]"),
            &subscription(),
            &["RTX".to_string()],
            "https://www.nodeseek.com",
        );

        assert_eq!(
            text,
            "*Keywords:* RTX\n\
             *Author:* alice\n\
             \n\
             [Free （RTX） ［deal］](https://www.nodeseek.com/post-4242-1)\n\
             by alice2024\n\
             \n\
             short＿summary"
        );
    }

    #[test]
    fn filter_only_rule_says_any() {
        let sub = Subscription {
            keyword1: None,
            category: Some("trade".to_string()),
            ..subscription()
        };
        let text = format_message(&post("t"), &sub, &[], "https://x.test");
        assert!(text.starts_with("*Keywords:* (any)\n*Author:* alice\n*Category:* trade"));
    }
}
