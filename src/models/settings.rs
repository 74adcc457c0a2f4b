use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single `settings` row, read once per sweep and passed down by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingsSnapshot {
    pub only_title: bool,
    pub stop_push: bool,
    pub bound_chat_id: Option<String>,
    pub bot_token: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SettingsSnapshot {
    /// Destination and credential, when both are configured.
    pub fn delivery_target(&self) -> Option<(&str, &str)> {
        let chat = self.bound_chat_id.as_deref().filter(|s| !s.is_empty())?;
        let token = self.bot_token.as_deref().filter(|s| !s.is_empty())?;
        Some((chat, token))
    }

    pub fn masked_token(&self) -> String {
        match self.bot_token.as_deref() {
            None | Some("") => "(not set)".to_string(),
            Some(token) => {
                let visible: String = token.chars().take(6).collect();
                format!("{}…", visible)
            }
        }
    }
}

/// Partial update from the admin surface. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub only_title: Option<bool>,
    pub stop_push: Option<bool>,
    pub bound_chat_id: Option<Option<String>>,
    pub bot_token: Option<Option<String>>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.only_title.is_none()
            && self.stop_push.is_none()
            && self.bound_chat_id.is_none()
            && self.bot_token.is_none()
    }

    pub fn apply(&self, mut settings: SettingsSnapshot) -> SettingsSnapshot {
        if let Some(v) = self.only_title {
            settings.only_title = v;
        }
        if let Some(v) = self.stop_push {
            settings.stop_push = v;
        }
        if let Some(v) = &self.bound_chat_id {
            settings.bound_chat_id = v.clone();
        }
        if let Some(v) = &self.bot_token {
            settings.bot_token = v.clone();
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_target_needs_chat_and_token() {
        let mut settings = SettingsSnapshot {
            bound_chat_id: Some("42".to_string()),
            ..Default::default()
        };
        assert!(settings.delivery_target().is_none());

        settings.bot_token = Some("123:abc".to_string());
        assert_eq!(settings.delivery_target(), Some(("42", "123:abc")));

        settings.bound_chat_id = Some(String::new());
        assert!(settings.delivery_target().is_none());
    }

    #[test]
    fn token_is_masked() {
        let settings = SettingsSnapshot {
            bot_token: Some("123456:secret".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.masked_token(), "123456…");
        assert_eq!(SettingsSnapshot::default().masked_token(), "(not set)");
    }

    #[test]
    fn update_applies_only_given_fields() {
        let base = SettingsSnapshot {
            only_title: true,
            bound_chat_id: Some("1".to_string()),
            ..Default::default()
        };
        let update = SettingsUpdate {
            stop_push: Some(true),
            bound_chat_id: Some(None),
            ..Default::default()
        };

        let next = update.apply(base);

        assert!(next.only_title);
        assert!(next.stop_push);
        assert!(next.bound_chat_id.is_none());
        assert!(SettingsUpdate::default().is_empty());
        assert_eq!(SettingsUpdate::default().apply(next.clone()), next);
    }
}
