use regex::{Regex, RegexBuilder};

/// A keyword slot, resolved once when subscriptions are loaded.
#[derive(Debug, Clone)]
pub enum Keyword {
    /// Case-insensitive substring. `needle` is already lowercased.
    Literal { text: String, needle: String },
    Pattern { regex: Regex, text: String },
}

impl Keyword {
    /// Recognizes `/pattern/flags` and `regex:pattern`; anything else, and
    /// any directive that fails to compile, is a literal.
    pub fn parse(raw: &str) -> Self {
        let text = raw.trim();
        let Some((pattern, flags)) = split_directive(text) else {
            return Self::literal(text);
        };

        match build_regex(pattern, flags) {
            Ok(regex) => Keyword::Pattern {
                regex,
                text: text.to_string(),
            },
            Err(e) => {
                // Reported once when the subscription is added.
                tracing::debug!(
                    "Invalid regex keyword {:?}, matching it literally: {}",
                    text,
                    e
                );
                Self::literal(text)
            }
        }
    }

    /// Why a regex directive cannot compile, if `raw` is one that fails.
    pub fn directive_error(raw: &str) -> Option<regex::Error> {
        let (pattern, flags) = split_directive(raw.trim())?;
        build_regex(pattern, flags).err()
    }

    fn literal(text: &str) -> Self {
        Keyword::Literal {
            text: text.to_string(),
            needle: text.to_lowercase(),
        }
    }

    /// The keyword as the user wrote it.
    pub fn text(&self) -> &str {
        match self {
            Keyword::Literal { text, .. } | Keyword::Pattern { text, .. } => text,
        }
    }

    /// `haystack_lower` must be the lowercased form of `haystack`.
    pub fn is_match(&self, haystack: &str, haystack_lower: &str) -> bool {
        match self {
            Keyword::Literal { needle, .. } => haystack_lower.contains(needle.as_str()),
            Keyword::Pattern { regex, .. } => regex.is_match(haystack),
        }
    }
}

fn split_directive(text: &str) -> Option<(&str, &str)> {
    if let Some(pattern) = text.strip_prefix("regex:") {
        return Some((pattern, ""));
    }

    let body = text.strip_prefix('/')?;
    let close = body.rfind('/')?;
    let (pattern, flags) = (&body[..close], &body[close + 1..]);
    if pattern.is_empty() || !flags.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    Some((pattern, flags))
}

fn build_regex(pattern: &str, flags: &str) -> std::result::Result<Regex, regex::Error> {
    let mut builder = RegexBuilder::new(pattern);
    // No flags means case-insensitive; explicit flags are taken as given.
    builder.case_insensitive(flags.is_empty() || flags.contains('i'));
    builder.multi_line(flags.contains('m'));
    builder.dot_matches_new_line(flags.contains('s'));
    builder.ignore_whitespace(flags.contains('x'));
    builder.build()
}
