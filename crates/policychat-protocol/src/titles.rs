//! Title rules shared by server-side validation and client-side pre-checks.

use std::fmt;

/// Upper bound on a session title, in characters.
pub const MAX_TITLE_CHARS: usize = 200;

/// Length of a title derived from the first user message, in characters.
pub const DERIVED_TITLE_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleError {
    Empty,
    TooLong { max: usize },
}

impl fmt::Display for TitleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("title must not be empty"),
            Self::TooLong { max } => write!(f, "title must be at most {max} characters"),
        }
    }
}

impl std::error::Error for TitleError {}

/// Validate a user-supplied title and return its trimmed form.
pub fn validate_title(raw: &str) -> Result<String, TitleError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TitleError::Empty);
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(TitleError::TooLong {
            max: MAX_TITLE_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Derive a title from the first user message of a conversation.
///
/// Uses the first non-blank line with whitespace collapsed. Returns `None` for
/// messages with no visible text.
pub fn derive_title(message: &str) -> Option<String> {
    let line = message.lines().map(str::trim).find(|l| !l.is_empty())?;
    let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= DERIVED_TITLE_CHARS {
        return Some(collapsed);
    }

    let mut title: String = collapsed.chars().take(DERIVED_TITLE_CHARS - 1).collect();
    title.truncate(title.trim_end().len());
    title.push('…');
    Some(title)
}
