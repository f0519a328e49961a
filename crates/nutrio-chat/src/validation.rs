use crate::error::ValidationError;

pub const MAX_MESSAGE_LENGTH: usize = 1000;

/// Normalizes line endings, strips control characters other than newline and
/// tab, and trims surrounding whitespace.
pub fn sanitize(raw: &str) -> String {
    raw.replace("\r\n", "\n")
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Returns the sanitized content when it is non-empty and within `max`
/// characters.
pub fn validate(raw: &str, max: usize) -> Result<String, ValidationError> {
    let content = sanitize(raw);
    if content.is_empty() {
        return Err(ValidationError::Empty);
    }

    let length = content.chars().count();
    if length > max {
        return Err(ValidationError::TooLong { length, max });
    }

    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(validate(" \n\t ", MAX_MESSAGE_LENGTH), Err(ValidationError::Empty));
        assert_eq!(validate("\u{0007}", MAX_MESSAGE_LENGTH), Err(ValidationError::Empty));
    }

    #[test]
    fn strips_control_characters_but_keeps_newlines() {
        assert_eq!(sanitize("  hi\u{0000} there\r\nfriend  "), "hi there\nfriend");
    }

    #[test]
    fn length_is_counted_in_characters() {
        let exact = "é".repeat(MAX_MESSAGE_LENGTH);
        assert_eq!(validate(&exact, MAX_MESSAGE_LENGTH), Ok(exact.clone()));

        let over = "é".repeat(MAX_MESSAGE_LENGTH + 1);
        assert_eq!(
            validate(&over, MAX_MESSAGE_LENGTH),
            Err(ValidationError::TooLong {
                length: MAX_MESSAGE_LENGTH + 1,
                max: MAX_MESSAGE_LENGTH,
            })
        );
    }
}
