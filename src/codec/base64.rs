// ABOUTME: Conservative detection of base64-encoded text in structured artifacts
// ABOUTME: Only accepts decodes that yield printable text, timestamps or emails

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

static BASE64_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("valid base64 regex"));

static TIMESTAMP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}").expect("valid timestamp regex")
});

static EMAIL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

fn is_printable_ascii(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .all(|&b| (0x20..=0x7e).contains(&b) || matches!(b, b'\t' | b'\n' | b'\r'))
}

/// Try to undo base64 encoding applied to a text column at the source.
///
/// The structured format does not record which columns were base64 encoded,
/// so this guesses from content. A string is decoded only if it is made of
/// the standard base64 alphabet with valid padding, and the result is kept
/// only if it differs from the input and is printable ASCII, starts with a
/// timestamp, or looks like an email address. Anything else returns `None`
/// and the caller keeps the original string.
///
/// The guess cannot tell an encoded column from a value that merely looks
/// encoded. A text column holding `dGVzdA==` is read back as `test`.
///
/// # Examples
///
/// ```
/// # use seren_snapshot::codec::base64::decode_base64_text;
/// assert_eq!(
///     decode_base64_text("MjAyNC0wMS0wMiAwMzowNDowNQ=="),
///     Some("2024-01-02 03:04:05".to_string())
/// );
/// assert_eq!(decode_base64_text("hello world"), None);
/// ```
pub fn decode_base64_text(candidate: &str) -> Option<String> {
    if candidate.len() % 4 != 0 || !BASE64_CANDIDATE.is_match(candidate) {
        return None;
    }

    let decoded = STANDARD.decode(candidate).ok()?;
    let text = String::from_utf8(decoded).ok()?;

    if text == candidate {
        return None;
    }

    if is_printable_ascii(text.as_bytes())
        || TIMESTAMP_PATTERN.is_match(&text)
        || EMAIL_PATTERN.is_match(&text)
    {
        Some(text)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_never_altered() {
        for text in ["hello world", "Alice", "", "user_events", "42", "2024-01-02 03:04:05"] {
            assert_eq!(decode_base64_text(text), None, "'{}' must stay as is", text);
        }
    }

    #[test]
    fn test_base64_timestamp_is_decoded() {
        let encoded = STANDARD.encode("2024-01-02 03:04:05");
        assert_eq!(
            decode_base64_text(&encoded).as_deref(),
            Some("2024-01-02 03:04:05")
        );
    }

    #[test]
    fn test_base64_email_and_text_are_decoded() {
        let email = STANDARD.encode("ops@example.com");
        assert_eq!(decode_base64_text(&email).as_deref(), Some("ops@example.com"));
        let text = STANDARD.encode("Hello, World");
        assert_eq!(decode_base64_text(&text).as_deref(), Some("Hello, World"));
    }

    #[test]
    fn test_binary_payload_is_kept_encoded() {
        let encoded = STANDARD.encode([0xffu8, 0xfe, 0x00, 0x10]);
        assert_eq!(decode_base64_text(&encoded), None);
    }

    #[test]
    fn test_words_in_base64_alphabet_stay_text() {
        // Valid base64 but the decoded bytes are not printable
        for word in ["Test", "true", "abcd", "password", "1234"] {
            assert_eq!(decode_base64_text(word), None, "'{}' must stay as is", word);
        }
    }

    #[test]
    fn test_text_that_happens_to_be_base64_is_decoded() {
        assert_eq!(decode_base64_text("dGVzdA==").as_deref(), Some("test"));
    }

    #[test]
    fn test_bad_padding_is_rejected() {
        assert_eq!(decode_base64_text("abc"), None);
        assert_eq!(decode_base64_text("ab=c"), None);
        assert_eq!(decode_base64_text("a==="), None);
    }
}
