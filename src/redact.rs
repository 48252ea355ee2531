//! Log redaction helpers.
//!
//! Public keys are shortened before they reach a log line. Signatures,
//! payload bytes and handshake tokens never go through here because they are
//! never logged at all.

/// Shorten a public key to `head…tail` (4 + 4 characters).
pub fn short_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 10 {
        return key.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_keys_are_truncated() {
        assert_eq!(
            short_key("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin"),
            "9xQe…VFin"
        );
    }

    #[test]
    fn short_values_pass_through() {
        assert_eq!(short_key("PKaaa"), "PKaaa");
    }
}
