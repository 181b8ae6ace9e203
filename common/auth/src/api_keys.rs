use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand_core::{OsRng, RngCore};

pub const API_KEY_PREFIX: &str = "bgs_";

const API_KEY_ENTROPY_BYTES: usize = 32;

/// Generate a project API key: `bgs_` + 32 bytes of CSPRNG entropy,
/// base64url without padding.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_ENTROPY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Cheap shape check before hitting the database. Exact matching against
/// `projects.api_key` stays the source of truth.
pub fn looks_like_api_key(value: &str) -> bool {
    let Some(rest) = value.strip_prefix(API_KEY_PREFIX) else {
        return false;
    };
    rest.len() >= 32
        && rest
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_prefix_and_entropy() {
        let key = generate_api_key();
        assert!(key.starts_with("bgs_"));
        // 32 bytes base64url without padding is 43 characters.
        assert_eq!(key.len(), 4 + 43);
        assert!(looks_like_api_key(&key));
    }

    #[test]
    fn generated_keys_are_unique() {
        assert_ne!(generate_api_key(), generate_api_key());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!looks_like_api_key("sk_live_abc"));
        assert!(!looks_like_api_key("bgs_short"));
        assert!(!looks_like_api_key("bgs_with spaces and $ymbols aaaaaaaaaaaaaa"));
    }
}
