//! Security utilities for storage keys and public tokens

use anyhow::Result;
use rand::Rng;
use std::path::{Component, Path};
use tracing::warn;

/// Length of a public asset token.
pub const PUBLIC_TOKEN_LENGTH: usize = 32;

const TOKEN_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ\
                               abcdefghijklmnopqrstuvwxyz\
                               0123456789";

/// Validate a backend-relative storage key before it touches any backend.
///
/// Keys are `/`-separated, relative, and may not contain traversal
/// components, backslashes, NUL or other control characters.
pub fn validate_storage_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(anyhow::anyhow!("Storage key cannot be empty"));
    }

    if key.len() > 1024 {
        return Err(anyhow::anyhow!("Storage key too long (max 1024 characters)"));
    }

    if key.contains('\0') || key.contains('\\') {
        return Err(anyhow::anyhow!("Storage key contains forbidden characters"));
    }

    if key.chars().any(|ch| ch.is_control()) {
        return Err(anyhow::anyhow!("Storage key contains control characters"));
    }

    if key.starts_with('/') {
        return Err(anyhow::anyhow!("Storage key must be relative"));
    }

    for segment in key.split('/') {
        if segment.is_empty() || segment == "." {
            return Err(anyhow::anyhow!("Storage key contains empty segments"));
        }
    }

    for component in Path::new(key).components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => {
                warn!("Path traversal attempt detected in storage key: {}", key);
                return Err(anyhow::anyhow!("Path traversal not allowed"));
            }
            _ => return Err(anyhow::anyhow!("Storage key must be relative")),
        }
    }

    Ok(())
}

/// Generate an unguessable public token for an asset.
pub fn generate_public_token() -> String {
    let mut rng = rand::thread_rng();

    (0..PUBLIC_TOKEN_LENGTH)
        .map(|_| {
            let idx = rng.gen_range(0..TOKEN_CHARSET.len());
            TOKEN_CHARSET[idx] as char
        })
        .collect()
}

/// Shape check for an incoming token; anything else is rejected before a lookup.
pub fn is_valid_public_token(token: &str) -> bool {
    token.len() == PUBLIC_TOKEN_LENGTH && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_validate_storage_key() {
        // Valid keys
        assert!(validate_storage_key("global/galleries/abc/2024/06/photo.jpg").is_ok());
        assert!(validate_storage_key("tenant_7/galleries/x/2024/01/a-b_c.png").is_ok());

        // Invalid keys
        assert!(validate_storage_key("").is_err());
        assert!(validate_storage_key("/etc/passwd").is_err());
        assert!(validate_storage_key("global/../../etc/passwd").is_err());
        assert!(validate_storage_key("global//photo.jpg").is_err());
        assert!(validate_storage_key("global/./photo.jpg").is_err());
        assert!(validate_storage_key("global\\photo.jpg").is_err());
        assert!(validate_storage_key("global/pho\0to.jpg").is_err());
    }

    #[test]
    fn test_generate_public_token_shape() {
        let token = generate_public_token();
        assert_eq!(token.len(), PUBLIC_TOKEN_LENGTH);
        assert!(is_valid_public_token(&token));
    }

    #[test]
    fn test_generate_public_token_uniqueness() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate_public_token()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_is_valid_public_token() {
        assert!(!is_valid_public_token(""));
        assert!(!is_valid_public_token("short"));
        assert!(!is_valid_public_token(&"a".repeat(31)));
        assert!(!is_valid_public_token(&format!("{}!", "a".repeat(31))));
        assert!(is_valid_public_token(&"aB3x".repeat(8)));
    }
}
