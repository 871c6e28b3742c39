//! Content hashing and storage key construction.

use chrono::{DateTime, Datelike, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

const MAX_BASE_NAME_LEN: usize = 50;

/// Calculate SHA256 hash of file content
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Reduce a caller-supplied filename to a safe, readable key fragment.
///
/// The extension is dropped; the stored extension always comes from the
/// detected content type.
pub fn sanitize_base_name(filename: &str) -> String {
    // Browsers on Windows may send a full path
    let file_name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let stem = match file_name.rfind('.') {
        Some(idx) if idx > 0 => &file_name[..idx],
        _ => file_name,
    };

    let mut out = String::with_capacity(stem.len());
    let mut pending_dash = false;
    for ch in stem.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if out.len() > MAX_BASE_NAME_LEN {
        out.truncate(MAX_BASE_NAME_LEN);
    }
    let trimmed = out.trim_matches('-');

    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Slug for a collection name.
pub fn slugify(name: &str) -> String {
    let slug = sanitize_base_name(&format!("{}.x", name)).replace('_', "-");
    if slug == "file" && !name.to_ascii_lowercase().contains("file") {
        "collection".to_string()
    } else {
        slug
    }
}

/// Directory an asset of `collection_id` lives in, for the given owner scope.
pub fn collection_dir(owner_scope: &str, collection_id: Uuid, at: DateTime<Utc>) -> String {
    format!(
        "{}/galleries/{}/{:04}/{:02}",
        owner_scope,
        collection_id,
        at.year(),
        at.month()
    )
}

/// Unique file name for a stored original.
pub fn storage_file_name(original_filename: &str, hash: &str, extension: &str, at: DateTime<Utc>) -> String {
    let short_hash = hash.get(..8).unwrap_or(hash);
    format!(
        "{}-{}-{}.{}",
        sanitize_base_name(original_filename),
        at.timestamp_millis(),
        short_hash,
        extension
    )
}

/// Full backend-relative key for a stored original.
pub fn storage_key(
    owner_scope: &str,
    collection_id: Uuid,
    original_filename: &str,
    hash: &str,
    extension: &str,
    at: DateTime<Utc>,
) -> String {
    format!(
        "{}/{}",
        collection_dir(owner_scope, collection_id, at),
        storage_file_name(original_filename, hash, extension, at)
    )
}

/// Key of a derivative stored next to `original_key`.
pub fn derivative_key(original_key: &str, size_class: &str, extension: &str) -> String {
    let (dir, file) = match original_key.rsplit_once('/') {
        Some((dir, file)) => (Some(dir), file),
        None => (None, original_key),
    };
    let stem = match file.rfind('.') {
        Some(idx) if idx > 0 => &file[..idx],
        _ => file,
    };
    match dir {
        Some(dir) => format!("{}/{}_{}.{}", dir, stem, size_class, extension),
        None => format!("{}_{}.{}", stem, size_class, extension),
    }
}
