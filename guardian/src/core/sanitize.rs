//! Test file naming: subject name to a stable, filesystem-safe file name.

use std::collections::HashMap;

/// Prefix for every generated test file.
pub const TEST_FILE_PREFIX: &str = "test_";

/// Map every character outside `[A-Za-z0-9]` to `_` and lower-case the rest.
///
/// Works per `char`, so a multi-byte character becomes a single `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// `test_<sanitized>.<extension>`
pub fn test_file_name(subject_name: &str, extension: &str) -> String {
    format!(
        "{TEST_FILE_PREFIX}{}.{}",
        sanitize_name(subject_name),
        extension.trim_start_matches('.')
    )
}

/// For each name, the earlier name it collides with after sanitization.
///
/// The first owner of a sanitized name keeps it; later names map to
/// `Some(first_owner)`.
pub fn find_collisions<'a>(names: &[&'a str]) -> Vec<Option<&'a str>> {
    let mut owners: HashMap<String, &'a str> = HashMap::new();
    names
        .iter()
        .map(|name| {
            let key = sanitize_name(name);
            match owners.get(&key) {
                Some(owner) => Some(*owner),
                None => {
                    owners.insert(key, name);
                    None
                }
            }
        })
        .collect()
}
