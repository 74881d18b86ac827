//! Domain ID generation and resolution
//!
//! All IDs use the format: `{8-char-hex}-{type}-{slug}`
//! Example: `3f9a21c0-task-daily-sync`

/// Generate a domain ID from type and title
///
/// The hex part comes from the random tail of a v7 UUID, so two tasks with
/// the same name created in the same millisecond still get distinct IDs.
pub fn generate_id(domain_type: &str, title: &str) -> String {
    let uuid = uuid::Uuid::now_v7().simple().to_string();
    let hex = &uuid[uuid.len() - 8..];
    let slug = slugify(title);
    if slug.is_empty() {
        format!("{}-{}", hex, domain_type)
    } else {
        format!("{}-{}-{}", hex, domain_type, slug)
    }
}

/// Slugify a title for use in IDs
fn slugify(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        // Strip apostrophes entirely, replace other non-alphanumeric with hyphens
        .filter_map(|c| {
            if c.is_alphanumeric() {
                Some(c)
            } else if c == '\'' || c == '\u{2019}' || c == '\u{2018}' {
                None
            } else {
                Some('-')
            }
        })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Resolve a partial reference against known IDs
///
/// Matches exactly, by prefix, or by a substring of the part after the hex.
/// Returns:
/// - Ok(Some(id)) if exactly one match (or an exact match)
/// - Ok(None) if no matches
/// - Err with candidates if ambiguous
pub fn resolve_id<'a>(ids: impl IntoIterator<Item = &'a str>, reference: &str) -> Result<Option<String>, Vec<String>> {
    let mut matches = Vec::new();
    for id in ids {
        if id == reference {
            return Ok(Some(id.to_string()));
        }
        let after_hex = id.split_once('-').map(|(_, rest)| rest).unwrap_or("");
        if id.starts_with(reference) || after_hex.contains(reference) {
            matches.push(id.to_string());
        }
    }

    match matches.len() {
        0 => Ok(None),
        1 => Ok(matches.pop()),
        _ => Err(matches),
    }
}
