pub mod api;
pub mod events;
pub mod models;

use std::time::Duration;

/// How long a board stays active before any participant may expire it.
pub const DEFAULT_BOARD_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Upper bound on item content, in characters, after trimming.
pub const MAX_CONTENT_LEN: usize = 1000;

/// Trim note content and check it is storable. Returns the trimmed text or
/// a human-readable reason.
pub fn normalize_content(raw: &str) -> Result<String, String> {
    let content = raw.trim();
    if content.is_empty() {
        return Err("note content cannot be empty".into());
    }
    let len = content.chars().count();
    if len > MAX_CONTENT_LEN {
        return Err(format!(
            "note content is {} characters, the limit is {}",
            len, MAX_CONTENT_LEN
        ));
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_bounds_content() {
        assert_eq!(normalize_content("  Great sprint!\n").unwrap(), "Great sprint!");
        assert!(normalize_content("   ").is_err());
        assert!(normalize_content(&"x".repeat(MAX_CONTENT_LEN)).is_ok());
        assert!(normalize_content(&"x".repeat(MAX_CONTENT_LEN + 1)).is_err());
    }
}
