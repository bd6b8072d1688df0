//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted team name, in characters.
pub const MAX_TEAM_NAME_CHARS: usize = 64;

/// Validates that a team name has visible characters and fits on the boards.
///
/// # Examples
///
/// ```ignore
/// validate_team_name("Byte Me")  // Ok
/// validate_team_name("   ")      // Err - blank
/// ```
pub fn validate_team_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("team_name_blank");
        err.message = Some("Team name must not be blank".into());
        return Err(err);
    }

    let length = trimmed.chars().count();
    if length > MAX_TEAM_NAME_CHARS {
        let mut err = ValidationError::new("team_name_length");
        err.message = Some(
            format!("Team name must be at most {MAX_TEAM_NAME_CHARS} characters (got {length})")
                .into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Validates that an evidence link is an http(s) URL without embedded whitespace.
pub fn validate_evidence_url(url: &str) -> Result<(), ValidationError> {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));

    match rest {
        Some(rest) if !rest.is_empty() && !rest.chars().any(char::is_whitespace) => Ok(()),
        _ => {
            let mut err = ValidationError::new("evidence_url");
            err.message = Some("Submission link must be an http(s) URL".into());
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_team_name_valid() {
        assert!(validate_team_name("Byte Me").is_ok());
        assert!(validate_team_name("  padded  ").is_ok());
        assert!(validate_team_name(&"x".repeat(MAX_TEAM_NAME_CHARS)).is_ok());
    }

    #[test]
    fn test_validate_team_name_invalid() {
        assert!(validate_team_name("").is_err());
        assert!(validate_team_name(" \t ").is_err());
        assert!(validate_team_name(&"x".repeat(MAX_TEAM_NAME_CHARS + 1)).is_err());
    }

    #[test]
    fn test_validate_evidence_url() {
        assert!(validate_evidence_url("https://github.com/team/repo").is_ok());
        assert!(validate_evidence_url("http://localhost:3000").is_ok());
        assert!(validate_evidence_url("ftp://example.com").is_err());
        assert!(validate_evidence_url("https://").is_err());
        assert!(validate_evidence_url("https://exa mple.com").is_err());
        assert!(validate_evidence_url("not a url").is_err());
    }
}
