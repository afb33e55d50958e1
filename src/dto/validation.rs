//! Validation helpers for DTOs.

use validator::ValidationError;

use crate::state::join_code::{JOIN_CODE_ALPHABET, normalize};

/// Longest nickname accepted, in characters.
pub const NICKNAME_MAX_CHARS: usize = 24;

/// Validates that a join code only uses the join-code alphabet (case-insensitive).
///
/// # Examples
///
/// ```ignore
/// validate_join_code("ABC234") // Ok
/// validate_join_code("abc234") // Ok - normalized before lookup
/// validate_join_code("ABC0O4") // Err - `0` and `O` are not in the alphabet
/// ```
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    let code = normalize(code);
    if !(4..=12).contains(&code.len()) {
        let mut err = ValidationError::new("join_code_length");
        err.message = Some(
            format!(
                "Join code must be between 4 and 12 characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.bytes().all(|b| JOIN_CODE_ALPHABET.contains(&b)) {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code contains characters outside the join-code alphabet".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a nickname is non-blank, short and free of control characters.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    let trimmed = nickname.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("nickname_blank");
        err.message = Some("Nickname must not be blank".into());
        return Err(err);
    }

    let chars = trimmed.chars().count();
    if chars > NICKNAME_MAX_CHARS {
        let mut err = ValidationError::new("nickname_length");
        err.message = Some(
            format!("Nickname must be at most {NICKNAME_MAX_CHARS} characters (got {chars})").into(),
        );
        return Err(err);
    }

    if trimmed.chars().any(char::is_control) {
        let mut err = ValidationError::new("nickname_format");
        err.message = Some("Nickname must not contain control characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_join_code_valid() {
        assert!(validate_join_code("ABC234").is_ok());
        assert!(validate_join_code("abc234").is_ok());
        assert!(validate_join_code("  XYZ999 ").is_ok());
    }

    #[test]
    fn test_validate_join_code_invalid_length() {
        assert!(validate_join_code("AB2").is_err());
        assert!(validate_join_code("ABCDEFGHJKLMN").is_err());
        assert!(validate_join_code("").is_err());
    }

    #[test]
    fn test_validate_join_code_ambiguous_characters() {
        assert!(validate_join_code("ABC0O4").is_err()); // zero and O
        assert!(validate_join_code("ABCI12").is_err()); // I
        assert!(validate_join_code("ABC-12").is_err());
    }

    #[test]
    fn test_validate_nickname() {
        assert!(validate_nickname("Ada").is_ok());
        assert!(validate_nickname("  Ada  ").is_ok());
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname(&"x".repeat(NICKNAME_MAX_CHARS + 1)).is_err());
        assert!(validate_nickname("Ad\u{7}a").is_err());
    }
}
