//! Identifier normalization and validation.
//!
//! Tenant, route, connector and plan ids all share one character class so
//! that a single validator can be reused at every store entry point,
//! including restore-from-snapshot, where unnormalized ids must not be
//! allowed to smuggle themselves back in.

const MAX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier exceeds {MAX_LEN} characters")]
    TooLong,
    #[error("identifier '{0}' contains characters outside [A-Za-z0-9_-] or starts with one")]
    InvalidCharacters(String),
}

/// Validates an identifier against `^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$`.
///
/// Does not trim; callers that accept externally-supplied strings should go
/// through [`normalize_identifier`] instead.
pub fn validate_identifier(id: &str) -> Result<(), IdentifierError> {
    let mut chars = id.chars();
    let first = chars.next().ok_or(IdentifierError::Empty)?;
    if !first.is_ascii_alphanumeric() {
        return Err(IdentifierError::InvalidCharacters(id.to_string()));
    }
    if id.len() > MAX_LEN {
        return Err(IdentifierError::TooLong);
    }
    for c in chars {
        if !(c.is_ascii_alphanumeric() || c == '_' || c == '-') {
            return Err(IdentifierError::InvalidCharacters(id.to_string()));
        }
    }
    Ok(())
}

/// Trims surrounding whitespace, then validates. This is the entry point
/// every store (`RuleStore`, `ConnectorStore`, `PlanStore`) should use for
/// caller-supplied ids, including during persistence restore.
pub fn normalize_identifier(id: &str) -> Result<String, IdentifierError> {
    let trimmed = id.trim();
    validate_identifier(trimmed)?;
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_simple_ids() {
        assert!(validate_identifier("default").is_ok());
        assert!(validate_identifier("team-a").is_ok());
        assert!(validate_identifier("conn_1").is_ok());
        assert!(validate_identifier("A1").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(validate_identifier(""), Err(IdentifierError::Empty));
    }

    #[test]
    fn rejects_leading_punctuation() {
        assert!(matches!(
            validate_identifier("-team"),
            Err(IdentifierError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(matches!(
            validate_identifier("team a"),
            Err(IdentifierError::InvalidCharacters(_))
        ));
        assert!(matches!(
            validate_identifier("team/a"),
            Err(IdentifierError::InvalidCharacters(_))
        ));
    }

    #[test]
    fn rejects_too_long() {
        let long = "a".repeat(65);
        assert_eq!(validate_identifier(&long), Err(IdentifierError::TooLong));
    }

    #[test]
    fn normalize_trims_whitespace() {
        assert_eq!(normalize_identifier("  team-a  ").unwrap(), "team-a");
    }
}
