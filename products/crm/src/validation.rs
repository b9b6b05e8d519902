use crate::error::{CrmResult, ValidationError};

pub const TITLE_MAX: usize = 256;

/// Trims a title and enforces presence and length.
pub fn validate_title(value: &str) -> CrmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::TitleRequired.into());
    }
    validate_length("title", trimmed, TITLE_MAX)?;
    Ok(trimmed.to_string())
}

pub fn validate_length(field: &'static str, value: &str, max: usize) -> CrmResult<()> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max }.into());
    }
    Ok(())
}

/// Blank optional strings are stored as absent.
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|inner| inner.trim().to_string())
        .filter(|inner| !inner.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn titles_are_trimmed_and_bounded() {
        assert_eq!(validate_title("  Buy ink ").unwrap(), "Buy ink");
        assert_eq!(
            validate_title(" ").unwrap_err().as_validation(),
            Some(&ValidationError::TitleRequired)
        );
        let long = "x".repeat(TITLE_MAX + 1);
        assert_eq!(
            validate_title(&long).unwrap_err().as_validation(),
            Some(&ValidationError::TooLong {
                field: "title",
                max: TITLE_MAX
            })
        );
    }

    #[test]
    fn blank_optionals_collapse() {
        assert_eq!(normalize_optional(Some("  ".into())), None);
        assert_eq!(normalize_optional(Some(" a ".into())), Some("a".into()));
    }
}
