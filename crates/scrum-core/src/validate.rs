//! Field-level validation and free-text sanitization shared by all services.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Result, ScrumError};

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_TEXT_LEN: usize = 100_000;

static CONTROL_RE: OnceLock<Regex> = OnceLock::new();
static LABEL_RE: OnceLock<Regex> = OnceLock::new();

fn control_re() -> &'static Regex {
    CONTROL_RE.get_or_init(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F]").unwrap())
}

fn label_re() -> &'static Regex {
    LABEL_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9_\-]*$").unwrap())
}

/// Remove control characters (newlines and tabs survive) and trim.
pub fn sanitize(s: &str) -> String {
    control_re().replace_all(s, "").trim().to_string()
}

/// A one-line title: sanitized, newlines folded into spaces, non-empty.
pub fn title(field: &str, raw: &str) -> Result<String> {
    let clean = sanitize(raw).replace(['\n', '\r', '\t'], " ");
    if clean.is_empty() {
        return Err(ScrumError::MissingField(field.to_string()));
    }
    if clean.chars().count() > MAX_TITLE_LEN {
        return Err(ScrumError::invalid(
            field,
            format!("must be at most {MAX_TITLE_LEN} characters"),
        ));
    }
    Ok(clean)
}

/// Optional free text. Blank input collapses to `None`.
pub fn text(field: &str, raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let clean = sanitize(raw);
    if clean.is_empty() {
        return Ok(None);
    }
    if clean.chars().count() > MAX_TEXT_LEN {
        return Err(ScrumError::invalid(
            field,
            format!("must be at most {MAX_TEXT_LEN} characters"),
        ));
    }
    Ok(Some(clean))
}

/// Free text in an update. `None` leaves the field alone, blank input
/// clears it (`Some(None)`), anything else replaces it.
pub fn edit(field: &str, raw: Option<&str>) -> Result<Option<Option<String>>> {
    match raw {
        None => Ok(None),
        Some(raw) => text(field, Some(raw)).map(Some),
    }
}

/// Lowercase label such as a document type (`prd`, `tech-spec`).
pub fn label(field: &str, raw: &str) -> Result<String> {
    let clean = sanitize(raw).to_ascii_lowercase().replace(' ', "-");
    if clean.is_empty() {
        return Err(ScrumError::MissingField(field.to_string()));
    }
    if !label_re().is_match(&clean) {
        return Err(ScrumError::invalid(
            field,
            "must be lowercase letters, digits, '-' or '_'",
        ));
    }
    Ok(clean)
}

pub fn positive(field: &str, n: i64) -> Result<i64> {
    if n < 1 {
        return Err(ScrumError::invalid(field, "must be a positive integer"));
    }
    Ok(n)
}

pub fn effort(field: &str, hours: Option<f64>) -> Result<Option<f64>> {
    match hours {
        Some(h) if !h.is_finite() || h < 0.0 => {
            Err(ScrumError::invalid(field, "must be a non-negative number"))
        }
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_control_chars_but_keeps_newlines() {
        assert_eq!(sanitize("  a\u{0007}b\nc\t "), "ab\nc");
    }

    #[test]
    fn title_folds_newlines_and_rejects_blank() {
        assert_eq!(title("title", "Login\nflow").unwrap(), "Login flow");
        assert!(matches!(
            title("title", " \u{0001} "),
            Err(ScrumError::MissingField(_))
        ));
        assert!(title("title", &"x".repeat(MAX_TITLE_LEN + 1)).is_err());
    }

    #[test]
    fn text_blank_is_none() {
        assert_eq!(text("description", Some("   ")).unwrap(), None);
        assert_eq!(text("description", None).unwrap(), None);
        assert_eq!(
            text("description", Some(" body ")).unwrap().as_deref(),
            Some("body")
        );
    }

    #[test]
    fn edit_distinguishes_absent_from_cleared() {
        assert_eq!(edit("description", None).unwrap(), None);
        assert_eq!(edit("description", Some("")).unwrap(), Some(None));
        assert_eq!(
            edit("description", Some(" new ")).unwrap(),
            Some(Some("new".to_string()))
        );
    }

    #[test]
    fn label_normalises_case_and_spaces() {
        assert_eq!(label("type", "Tech Spec").unwrap(), "tech-spec");
        assert!(label("type", "!!").is_err());
    }

    #[test]
    fn effort_rejects_negative_and_nan() {
        assert!(effort("estimated_hours", Some(-1.0)).is_err());
        assert!(effort("estimated_hours", Some(f64::NAN)).is_err());
        assert_eq!(effort("estimated_hours", Some(2.5)).unwrap(), Some(2.5));
    }
}
