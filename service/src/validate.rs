//! Input rules applied before anything reaches the store.
//!
//! Each function returns the cleaned value (trimmed, and lower-cased for
//! emails) or a `Validation` error naming the field.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{TourError, TourResult};

pub const NAME_MIN: usize = 2;
pub const NAME_MAX: usize = 100;
pub const EMAIL_MAX: usize = 100;
pub const DESCRIPTION_MAX: usize = 1000;

const EMAIL_PATTERN: &str = r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("email pattern is a valid regex"))
}

fn check_length(field: &'static str, value: &str, min: usize, max: usize) -> TourResult<()> {
    let len = value.chars().count();
    if len < min {
        return Err(TourError::validation(
            field,
            if min <= 1 {
                "must not be empty".to_string()
            } else {
                format!("must be at least {min} characters")
            },
        ));
    }
    if len > max {
        return Err(TourError::validation(
            field,
            format!("must be at most {max} characters"),
        ));
    }
    Ok(())
}

/// Person name: letters, spaces, hyphens and apostrophes.
pub fn user_name(name: &str) -> TourResult<String> {
    let name = name.trim();
    check_length("name", name, NAME_MIN, NAME_MAX)?;
    if !name
        .chars()
        .all(|c| c.is_alphabetic() || c.is_whitespace() || c == '-' || c == '\'')
    {
        return Err(TourError::validation("name", "contains invalid characters"));
    }
    Ok(name.to_string())
}

pub fn email(email: &str) -> TourResult<String> {
    let email = email.trim();
    if email.is_empty() {
        return Err(TourError::validation("email", "must not be empty"));
    }
    if !email_regex().is_match(email) {
        return Err(TourError::validation("email", "invalid format"));
    }
    check_length("email", email, 1, EMAIL_MAX)?;
    Ok(email.to_lowercase())
}

pub fn credential_hash(hash: &str) -> TourResult<()> {
    if hash.is_empty() {
        return Err(TourError::validation("credential_hash", "must not be empty"));
    }
    Ok(())
}

pub fn route_name(name: &str) -> TourResult<String> {
    let name = name.trim();
    check_length("route name", name, NAME_MIN, NAME_MAX)?;
    Ok(name.to_string())
}

pub fn stop_name(name: &str) -> TourResult<String> {
    let name = name.trim();
    check_length("stop name", name, 1, NAME_MAX)?;
    Ok(name.to_string())
}

/// Optional free text. Blank collapses to None.
pub fn description(description: Option<&str>) -> TourResult<Option<String>> {
    let Some(text) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    check_length("description", text, 0, DESCRIPTION_MAX)?;
    Ok(Some(text.to_string()))
}
