//! Subject key validation

use crate::error::CoreError;
use mentorboard_types::{SubjectKey, SubjectType};
use once_cell::sync::Lazy;
use regex::Regex;

/// Subject ids are opaque but bounded: they end up in SQL keys, URLs and logs
static SUBJECT_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_.:@-]{1,128}$").expect("subject id pattern is valid")
});

pub fn validate_key(key: &SubjectKey) -> Result<(), CoreError> {
    if SUBJECT_ID.is_match(&key.subject_id) {
        Ok(())
    } else {
        Err(CoreError::InvalidSubject {
            reason: format!(
                "'{}' is not a valid {} id (1-128 chars of A-Z a-z 0-9 _ . : @ -)",
                key.subject_id, key.subject_type
            ),
        })
    }
}

/// Parse `type` + `id` strings coming from CLI or HTTP paths
pub fn parse_key(subject_type: &str, subject_id: &str) -> Result<SubjectKey, CoreError> {
    let subject_type: SubjectType =
        subject_type
            .parse()
            .map_err(|e: mentorboard_types::ParseSubjectTypeError| CoreError::InvalidSubject {
                reason: e.to_string(),
            })?;
    let key = SubjectKey::new(subject_type, subject_id);
    validate_key(&key)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_accepts_known_shapes() {
        let key = parse_key("sponsor-org", "org:acme").unwrap();
        assert_eq!(key, SubjectKey::sponsor("org:acme"));
        assert!(parse_key("student", "student_42").is_ok());
    }

    #[test]
    fn test_parse_key_rejects_bad_ids() {
        assert!(parse_key("student", "").is_err());
        assert!(parse_key("student", "robert'); DROP TABLE").is_err());
        assert!(parse_key("student", &"x".repeat(129)).is_err());
        assert!(parse_key("mentor", "m1").is_err());
    }
}
