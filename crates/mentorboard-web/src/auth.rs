//! Caller identification
//!
//! The upstream auth layer forwards the authenticated principal as
//! `x-subject-type` / `x-subject-id` headers. Operators present the bearer
//! token from `operator_token`; operator access is off when no token is set.

use crate::error::ApiError;
use axum::http::{header, HeaderMap};
use mentorboard_core::parse_key;
use mentorboard_types::SubjectKey;

pub const SUBJECT_TYPE_HEADER: &str = "x-subject-type";
pub const SUBJECT_ID_HEADER: &str = "x-subject-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Operator,
    Principal(SubjectKey),
    Anonymous,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap, operator_token: Option<&str>) -> Result<Self, ApiError> {
        if let (Some(expected), Some(presented)) = (operator_token, bearer_token(headers)) {
            if constant_time_eq(expected.as_bytes(), presented.as_bytes()) {
                return Ok(Caller::Operator);
            }
            return Err(ApiError::unauthorized("invalid operator token"));
        }

        let subject_type = header_str(headers, SUBJECT_TYPE_HEADER);
        let subject_id = header_str(headers, SUBJECT_ID_HEADER);
        match (subject_type, subject_id) {
            (Some(subject_type), Some(subject_id)) => {
                let key = parse_key(subject_type, subject_id)
                    .map_err(|e| ApiError::unauthorized(e.to_string()))?;
                Ok(Caller::Principal(key))
            }
            _ => Ok(Caller::Anonymous),
        }
    }

    /// Operators read anything; principals read their own record only
    pub fn authorize_read(&self, key: &SubjectKey) -> Result<(), ApiError> {
        match self {
            Caller::Operator => Ok(()),
            Caller::Principal(own) if own == key => Ok(()),
            Caller::Principal(_) => Err(ApiError::forbidden("dashboard belongs to another subject")),
            Caller::Anonymous => Err(ApiError::unauthorized("missing principal")),
        }
    }

    pub fn require_operator(&self) -> Result<(), ApiError> {
        match self {
            Caller::Operator => Ok(()),
            Caller::Anonymous => Err(ApiError::unauthorized("operator token required")),
            Caller::Principal(_) => Err(ApiError::forbidden("operator access required")),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, header::AUTHORIZATION.as_str())?.strip_prefix("Bearer ")
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
