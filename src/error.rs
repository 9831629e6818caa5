//! Error types for the admission-control core.
//!
//! Denial of a request is a normal, typed outcome ([`crate::Decision`]),
//! never an error. The only failure class this crate surfaces is
//! configuration error: malformed policy definitions and updates aimed at
//! policies that do not exist.

use std::fmt;

/// Every failure the admission core can produce.
#[derive(Debug)]
pub enum AdmissionError {
    /// A policy file could not be loaded, or a policy failed validation.
    Config(String),
    /// An update targeted a policy id that is not registered.
    PolicyNotFound(String),
}

impl fmt::Display for AdmissionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {msg}"),
            Self::PolicyNotFound(id) => write!(f, "policy not found: {id}"),
        }
    }
}

impl std::error::Error for AdmissionError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_policy_id() {
        let err = AdmissionError::PolicyNotFound("gold".into());
        assert_eq!(err.to_string(), "policy not found: gold");
    }

    #[test]
    fn display_includes_config_message() {
        let err = AdmissionError::Config("bad bounds".into());
        assert_eq!(err.to_string(), "configuration error: bad bounds");
    }
}
