//! Acknowledgment records.
//!
//! Records are append-only: every acknowledge call produces one, whether or
//! not it changed ownership of the alert.

use crate::alert::AlertId;
use crate::error::VigilError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a responder said about an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Responding,
    Acknowledged,
    Unable,
    TakingOver,
    Resolved,
}

impl ResponseType {
    /// Response types that can claim primary ownership
    pub fn claims_ownership(&self) -> bool {
        matches!(self, Self::Responding | Self::TakingOver)
    }
}

impl fmt::Display for ResponseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Responding => write!(f, "responding"),
            Self::Acknowledged => write!(f, "acknowledged"),
            Self::Unable => write!(f, "unable"),
            Self::TakingOver => write!(f, "taking_over"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

impl FromStr for ResponseType {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "responding" => Ok(Self::Responding),
            "acknowledged" => Ok(Self::Acknowledged),
            "unable" => Ok(Self::Unable),
            "taking_over" => Ok(Self::TakingOver),
            "resolved" => Ok(Self::Resolved),
            other => Err(VigilError::Validation(format!(
                "unknown response type: {}",
                other
            ))),
        }
    }
}

/// One responder's response to an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcknowledgmentRecord {
    pub alert_id: AlertId,
    pub responder_id: String,
    pub response_type: ResponseType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Sequence of the event this record produced
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_type() {
        assert_eq!(
            "taking_over".parse::<ResponseType>().unwrap(),
            ResponseType::TakingOver
        );
        assert_eq!(
            " Responding ".parse::<ResponseType>().unwrap(),
            ResponseType::Responding
        );
        assert!(matches!(
            "on_my_way".parse::<ResponseType>(),
            Err(VigilError::Validation(_))
        ));
    }

    #[test]
    fn test_ownership_claims() {
        assert!(ResponseType::Responding.claims_ownership());
        assert!(ResponseType::TakingOver.claims_ownership());
        assert!(!ResponseType::Acknowledged.claims_ownership());
        assert!(!ResponseType::Unable.claims_ownership());
    }
}
