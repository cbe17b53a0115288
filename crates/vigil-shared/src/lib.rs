//! Shared types for the Vigil alert engine.
//!
//! Everything that crosses a boundary (storage, wire, channels) lives here so
//! the daemon and its clients agree on one shape.

pub mod ack;
pub mod alert;
pub mod audit;
pub mod error;
pub mod event;
pub mod job;
pub mod scope;
pub mod tier;

pub use ack::{AcknowledgmentRecord, ResponseType};
pub use alert::{Alert, AlertId, AlertStatus, CreateAlertRequest};
pub use audit::AuditEntry;
pub use error::{Result, VigilError};
pub use event::{AlertEvent, EventPayload, EventType};
pub use job::{ChannelKind, DeadLetter, JobKey, JobStatus, NotificationJob};
pub use scope::Scope;
pub use tier::{EscalationTier, EscalationTiers};

/// Crate version, reported by the daemon's health endpoint
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
