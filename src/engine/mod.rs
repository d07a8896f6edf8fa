//! Cycle accrual engine: schedule, eligibility, projection.
//!
//! Everything in here is pure and deterministic. The projector and
//! eligibility rules hold the single authoritative copy of the accrual
//! algorithm; the HTTP gateway and any client previews must delegate here
//! rather than re-derive it.

pub mod eligibility;
pub mod projector;
pub mod schedule;

use thiserror::Error;

/// Errors produced by engine-level input validation.
///
/// Validation always rejects; out-of-range input is never clamped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }

    /// The request field the error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            EngineError::Validation { field, .. } => field,
        }
    }
}

pub use eligibility::{count_eligible_cycles, is_eligible, next_eligible_cycle};
pub use projector::{ProfitPreview, Projection, ProjectionStage, ProjectionTotals, ProjectorConfig};
pub use schedule::{CycleEntry, CycleSchedule};
