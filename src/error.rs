//! Error types for the workflow core

use thiserror::Error;
use uuid::Uuid;

use crate::workflow::step::StepStatus;

/// Structural workflow errors. These indicate a bug or data-integrity
/// problem upstream and are surfaced to the caller as hard failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid transition: step {step_id} is {status}, expected an actionable step")]
    InvalidTransition { step_id: Uuid, status: StepStatus },

    #[error("step not found: {0}")]
    StepNotFound(Uuid),
}

/// Errors from the capability-token registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token registry lock poisoned")]
    Lock,
}

/// Delivery failure reported by a [`NotificationSink`] implementation.
/// Never produced by the core itself; the dispatcher logs it and moves on.
///
/// [`NotificationSink`]: crate::workflow::notification::NotificationSink
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("delivery failed: {0}")]
pub struct DeliveryError(pub String);

/// Errors surfaced by the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Token(#[from] TokenError),
}

pub type Result<T, E = DispatchError> = std::result::Result<T, E>;
