//! Approval-chain workflow core
//!
//! This module implements the notification-dispatch engine: when a step in
//! a proposal's approval chain completes, or the proposal is edited, the
//! dispatcher decides exactly who gets told, by which message, with which
//! capability token — while never notifying the actor who caused the event.

pub mod dispatcher;
pub mod notification;
pub mod proposal;
pub mod resolver;
pub mod step;
pub mod token;
pub mod user;

pub use dispatcher::{Dispatcher, WorkflowEvent};
pub use notification::{
    AlertVariant, NotificationCommand, NotificationKind, NotificationSink, QueuedSink,
};
pub use proposal::Proposal;
pub use resolver::RecipientResolver;
pub use step::{StepKind, StepStatus, WorkflowStep};
pub use token::{CapabilityToken, TokenIssuer, TOKEN_TTL_DAYS};
pub use user::{Observation, User};
