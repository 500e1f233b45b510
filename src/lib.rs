//! signoff - approval-chain notification dispatch engine
//!
//! Routes workflow events (step completed, proposal updated) to the humans
//! who need to act or know, and issues the short-lived capability tokens
//! that let a notified user act on a step straight from an email link.

pub mod error;
pub mod workflow;

pub use error::{DeliveryError, DispatchError, TokenError, WorkflowError};
pub use workflow::{
    Dispatcher, NotificationCommand, NotificationKind, NotificationSink, Proposal,
    RecipientResolver, TokenIssuer, WorkflowEvent,
};
