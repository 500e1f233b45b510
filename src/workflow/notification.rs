//! Notification commands and the delivery seam
//!
//! The dispatcher emits [`NotificationCommand`]s to a [`NotificationSink`];
//! rendering and transport are the sink's problem. The core only promises
//! correct selection of recipient, message kind, and token.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::DeliveryError;

use super::step::WorkflowStep;
use super::token::CapabilityToken;
use super::user::User;

/// Which message the rendering collaborator should send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A step is actionable by the recipient; carries a capability token
    StepNotification,
    /// Every step reached its terminal success state
    FullyApproved,
    /// A substantive edit invalidated prior approvals
    ProposalUpdatedNeedsReview,
    /// An edit that requires nothing from the recipient
    ProposalUpdatedNoAction,
    /// An edit happened while the recipient was already engaged on a step
    ProposalUpdatedWhilePending,
    /// The proposal entered the chain
    ProposalCreatedConfirmation,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::StepNotification => "step_notification",
            NotificationKind::FullyApproved => "fully_approved",
            NotificationKind::ProposalUpdatedNeedsReview => "proposal_updated_needs_review",
            NotificationKind::ProposalUpdatedNoAction => "proposal_updated_no_action",
            NotificationKind::ProposalUpdatedWhilePending => "proposal_updated_while_pending",
            NotificationKind::ProposalCreatedConfirmation => "proposal_created_confirmation",
        }
    }
}

/// Symbolic label selecting an alert banner in the rendered template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertVariant {
    Removed,
    AlreadyApproved,
    Updated,
}

impl AlertVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertVariant::Removed => "removed",
            AlertVariant::AlreadyApproved => "already_approved",
            AlertVariant::Updated => "updated",
        }
    }
}

/// One outbound notification, addressed to a concrete identified user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationCommand {
    pub kind: NotificationKind,
    pub recipient: User,
    pub proposal_id: Uuid,
    /// Proposal version at dispatch time; stamped into action links so
    /// the consuming endpoint can reject stale ones
    pub proposal_version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<WorkflowStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<CapabilityToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert_variant: Option<AlertVariant>,
}

impl NotificationCommand {
    /// Action link for this command, if it carries a token.
    pub fn action_url(&self, base: &str) -> Option<String> {
        self.token
            .as_ref()
            .map(|t| t.action_url(base, self.proposal_version))
    }
}

/// Delivery seam consumed by the dispatcher. Implementations may deliver
/// synchronously or queue for later; the dispatcher never waits on the
/// outcome and never retries.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, command: NotificationCommand) -> Result<(), DeliveryError>;
}

/// Sink that queues commands on an unbounded channel for a delivery
/// worker to drain. `deliver` never blocks.
pub struct QueuedSink {
    tx: mpsc::UnboundedSender<NotificationCommand>,
}

impl QueuedSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<NotificationCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for QueuedSink {
    fn deliver(&self, command: NotificationCommand) -> Result<(), DeliveryError> {
        self.tx
            .send(command)
            .map_err(|_| DeliveryError("notification queue closed".to_string()))
    }
}
