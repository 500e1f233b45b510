//! Workflow steps and their transition rules
//!
//! One step is one link in a proposal's approval chain. Transitions are
//! monotonic forward: a step becomes actionable only after its predecessor
//! reaches its terminal success state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;

use super::user::User;

/// Status of a workflow step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Waiting for an earlier step to complete
    Pending,
    /// The assigned user may act on this step now
    Actionable,
    /// Terminal success state for approval steps
    Approved,
    /// Terminal failure state
    Rejected,
    /// Terminal success state for purchase steps
    Purchased,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Actionable => "actionable",
            StepStatus::Approved => "approved",
            StepStatus::Rejected => "rejected",
            StepStatus::Purchased => "purchased",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, StepStatus::Pending)
    }

    pub fn is_actionable(&self) -> bool {
        matches!(self, StepStatus::Actionable)
    }

    /// Check if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Approved | StepStatus::Rejected | StepStatus::Purchased
        )
    }

    /// Check if this is a terminal success status
    pub fn is_completed(&self) -> bool {
        matches!(self, StepStatus::Approved | StepStatus::Purchased)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "actionable" => Ok(StepStatus::Actionable),
            "approved" => Ok(StepStatus::Approved),
            "rejected" => Ok(StepStatus::Rejected),
            "purchased" => Ok(StepStatus::Purchased),
            _ => Err(format!("Invalid step status: {}", s)),
        }
    }
}

/// Kind of a workflow step. Resolves kind-specific terminal state and
/// action button label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Approval,
    Purchase,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Approval => "approval",
            StepKind::Purchase => "purchase",
        }
    }

    /// Terminal success status for this kind
    pub fn completed_status(&self) -> StepStatus {
        match self {
            StepKind::Approval => StepStatus::Approved,
            StepKind::Purchase => StepStatus::Purchased,
        }
    }

    /// Label for the action button rendered by the mail collaborator
    pub fn action_label(&self) -> &'static str {
        match self {
            StepKind::Approval => "Approve",
            StepKind::Purchase => "Purchase",
        }
    }
}

impl std::str::FromStr for StepKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval" => Ok(StepKind::Approval),
            "purchase" => Ok(StepKind::Purchase),
            _ => Err(format!("Invalid step kind: {}", s)),
        }
    }
}

/// One link in a proposal's approval chain, owned exclusively by its
/// proposal and assigned to exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier
    pub id: Uuid,
    /// Ordinal position in the chain, fixed at creation
    pub position: u32,
    pub kind: StepKind,
    status: StepStatus,
    /// The user who must act on this step
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<DateTime<Utc>>,
}

impl WorkflowStep {
    pub fn new(position: u32, kind: StepKind, user: User) -> Self {
        Self {
            id: Uuid::new_v4(),
            position,
            kind,
            status: StepStatus::Pending,
            user,
            approved_at: None,
        }
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn is_pending(&self) -> bool {
        self.status.is_pending()
    }

    pub fn is_actionable(&self) -> bool {
        self.status.is_actionable()
    }

    /// Mark this step actionable. Only valid from `Pending`; the chain
    /// never moves backwards.
    pub(crate) fn make_actionable(&mut self) -> Result<(), WorkflowError> {
        if !self.status.is_pending() {
            return Err(WorkflowError::InvalidTransition {
                step_id: self.id,
                status: self.status,
            });
        }
        self.status = StepStatus::Actionable;
        Ok(())
    }

    /// Transition to this step's kind-specific terminal success state.
    /// Fails unless the step is currently actionable.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        if !self.status.is_actionable() {
            return Err(WorkflowError::InvalidTransition {
                step_id: self.id,
                status: self.status,
            });
        }
        self.status = self.kind.completed_status();
        self.approved_at = Some(now);
        Ok(())
    }

    /// Reject this step. Fails unless the step is currently actionable.
    pub fn reject(&mut self) -> Result<(), WorkflowError> {
        if !self.status.is_actionable() {
            return Err(WorkflowError::InvalidTransition {
                step_id: self.id,
                status: self.status,
            });
        }
        self.status = StepStatus::Rejected;
        Ok(())
    }

    /// Reassign this step to a different user, returning the previous one.
    pub fn replace_user(&mut self, user: User) -> User {
        std::mem::replace(&mut self.user, user)
    }
}
