//! Proposal aggregate: the unit of approval
//!
//! A proposal owns its ordered step chain and its observations. Under the
//! sequential chain at most one step is actionable at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkflowError;

use super::step::{StepKind, WorkflowStep};
use super::user::{Observation, User};

/// A request moving through an approval chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    /// Owner of the request
    pub requester: User,
    steps: Vec<WorkflowStep>,
    observations: Vec<Observation>,
    /// Incremented on every edit; stamped into capability action links so
    /// stale links can be detected by the consuming endpoint
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    /// Create a proposal with an ordered chain of steps, one per assignee.
    /// The first step starts out actionable, the rest pending.
    pub fn new(requester: User, assignees: Vec<(User, StepKind)>) -> Self {
        let mut steps: Vec<WorkflowStep> = assignees
            .into_iter()
            .enumerate()
            .map(|(i, (user, kind))| WorkflowStep::new(i as u32, kind, user))
            .collect();
        if let Some(first) = steps.first_mut() {
            // A fresh step is always pending, so this cannot fail.
            let _ = first.make_actionable();
        }

        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            requester,
            steps,
            observations: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// The ordered step chain.
    pub fn individual_steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn step(&self, step_id: Uuid) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// The step immediately after the given one in chain order.
    pub fn step_after(&self, step_id: Uuid) -> Option<&WorkflowStep> {
        let position = self.step(step_id)?.position;
        self.steps.iter().find(|s| s.position == position + 1)
    }

    /// True once every step has reached a terminal success state.
    pub fn fully_approved(&self) -> bool {
        !self.steps.is_empty() && self.steps.iter().all(|s| s.status().is_completed())
    }

    /// Register an interested bystander. Returns the new observation id.
    pub fn add_observer(&mut self, user: User) -> Uuid {
        let observation = Observation::new(user);
        let id = observation.id;
        self.observations.push(observation);
        id
    }

    /// Advance the chain: complete the named step and, if a successor
    /// exists, mark it actionable.
    pub fn complete_step(&mut self, step_id: Uuid, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        let index = self
            .steps
            .iter()
            .position(|s| s.id == step_id)
            .ok_or(WorkflowError::StepNotFound(step_id))?;

        self.steps[index].complete(now)?;
        if let Some(next) = self.steps.get_mut(index + 1) {
            next.make_actionable()?;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Record an edit to the proposal's content: bumps the version so any
    /// previously stamped action link becomes detectably stale.
    pub fn record_edit(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Reassign a step to a new user, returning the removed one.
    pub fn replace_step_user(&mut self, step_id: Uuid, user: User) -> Result<User, WorkflowError> {
        let step = self
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or(WorkflowError::StepNotFound(step_id))?;
        Ok(step.replace_user(user))
    }
}
