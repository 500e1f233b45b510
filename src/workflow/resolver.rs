//! Recipient resolution
//!
//! Pure read-only queries over a proposal's current chain state, used by
//! the dispatcher to decide who needs to hear about an event.

use std::collections::HashSet;

use uuid::Uuid;

use super::proposal::Proposal;
use super::step::WorkflowStep;
use super::user::User;

/// Borrowing view over a proposal that classifies its users into
/// "pending" (must act now) and "interested" (requester + observers).
/// Never mutates proposal or step state.
pub struct RecipientResolver<'a> {
    proposal: &'a Proposal,
}

impl<'a> RecipientResolver<'a> {
    pub fn new(proposal: &'a Proposal) -> Self {
        Self { proposal }
    }

    /// The currently actionable step, or none when the workflow is
    /// complete or halted. Under the sequential chain at most one step is
    /// actionable; the first by position is returned.
    pub fn pending_step(&self) -> Option<&'a WorkflowStep> {
        self.proposal
            .individual_steps()
            .iter()
            .find(|s| s.is_actionable())
    }

    /// The user assigned to the currently actionable step, if any.
    pub fn pending_user(&self) -> Option<&'a User> {
        self.pending_step().map(|s| &s.user)
    }

    /// Requester plus every observer, deduplicated by user id.
    pub fn interested_users(&self) -> Vec<User> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut users = Vec::new();

        seen.insert(self.proposal.requester.id);
        users.push(self.proposal.requester.clone());

        for observation in self.proposal.observations() {
            if seen.insert(observation.user.id) {
                users.push(observation.user.clone());
            }
        }
        users
    }

    /// Every distinct user assigned across all steps, in chain order.
    /// Used when a re-review event must reach every actor regardless of
    /// position.
    pub fn all_step_users(&self) -> Vec<User> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        self.proposal
            .individual_steps()
            .iter()
            .filter(|s| seen.insert(s.user.id))
            .map(|s| s.user.clone())
            .collect()
    }
}
