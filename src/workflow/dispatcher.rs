//! The event router
//!
//! Receives workflow events after the underlying state change has been
//! committed and decides who gets notified with what message and token.
//! Delivery itself is fire-and-forget: a sink failure is logged and never
//! blocks or reverses the workflow state change that triggered it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{DispatchError, WorkflowError};

use super::notification::{
    AlertVariant, NotificationCommand, NotificationKind, NotificationSink,
};
use super::proposal::Proposal;
use super::resolver::RecipientResolver;
use super::step::WorkflowStep;
use super::token::TokenIssuer;
use super::user::User;

/// A committed workflow state change, as reported by the persistence
/// collaborator. Exactly one event fires per underlying change.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A step reached its terminal success state and the chain was
    /// advanced
    StepCompleted { step_id: Uuid },
    /// The proposal's content changed after creation
    ProposalUpdated {
        /// The user who made the edit; never notified of their own change
        modifier: Option<Uuid>,
        /// Whether the edit invalidates prior approvals
        needs_review: bool,
    },
    /// The proposal entered the approval chain
    ProposalCreated,
    /// A step was reassigned to a different user
    StepUserReplaced { step_id: Uuid, removed: User },
}

/// Routes workflow events to notification commands.
pub struct Dispatcher {
    issuer: TokenIssuer,
    sink: Arc<dyn NotificationSink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            issuer: TokenIssuer::new(),
            sink,
        }
    }

    /// Use an existing token registry, shared with the action endpoint.
    pub fn with_issuer(issuer: TokenIssuer, sink: Arc<dyn NotificationSink>) -> Self {
        Self { issuer, sink }
    }

    pub fn token_issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Process one event against the current (already committed) proposal
    /// state.
    pub fn dispatch(&self, proposal: &Proposal, event: WorkflowEvent) -> Result<(), DispatchError> {
        self.dispatch_at(proposal, event, Utc::now())
    }

    /// Same as [`dispatch`](Self::dispatch) with an explicit clock, for
    /// callers that control time.
    pub fn dispatch_at(
        &self,
        proposal: &Proposal,
        event: WorkflowEvent,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        tracing::debug!(proposal_id = %proposal.id, ?event, "dispatching workflow event");
        match event {
            WorkflowEvent::StepCompleted { step_id } => {
                self.handle_step_completed(proposal, step_id, now)
            }
            WorkflowEvent::ProposalUpdated {
                modifier,
                needs_review,
            } => self.handle_proposal_updated(proposal, modifier, needs_review, now),
            WorkflowEvent::ProposalCreated => self.handle_proposal_created(proposal, now),
            WorkflowEvent::StepUserReplaced { step_id, removed } => {
                self.handle_step_user_replaced(proposal, step_id, removed, now)
            }
        }
    }

    /// A step completed. Notify the next actionable step's user with an
    /// action token, or the requester when the chain is done. The user who
    /// just completed the step hears nothing.
    pub fn step_complete(&self, proposal: &Proposal, step_id: Uuid) -> Result<(), DispatchError> {
        self.dispatch(proposal, WorkflowEvent::StepCompleted { step_id })
    }

    /// The proposal was edited after creation.
    pub fn on_proposal_update(
        &self,
        proposal: &Proposal,
        modifier: Option<Uuid>,
        needs_review: bool,
    ) -> Result<(), DispatchError> {
        self.dispatch(
            proposal,
            WorkflowEvent::ProposalUpdated {
                modifier,
                needs_review,
            },
        )
    }

    /// The proposal entered the chain.
    pub fn proposal_created(&self, proposal: &Proposal) -> Result<(), DispatchError> {
        self.dispatch(proposal, WorkflowEvent::ProposalCreated)
    }

    /// A step was reassigned; `removed` is the previous assignee.
    pub fn step_user_replaced(
        &self,
        proposal: &Proposal,
        step_id: Uuid,
        removed: User,
    ) -> Result<(), DispatchError> {
        self.dispatch(proposal, WorkflowEvent::StepUserReplaced { step_id, removed })
    }

    fn handle_step_completed(
        &self,
        proposal: &Proposal,
        step_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        proposal
            .step(step_id)
            .ok_or(WorkflowError::StepNotFound(step_id))?;

        match proposal.step_after(step_id) {
            Some(next) if next.is_actionable() => {
                let token = self.issuer.issue_for(next.id, now)?;
                self.send(NotificationCommand {
                    kind: NotificationKind::StepNotification,
                    step: Some(next.clone()),
                    token: Some(token),
                    ..self.base_command(proposal, next.user.clone())
                });
            }
            Some(_) => {
                // Chain halted (e.g. a rejection downstream); nothing to say.
                tracing::debug!(proposal_id = %proposal.id, "successor step not actionable");
            }
            None => {
                self.send(NotificationCommand {
                    kind: NotificationKind::FullyApproved,
                    ..self.base_command(proposal, proposal.requester.clone())
                });
            }
        }
        Ok(())
    }

    fn handle_proposal_updated(
        &self,
        proposal: &Proposal,
        modifier: Option<Uuid>,
        needs_review: bool,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let resolver = RecipientResolver::new(proposal);
        let pending = resolver.pending_step();

        // The pending-step notification always goes out before the
        // requester/observer batch.
        if needs_review {
            if let Some(step) = pending {
                // Re-review restores full actionability, so this message
                // carries a token even when the step user made the edit.
                let token = self.issuer.issue_for(step.id, now)?;
                self.send(NotificationCommand {
                    kind: NotificationKind::StepNotification,
                    step: Some(step.clone()),
                    token: Some(token),
                    alert_variant: Some(AlertVariant::Updated),
                    ..self.base_command(proposal, step.user.clone())
                });
            }
            self.notify_interested(
                proposal,
                &resolver,
                NotificationKind::ProposalUpdatedNeedsReview,
                modifier,
            );
        } else {
            if let Some(step) = pending {
                if modifier != Some(step.user.id) {
                    self.notify_pending_no_review(proposal, step, now)?;
                }
            }
            self.notify_interested(
                proposal,
                &resolver,
                NotificationKind::ProposalUpdatedNoAction,
                modifier,
            );
        }
        Ok(())
    }

    /// No-review branch for the pending step's user: a live token means
    /// they were already engaged, which warrants the distinct
    /// while-pending message reusing that token.
    fn notify_pending_no_review(
        &self,
        proposal: &Proposal,
        step: &WorkflowStep,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        match self.issuer.live_token(step.id, now)? {
            Some(token) => self.send(NotificationCommand {
                kind: NotificationKind::ProposalUpdatedWhilePending,
                step: Some(step.clone()),
                token: Some(token),
                ..self.base_command(proposal, step.user.clone())
            }),
            None => self.send(NotificationCommand {
                kind: NotificationKind::ProposalUpdatedNoAction,
                step: Some(step.clone()),
                ..self.base_command(proposal, step.user.clone())
            }),
        }
        Ok(())
    }

    fn handle_proposal_created(
        &self,
        proposal: &Proposal,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        self.send(NotificationCommand {
            kind: NotificationKind::ProposalCreatedConfirmation,
            ..self.base_command(proposal, proposal.requester.clone())
        });

        if let Some(step) = RecipientResolver::new(proposal).pending_step() {
            let token = self.issuer.issue_for(step.id, now)?;
            self.send(NotificationCommand {
                kind: NotificationKind::StepNotification,
                step: Some(step.clone()),
                token: Some(token),
                ..self.base_command(proposal, step.user.clone())
            });
        }
        Ok(())
    }

    fn handle_step_user_replaced(
        &self,
        proposal: &Proposal,
        step_id: Uuid,
        removed: User,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let step = proposal
            .step(step_id)
            .ok_or(WorkflowError::StepNotFound(step_id))?;

        self.send(NotificationCommand {
            kind: NotificationKind::StepNotification,
            step: Some(step.clone()),
            alert_variant: Some(AlertVariant::Removed),
            ..self.base_command(proposal, removed)
        });

        let token = self.issuer.issue_for(step.id, now)?;
        self.send(NotificationCommand {
            kind: NotificationKind::StepNotification,
            step: Some(step.clone()),
            token: Some(token),
            alert_variant: Some(AlertVariant::Updated),
            ..self.base_command(proposal, step.user.clone())
        });
        Ok(())
    }

    /// Fan out to requester and observers, skipping the modifier. Order
    /// within the batch carries no meaning.
    fn notify_interested(
        &self,
        proposal: &Proposal,
        resolver: &RecipientResolver<'_>,
        kind: NotificationKind,
        modifier: Option<Uuid>,
    ) {
        for user in resolver.interested_users() {
            if modifier == Some(user.id) {
                continue;
            }
            self.send(NotificationCommand {
                kind,
                ..self.base_command(proposal, user)
            });
        }
    }

    fn base_command(&self, proposal: &Proposal, recipient: User) -> NotificationCommand {
        NotificationCommand {
            kind: NotificationKind::StepNotification,
            recipient,
            proposal_id: proposal.id,
            proposal_version: proposal.version,
            step: None,
            token: None,
            alert_variant: None,
        }
    }

    /// Attempted notification, not confirmed delivery: a sink failure is
    /// logged and the remaining fan-out continues.
    fn send(&self, command: NotificationCommand) {
        let kind = command.kind;
        let recipient = command.recipient.email_address.clone();
        if let Err(err) = self.sink.deliver(command) {
            tracing::warn!(
                "delivery failed ({} to {}): {}",
                kind.as_str(),
                recipient,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeliveryError;
    use crate::workflow::step::StepKind;
    use chrono::Duration;
    use std::sync::Mutex;

    /// Records every command instead of delivering it.
    struct RecordingSink {
        commands: Mutex<Vec<NotificationCommand>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
            })
        }

        fn commands(&self) -> Vec<NotificationCommand> {
            self.commands.lock().unwrap().clone()
        }

        fn recipients(&self) -> Vec<String> {
            self.commands()
                .iter()
                .map(|c| c.recipient.email_address.clone())
                .collect()
        }
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&self, command: NotificationCommand) -> Result<(), DeliveryError> {
            self.commands.lock().unwrap().push(command);
            Ok(())
        }
    }

    /// Fails every delivery.
    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn deliver(&self, _command: NotificationCommand) -> Result<(), DeliveryError> {
            Err(DeliveryError("smtp down".to_string()))
        }
    }

    fn make_user(email: &str) -> User {
        User::new(email, email.split('@').next().unwrap_or(email))
    }

    fn two_step_proposal() -> Proposal {
        Proposal::new(
            make_user("requester@example.com"),
            vec![
                (make_user("first@example.com"), StepKind::Approval),
                (make_user("second@example.com"), StepKind::Approval),
            ],
        )
    }

    #[test]
    fn test_step_complete_notifies_next_step_user_only() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let mut proposal = two_step_proposal();
        let first_id = proposal.individual_steps()[0].id;
        proposal.complete_step(first_id, Utc::now()).unwrap();

        dispatcher.step_complete(&proposal, first_id).unwrap();

        assert_eq!(sink.recipients(), vec!["second@example.com"]);
        let command = &sink.commands()[0];
        assert_eq!(command.kind, NotificationKind::StepNotification);
        assert!(command.token.is_some());
        assert_eq!(command.step.as_ref().unwrap().user.email_address, "second@example.com");
    }

    #[test]
    fn test_final_step_complete_notifies_requester() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let mut proposal = two_step_proposal();
        let ids: Vec<Uuid> = proposal.individual_steps().iter().map(|s| s.id).collect();
        proposal.complete_step(ids[0], Utc::now()).unwrap();
        proposal.complete_step(ids[1], Utc::now()).unwrap();

        dispatcher.step_complete(&proposal, ids[1]).unwrap();

        let commands = sink.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, NotificationKind::FullyApproved);
        assert_eq!(commands[0].recipient.email_address, "requester@example.com");
        assert!(commands[0].token.is_none());
    }

    #[test]
    fn test_step_complete_unknown_step() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();

        let result = dispatcher.step_complete(&proposal, Uuid::new_v4());
        assert!(matches!(
            result,
            Err(DispatchError::Workflow(WorkflowError::StepNotFound(_)))
        ));
        assert!(sink.commands().is_empty());
    }

    #[test]
    fn test_step_complete_halted_chain_sends_nothing() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();
        // Step 1 never completed; step 2 is still pending, so a (stale)
        // completion event for step 1 finds no actionable successor.
        let first_id = proposal.individual_steps()[0].id;

        dispatcher.step_complete(&proposal, first_id).unwrap();

        assert!(sink.commands().is_empty());
    }

    #[test]
    fn test_needs_review_notifies_pending_user_with_token() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();

        dispatcher
            .on_proposal_update(&proposal, None, true)
            .unwrap();

        let commands = sink.commands();
        // Pending-step message first, then the requester batch.
        assert_eq!(commands[0].kind, NotificationKind::StepNotification);
        assert_eq!(commands[0].recipient.email_address, "first@example.com");
        assert!(commands[0].token.is_some());
        assert_eq!(commands[0].alert_variant, Some(AlertVariant::Updated));

        assert_eq!(commands[1].kind, NotificationKind::ProposalUpdatedNeedsReview);
        assert_eq!(commands[1].recipient.email_address, "requester@example.com");
    }

    #[test]
    fn test_needs_review_excludes_modifier_from_batch_only() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let mut proposal = two_step_proposal();
        let watcher = make_user("watcher@example.com");
        proposal.add_observer(watcher.clone());
        let requester_id = proposal.requester.id;

        dispatcher
            .on_proposal_update(&proposal, Some(requester_id), true)
            .unwrap();

        let recipients = sink.recipients();
        assert!(recipients.contains(&"first@example.com".to_string()));
        assert!(recipients.contains(&"watcher@example.com".to_string()));
        assert!(!recipients.contains(&"requester@example.com".to_string()));
    }

    #[test]
    fn test_needs_review_pending_user_notified_even_as_modifier() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();
        let step_user_id = proposal.individual_steps()[0].user.id;

        dispatcher
            .on_proposal_update(&proposal, Some(step_user_id), true)
            .unwrap();

        let commands = sink.commands();
        assert_eq!(commands[0].recipient.email_address, "first@example.com");
        assert!(commands[0].token.is_some());
    }

    #[test]
    fn test_no_review_without_token_sends_no_action() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();

        dispatcher
            .on_proposal_update(&proposal, None, false)
            .unwrap();

        let commands = sink.commands();
        assert_eq!(commands[0].kind, NotificationKind::ProposalUpdatedNoAction);
        assert_eq!(commands[0].recipient.email_address, "first@example.com");
        assert!(commands[0].token.is_none());
        assert_eq!(commands[1].kind, NotificationKind::ProposalUpdatedNoAction);
        assert_eq!(commands[1].recipient.email_address, "requester@example.com");
    }

    #[test]
    fn test_no_review_with_live_token_sends_while_pending() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();
        let step_id = proposal.individual_steps()[0].id;
        let now = Utc::now();
        let token = dispatcher.token_issuer().issue_for(step_id, now).unwrap();

        dispatcher
            .dispatch_at(
                &proposal,
                WorkflowEvent::ProposalUpdated {
                    modifier: None,
                    needs_review: false,
                },
                now + Duration::hours(1),
            )
            .unwrap();

        let commands = sink.commands();
        assert_eq!(
            commands[0].kind,
            NotificationKind::ProposalUpdatedWhilePending
        );
        // Existing token is reused, not reissued.
        assert_eq!(commands[0].token.as_ref().unwrap(), &token);
    }

    #[test]
    fn test_no_review_expired_token_falls_back_to_no_action() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();
        let step_id = proposal.individual_steps()[0].id;
        let issued = Utc::now();
        dispatcher.token_issuer().issue_for(step_id, issued).unwrap();

        dispatcher
            .dispatch_at(
                &proposal,
                WorkflowEvent::ProposalUpdated {
                    modifier: None,
                    needs_review: false,
                },
                issued + Duration::days(8),
            )
            .unwrap();

        assert_eq!(
            sink.commands()[0].kind,
            NotificationKind::ProposalUpdatedNoAction
        );
    }

    #[test]
    fn test_no_review_excludes_modifier_step_user() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();
        let step_user_id = proposal.individual_steps()[0].user.id;

        dispatcher
            .on_proposal_update(&proposal, Some(step_user_id), false)
            .unwrap();

        let recipients = sink.recipients();
        assert!(!recipients.contains(&"first@example.com".to_string()));
        // Requester still hears about it.
        assert!(recipients.contains(&"requester@example.com".to_string()));
    }

    #[test]
    fn test_no_review_excludes_modifier_observer() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let mut proposal = two_step_proposal();
        let watcher = make_user("watcher@example.com");
        proposal.add_observer(watcher.clone());

        dispatcher
            .on_proposal_update(&proposal, Some(watcher.id), false)
            .unwrap();

        assert!(!sink.recipients().contains(&"watcher@example.com".to_string()));
    }

    #[test]
    fn test_proposal_created_fan_out() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let proposal = two_step_proposal();

        dispatcher.proposal_created(&proposal).unwrap();

        let commands = sink.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(
            commands[0].kind,
            NotificationKind::ProposalCreatedConfirmation
        );
        assert_eq!(commands[0].recipient.email_address, "requester@example.com");
        assert_eq!(commands[1].kind, NotificationKind::StepNotification);
        assert_eq!(commands[1].recipient.email_address, "first@example.com");
        assert!(commands[1].token.is_some());
    }

    #[test]
    fn test_step_user_replaced_alerts_both_users() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let mut proposal = two_step_proposal();
        let step_id = proposal.individual_steps()[0].id;
        let removed = proposal
            .replace_step_user(step_id, make_user("relief@example.com"))
            .unwrap();

        dispatcher
            .step_user_replaced(&proposal, step_id, removed)
            .unwrap();

        let commands = sink.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].recipient.email_address, "first@example.com");
        assert_eq!(commands[0].alert_variant, Some(AlertVariant::Removed));
        assert!(commands[0].token.is_none());
        assert_eq!(commands[1].recipient.email_address, "relief@example.com");
        assert_eq!(commands[1].alert_variant, Some(AlertVariant::Updated));
        assert!(commands[1].token.is_some());
    }

    #[test]
    fn test_delivery_failure_does_not_abort_dispatch() {
        let dispatcher = Dispatcher::new(Arc::new(FailingSink));
        let mut proposal = two_step_proposal();
        proposal.add_observer(make_user("watcher@example.com"));

        // Every delivery fails, but dispatch still succeeds.
        let result = dispatcher.on_proposal_update(&proposal, None, true);
        assert!(result.is_ok());
    }

    #[test]
    fn test_commands_stamp_current_version() {
        let sink = RecordingSink::new();
        let dispatcher = Dispatcher::new(sink.clone());
        let mut proposal = two_step_proposal();
        proposal.record_edit();
        proposal.record_edit();

        dispatcher
            .on_proposal_update(&proposal, None, true)
            .unwrap();

        assert!(sink.commands().iter().all(|c| c.proposal_version == 3));
    }
}
