//! Capability tokens and their issuance
//!
//! A capability token is a time-limited opaque credential that lets a
//! notified user act on one specific step from an email link, without a
//! full login session. The issuer keeps the token association per step
//! and guarantees at most one live token per step at issuance time.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::TokenError;

/// Token lifetime from issuance.
pub const TOKEN_TTL_DAYS: i64 = 7;

/// Length of the opaque access-token string.
const ACCESS_TOKEN_LEN: usize = 32;

/// A random opaque credential bound to exactly one workflow step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityToken {
    pub step_id: Uuid,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl CapabilityToken {
    fn generate(step_id: Uuid, now: DateTime<Utc>) -> Self {
        let access_token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ACCESS_TOKEN_LEN)
            .map(char::from)
            .collect();
        Self {
            step_id,
            access_token,
            expires_at: now + Duration::days(TOKEN_TTL_DAYS),
        }
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// Build the action link for this token. Query parameters are exactly
    /// `cch` (the opaque string) and `version` (the proposal version at
    /// link generation), which the consuming endpoint uses to reject
    /// stale links.
    pub fn action_url(&self, base: &str, proposal_version: u64) -> String {
        format!(
            "{}?cch={}&version={}",
            base, self.access_token, proposal_version
        )
    }
}

/// Issues and reuses capability tokens, one live token per step.
///
/// Issuance is a single read-modify-write under the registry's write
/// lock, so two concurrent issuance attempts for the same step collapse
/// into one winning token rather than surfacing a conflict.
pub struct TokenIssuer {
    tokens: RwLock<HashMap<Uuid, CapabilityToken>>,
}

impl TokenIssuer {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Return the step's live token, or mint a fresh one expiring
    /// `TOKEN_TTL_DAYS` from `now`. Idempotent: a live token is returned
    /// unchanged, with no new random value and no date mutation.
    pub fn issue_for(
        &self,
        step_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<CapabilityToken, TokenError> {
        let mut tokens = self.tokens.write().map_err(|_| TokenError::Lock)?;
        if let Some(existing) = tokens.get(&step_id) {
            if existing.is_live(now) {
                return Ok(existing.clone());
            }
        }

        let token = CapabilityToken::generate(step_id, now);
        tokens.insert(step_id, token.clone());
        Ok(token)
    }

    /// The step's live token, if one exists at `now`.
    pub fn live_token(
        &self,
        step_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<CapabilityToken>, TokenError> {
        let tokens = self.tokens.read().map_err(|_| TokenError::Lock)?;
        Ok(tokens.get(&step_id).filter(|t| t.is_live(now)).cloned())
    }

    /// Look a live token up by its opaque string, as the action endpoint
    /// does when a link is followed.
    pub fn find_by_access_token(
        &self,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CapabilityToken>, TokenError> {
        let tokens = self.tokens.read().map_err(|_| TokenError::Lock)?;
        Ok(tokens
            .values()
            .find(|t| t.access_token == access_token && t.is_live(now))
            .cloned())
    }

    /// Drop token associations for a step, used when its proposal is
    /// destroyed. Expired tokens need no active deletion otherwise.
    pub fn revoke_for(&self, step_id: Uuid) -> Result<(), TokenError> {
        let mut tokens = self.tokens.write().map_err(|_| TokenError::Lock)?;
        tokens.remove(&step_id);
        Ok(())
    }
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}
