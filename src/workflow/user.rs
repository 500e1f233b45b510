//! User identity and observation models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An actor identity. Referenced by steps and observations, never owned by
/// a single proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email_address: String,
    pub full_name: String,
}

impl User {
    pub fn new(email_address: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email_address: email_address.into(),
            full_name: full_name.into(),
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for User {}

/// Links a proposal to a user who wants visibility but never acts on steps.
/// Created explicitly; many per proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub user: User,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    pub fn new(user: User) -> Self {
        Self {
            id: Uuid::new_v4(),
            user,
            created_at: Utc::now(),
        }
    }
}
