//! Snapshot of a user's notification preferences as fetched from the (external,
//! out-of-scope) user service and cached in front of it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferenceSnapshot {
    pub user_id: Uuid,
    /// `false` means the channel is muted for this user; the orchestrator must
    /// skip the send (outcome `skipped`) rather than attempt delivery.
    pub email_enabled: bool,
    pub push_enabled: bool,
    pub email_address: Option<String>,
    pub push_token: Option<String>,
}

impl UserPreferenceSnapshot {
    pub fn channel_enabled(&self, channel: super::job::Channel) -> bool {
        match channel {
            super::job::Channel::Email => self.email_enabled,
            super::job::Channel::Push => self.push_enabled,
        }
    }

    pub fn address_for(&self, channel: super::job::Channel) -> Option<&str> {
        match channel {
            super::job::Channel::Email => self.email_address.as_deref(),
            super::job::Channel::Push => self.push_token.as_deref(),
        }
    }
}
