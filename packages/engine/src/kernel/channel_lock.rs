//! Named mutual exclusion for reactions.
//!
//! Triggers that share a channel name within an organization never run
//! their reactions at the same time. Locks are created on first use and kept
//! for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::common::OrganizationId;

type ChannelKey = (OrganizationId, String);

#[derive(Default)]
pub struct ChannelLocks {
    locks: Mutex<HashMap<ChannelKey, Arc<AsyncMutex<()>>>>,
}

/// Holds a channel until dropped.
pub struct ChannelGuard {
    channel: String,
    _guard: OwnedMutexGuard<()>,
}

impl ChannelGuard {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        tracing::debug!(channel = %self.channel, "channel released");
    }
}

/// Trims spaces, tabs and newlines. Blank channels mean "no serialization".
pub fn normalize_channel(channel: Option<&str>) -> Option<&str> {
    channel
        .map(|c| c.trim_matches(|ch| ch == ' ' || ch == '\t' || ch == '\n'))
        .filter(|c| !c.is_empty())
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, organization_id: OrganizationId, channel: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry((organization_id, channel.to_string()))
            .or_default()
            .clone()
    }

    /// Waits for the channel. Returns `None` without waiting when the channel is blank.
    ///
    /// Blocks the calling thread: use from sandbox threads only, never from an async context.
    pub fn blocking_acquire(
        &self,
        organization_id: OrganizationId,
        channel: Option<&str>,
    ) -> Option<ChannelGuard> {
        let channel = normalize_channel(channel)?;
        let guard = self.lock_for(organization_id, channel).blocking_lock_owned();
        tracing::debug!(channel = %channel, "channel locked");
        Some(ChannelGuard {
            channel: channel.to_string(),
            _guard: guard,
        })
    }

    /// Number of distinct channels ever locked.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
