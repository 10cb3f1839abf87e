//! Exclusive ownership of the robot command stream
//!
//! Exactly one producer may feed motion commands to the actuation backend at
//! a time. Trajectory execution and teleoperation both acquire a guard here
//! before sending anything; releasing is tied to guard drop so an owner can
//! never leak the stream across a panic or an early return.

use crate::{ArmError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOwner {
    Execution,
    Teleop,
}

impl fmt::Display for StreamOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamOwner::Execution => write!(f, "execution"),
            StreamOwner::Teleop => write!(f, "teleoperation"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OwnerSlot {
    owner: StreamOwner,
    id: Uuid,
}

/// Hands out at most one [`CommandStreamGuard`] at a time.
///
/// Clones share the same underlying slot.
#[derive(Clone)]
pub struct CommandStreamArbiter {
    slot: Arc<Mutex<Option<OwnerSlot>>>,
}

impl CommandStreamArbiter {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
        }
    }

    /// Claim the command stream, failing with `ModeConflict` if it is held.
    pub fn try_acquire(&self, owner: StreamOwner) -> Result<CommandStreamGuard> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(held) = slot.as_ref() {
            return Err(ArmError::ModeConflict {
                held_by: held.owner,
                requested: owner,
            });
        }
        let id = Uuid::new_v4();
        *slot = Some(OwnerSlot { owner, id });
        debug!("Command stream acquired by {} ({})", owner, id);
        Ok(CommandStreamGuard {
            slot: self.slot.clone(),
            owner,
            id,
        })
    }

    pub fn current_owner(&self) -> Option<StreamOwner> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.owner)
    }

    pub fn is_free(&self) -> bool {
        self.current_owner().is_none()
    }
}

impl Default for CommandStreamArbiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of exclusive command-stream ownership. Dropping it releases the
/// stream.
#[derive(Debug)]
pub struct CommandStreamGuard {
    slot: Arc<Mutex<Option<OwnerSlot>>>,
    owner: StreamOwner,
    id: Uuid,
}

impl CommandStreamGuard {
    pub fn owner(&self) -> StreamOwner {
        self.owner
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for CommandStreamGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        // Only clear our own claim; a poisoned-and-recovered slot may have
        // been reassigned.
        if slot.map(|s| s.id) == Some(self.id) {
            *slot = None;
            debug!("Command stream released by {} ({})", self.owner, self.id);
        }
    }
}
