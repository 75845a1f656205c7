//! Match store: the session behind a lock, a change feed, and prompt claims.
//!
//! The session machine itself lives in the `matchsync` lib. This store
//! holds the single live `MatchSession`, publishes a snapshot after every
//! applied transition, and tracks which screens own the match-found prompt.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

pub use matchsync::{MatchInput, MatchPhase, MatchSession, Outcome};

use crate::bus::{ChangeReceiver, ChangeSender};

struct SessionSlot {
    session: MatchSession,
    /// Bumped on every applied queue join; lets a leave-queue timeout tell
    /// whether the queue entry it was started for is still the current one.
    queue_epoch: u64,
}

/// Shared interior state backing both `MatchStore` (read) and
/// `MatchStoreWriter` (write).
struct MatchStoreInner {
    slot: RwLock<SessionSlot>,
    changes: ChangeSender<MatchSession>,
    prompt_claims: AtomicUsize,
}

/// Read-only match state.
///
/// Exposes snapshots, the change feed, and prompt claims. Cheap to clone;
/// every clone sees the same session.
#[derive(Clone)]
pub struct MatchStore {
    inner: Arc<MatchStoreInner>,
}

/// Write handle for session transitions.
///
/// Held by the match reconciler (and its timer threads) and by
/// `ClientState` for resets. Every mutation goes through the session's
/// transition function.
#[derive(Clone)]
pub struct MatchStoreWriter {
    inner: Arc<MatchStoreInner>,
}

/// Held by a screen that renders the match-found prompt itself. While any
/// claim is alive the global prompt stays hidden.
pub struct PromptClaim {
    inner: Arc<MatchStoreInner>,
}

impl Drop for PromptClaim {
    fn drop(&mut self) {
        self.inner.prompt_claims.fetch_sub(1, Ordering::AcqRel);
    }
}

impl MatchStore {
    /// Create a new `MatchStore` and its companion `MatchStoreWriter`.
    pub fn new() -> (Self, MatchStoreWriter) {
        let inner = Arc::new(MatchStoreInner {
            slot: RwLock::new(SessionSlot {
                session: MatchSession::default(),
                queue_epoch: 0,
            }),
            changes: ChangeSender::new(),
            prompt_claims: AtomicUsize::new(0),
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            MatchStoreWriter { inner },
        )
    }

    /// Clone of the current session.
    pub fn snapshot(&self) -> MatchSession {
        self.inner
            .slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .clone()
    }

    pub fn phase(&self) -> MatchPhase {
        self.inner
            .slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .phase
    }

    /// Receive a snapshot after every applied transition.
    pub fn subscribe(&self) -> ChangeReceiver<MatchSession> {
        self.inner.changes.subscribe()
    }

    pub fn claim_prompt(&self) -> PromptClaim {
        self.inner.prompt_claims.fetch_add(1, Ordering::AcqRel);
        PromptClaim {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether the app-wide match-found prompt should be shown: a prompt is
    /// pending and no screen has claimed it.
    pub fn global_prompt_visible(&self) -> bool {
        self.inner.prompt_claims.load(Ordering::Acquire) == 0
            && self
                .inner
                .slot
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .session
                .prompt_open
    }
}

impl MatchStoreWriter {
    /// Read access for the reconciler's own checks.
    pub fn snapshot(&self) -> MatchSession {
        self.inner
            .slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .clone()
    }

    pub fn current_match_id(&self) -> Option<String> {
        self.inner
            .slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .session
            .match_id
            .clone()
    }

    pub fn queue_epoch(&self) -> u64 {
        self.inner
            .slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .queue_epoch
    }

    /// Apply one input and publish the new snapshot if it was applied.
    pub fn apply(&self, input: MatchInput) -> Outcome {
        let slot = self.inner.slot.write().unwrap_or_else(|e| e.into_inner());
        self.commit(slot, input)
    }

    /// Apply `input` only if no queue join happened since `epoch` was read.
    /// Returns `None` when the epoch moved on.
    pub fn apply_in_queue_epoch(&self, epoch: u64, input: MatchInput) -> Option<Outcome> {
        let slot = self.inner.slot.write().unwrap_or_else(|e| e.into_inner());
        if slot.queue_epoch != epoch {
            return None;
        }
        Some(self.commit(slot, input))
    }

    /// Full reset (logout, leaving the matchmaking flow).
    pub fn reset(&self) -> Outcome {
        self.apply(MatchInput::Reset)
    }

    fn commit(&self, mut slot: RwLockWriteGuard<'_, SessionSlot>, input: MatchInput) -> Outcome {
        let is_join = matches!(input, MatchInput::JoinQueue);
        let before = slot.session.phase;
        let outcome = slot.session.apply(input);
        if !outcome.is_applied() {
            return outcome;
        }
        if is_join {
            slot.queue_epoch += 1;
        }
        let after = slot.session.clone();
        // Publish under the lock so subscribers see transitions in order.
        self.inner.changes.send(after.clone());
        drop(slot);

        if before != after.phase {
            tracing::info!(
                "match: {before} -> {}{}",
                after.phase,
                after
                    .match_id
                    .as_deref()
                    .map(|id| format!(" ({id})"))
                    .unwrap_or_default(),
            );
        }
        outcome
    }
}
