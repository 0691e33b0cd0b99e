//! AbortHandle - cancel the running stream from another task

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Cloneable handle to the token of the controller's current stream.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    slot: Arc<Mutex<Slot>>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the running stream, if any. Returns whether one was running.
    pub fn abort(&self) -> bool {
        match self.lock().token.take() {
            Some(token) => {
                token.cancel();
                tracing::info!("AbortHandle: stream cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().token.is_some()
    }

    /// Install a fresh token, cancelling any lingering one.
    pub(crate) fn install(&self) -> (u64, CancellationToken) {
        let token = CancellationToken::new();
        let mut slot = self.lock();
        if let Some(previous) = slot.token.replace(token.clone()) {
            tracing::debug!("AbortHandle: cancelling lingering stream");
            previous.cancel();
        }
        slot.generation += 1;
        (slot.generation, token)
    }

    /// Forget the token installed as `generation`; a newer one is left alone.
    pub(crate) fn clear(&self, generation: u64) {
        let mut slot = self.lock();
        if slot.generation == generation {
            slot.token = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
