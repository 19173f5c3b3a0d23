//! Process-wide critical section for native numeric work
//!
//! Encoder inference, model loading and index (de)serialization all run through
//! one shared gate. Two threads must never be inside any of them at once.

use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Shared gate around the encoder and index I/O
///
/// Cloning is cheap; all clones guard the same section.
#[derive(Clone, Default)]
pub struct NativeRuntime {
    gate: Arc<Mutex<()>>,
}

impl NativeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the critical section, blocking the current thread until it is free.
    ///
    /// Only call this from a blocking context (a `spawn_blocking` worker or a
    /// synchronous tool), never directly on an async task.
    pub fn enter(&self) -> MutexGuard<'_, ()> {
        // A panic inside the section leaves no state behind the unit value.
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` on a blocking worker while holding the critical section.
    pub async fn run<F, T>(&self, f: F) -> Result<T, RuntimeError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let runtime = self.clone();
        let result = tokio::task::spawn_blocking(move || {
            let _guard = runtime.enter();
            f()
        })
        .await?;
        Ok(result)
    }

    /// Whether another thread currently holds the section
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }
}

impl std::fmt::Debug for NativeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeRuntime")
            .field("busy", &self.is_busy())
            .finish()
    }
}
