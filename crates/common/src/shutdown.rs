//! Cleanup registry run on interruption.
//!
//! Components that own external resources (a recorder process, an OBS
//! recording, a browser driver) register a [`CleanupHook`] while the
//! resource is live and unregister it once released. On SIGINT/SIGTERM the
//! binary calls [`CleanupRegistry::run_all`] before exiting.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// A best-effort release action.
#[async_trait]
pub trait CleanupHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Release the resource. Must not panic and should not block for long.
    async fn run(&self);
}

/// Handle returned by [`CleanupRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookId(u64);

#[derive(Default)]
struct Inner {
    next_id: u64,
    hooks: Vec<(HookId, Arc<dyn CleanupHook>)>,
}

/// Shared list of pending cleanup hooks.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, hook: Arc<dyn CleanupHook>) -> HookId {
        let mut inner = self.lock();
        let id = HookId(inner.next_id);
        inner.next_id += 1;
        tracing::debug!(hook = hook.name(), "Registered cleanup hook");
        inner.hooks.push((id, hook));
        id
    }

    pub fn unregister(&self, id: HookId) {
        self.lock().hooks.retain(|(hook_id, _)| *hook_id != id);
    }

    pub fn len(&self) -> usize {
        self.lock().hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain and run every hook, most recently registered first.
    pub async fn run_all(&self) {
        let hooks: Vec<_> = {
            let mut inner = self.lock();
            inner.hooks.drain(..).rev().collect()
        };
        for (_, hook) in hooks {
            tracing::info!(hook = hook.name(), "Running cleanup hook");
            hook.run().await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}

/// Exit code for a process terminated by `signo`.
pub fn signal_exit_code(signo: i32) -> i32 {
    128 + signo
}
