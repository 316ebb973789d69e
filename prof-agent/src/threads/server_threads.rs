//! Profiler-owned service threads
//!
//! Sampling and reference-manager threads register here so that the
//! instrumentation runtime never profiles the profiler.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread::ThreadId;

use super::ThreadToken;

#[derive(Debug, Default)]
pub struct ServerThreads {
    threads: Mutex<HashSet<ThreadId>>,
}

/// Unregisters the calling thread when dropped
pub struct ServerThreadGuard {
    registry: Arc<ServerThreads>,
    thread: ThreadId,
}

impl Drop for ServerThreadGuard {
    fn drop(&mut self) {
        self.registry.threads.lock().remove(&self.thread);
    }
}

impl ServerThreads {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling thread for as long as the guard lives
    #[must_use]
    pub fn register_current(self: &Arc<Self>) -> ServerThreadGuard {
        let thread = std::thread::current().id();
        self.threads.lock().insert(thread);
        ServerThreadGuard { registry: Arc::clone(self), thread }
    }

    #[must_use]
    pub fn is_server_thread(&self, token: &ThreadToken) -> bool {
        token.os_thread().is_some_and(|id| self.threads.lock().contains(&id))
    }

    #[must_use]
    pub fn is_current_server_thread(&self) -> bool {
        self.threads.lock().contains(&std::thread::current().id())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.threads.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_scopes_registration() {
        let registry = Arc::new(ServerThreads::new());
        let token = ThreadToken::current().unwrap();
        assert!(!registry.is_server_thread(&token));
        {
            let _guard = registry.register_current();
            assert!(registry.is_current_server_thread());
            assert!(registry.is_server_thread(&token));
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detached_tokens_are_never_server_threads() {
        let registry = Arc::new(ServerThreads::new());
        let _guard = registry.register_current();
        assert!(!registry.is_server_thread(&ThreadToken::new("sim")));
    }
}
