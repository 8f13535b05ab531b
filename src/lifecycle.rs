//! Process lifecycle: shutdown signalling and cache trimming hooks.
//!
//! Owned by the process bootstrap and handed to the components that need
//! graceful shutdown or can shed memory on request.
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info};

/// Something that can drop cached state when memory gets tight
pub trait CacheTrim: Send + Sync {
    fn name(&self) -> &str;
    fn trim(&self);
}

type ShutdownHook = Box<dyn FnOnce() + Send>;

pub struct Lifecycle {
    shutdown_tx: watch::Sender<bool>,
    hooks: Mutex<Vec<(String, ShutdownHook)>>,
    trims: Mutex<Vec<Arc<dyn CacheTrim>>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            hooks: Mutex::new(Vec::new()),
            trims: Mutex::new(Vec::new()),
        }
    }

    /// Receiver that flips to `true` once shutdown starts
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    pub fn on_shutdown<F>(&self, name: &str, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.hooks.lock().push((name.to_string(), Box::new(hook)));
    }

    pub fn register_trim(&self, trim: Arc<dyn CacheTrim>) {
        self.trims.lock().push(trim);
    }

    pub fn trim_caches(&self) {
        let trims = self.trims.lock().clone();
        for trim in trims {
            debug!("Trimming cache {}", trim.name());
            trim.trim();
        }
    }

    /// Signal shutdown and run hooks in reverse registration order. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        let hooks: Vec<_> = self.hooks.lock().drain(..).collect();
        for (name, hook) in hooks.into_iter().rev() {
            info!("Running shutdown hook {}", name);
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTrim(AtomicUsize);

    impl CacheTrim for CountingTrim {
        fn name(&self) -> &str {
            "counting"
        }
        fn trim(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_shutdown_runs_hooks_once_in_reverse() {
        let lifecycle = Lifecycle::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            lifecycle.on_shutdown(&format!("hook-{}", i), move || order.lock().push(i));
        }
        let signal = lifecycle.shutdown_signal();
        assert!(!*signal.borrow());

        lifecycle.shutdown();
        lifecycle.shutdown();

        assert!(*signal.borrow());
        assert!(lifecycle.is_shutting_down());
        assert_eq!(*order.lock(), vec![2, 1, 0]);
    }

    #[test]
    fn test_trim_caches() {
        let lifecycle = Lifecycle::new();
        let trim = Arc::new(CountingTrim(AtomicUsize::new(0)));
        lifecycle.register_trim(trim.clone());
        lifecycle.trim_caches();
        lifecycle.trim_caches();
        assert_eq!(trim.0.load(Ordering::SeqCst), 2);
    }
}
