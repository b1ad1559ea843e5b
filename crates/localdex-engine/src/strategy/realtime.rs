use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use localdex_core::config::StrategyName;
use localdex_core::error::Result;
use tracing::{debug, error, info};

use super::{apply_event, Counters, IndexingStrategy, StrategyStats};
use crate::debounce::Debouncer;
use crate::engine::IndexEngine;
use crate::events::FileEvent;
use crate::guard::PathGuard;

struct Shared {
    engine: Arc<IndexEngine>,
    guard: PathGuard,
    /// Latest event per path while its debounce timer is armed.
    latest: Mutex<HashMap<String, FileEvent>>,
    counters: Counters,
}

impl Shared {
    async fn fire(&self, path: String) {
        let event = match self.latest.lock() {
            Ok(mut latest) => latest.remove(&path),
            Err(_) => None,
        };
        let Some(mut event) = event else { return };
        if !self.guard.begin(&event) {
            debug!(path = %path, "write in flight; event parked");
            return;
        }
        loop {
            match apply_event(&self.engine, &event).await {
                Ok(()) => self.counters.record(true),
                Err(e) => {
                    self.counters.record(false);
                    error!(path = %event.path, error = %e, "applying file change failed");
                }
            }
            match self.guard.finish(&path) {
                Some(next) => event = next,
                None => break,
            }
        }
    }
}

/// Applies each change as soon as its path has been quiet for the debounce
/// window.
pub struct RealtimeStrategy {
    shared: Arc<Shared>,
    debouncer: Debouncer<String>,
    active: AtomicBool,
}

impl RealtimeStrategy {
    pub fn new(engine: Arc<IndexEngine>, window: Duration) -> Self {
        let shared = Arc::new(Shared {
            engine,
            guard: PathGuard::new(),
            latest: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        });
        let handler_shared = shared.clone();
        let debouncer = Debouncer::new(
            window,
            Arc::new(move |path: String| {
                let shared = handler_shared.clone();
                async move { shared.fire(path).await }.boxed()
            }),
        );
        Self { shared, debouncer, active: AtomicBool::new(false) }
    }
}

#[async_trait]
impl IndexingStrategy for RealtimeStrategy {
    fn name(&self) -> StrategyName {
        StrategyName::Realtime
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.active.store(true, Ordering::SeqCst);
        info!(window_ms = u64::try_from(self.debouncer.window().as_millis()).unwrap_or(u64::MAX), "realtime strategy started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.active.store(false, Ordering::SeqCst);
        // Pending timers are applied, not dropped.
        self.debouncer.fire_all().await;
        info!("realtime strategy stopped");
        Ok(())
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn on_file_event(&self, event: FileEvent) -> Result<()> {
        if !self.is_active() {
            debug!(path = %event.path, "realtime strategy inactive; event ignored");
            return Ok(());
        }
        let path = event.path.clone();
        if let Ok(mut latest) = self.shared.latest.lock() {
            latest.insert(path.clone(), event);
        }
        self.debouncer.trigger(path);
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn stats(&self) -> StrategyStats {
        let pending = self.debouncer.pending() + self.shared.guard.parked();
        self.shared.counters.stats(StrategyName::Realtime, self.is_active(), pending)
    }
}
