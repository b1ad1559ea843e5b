//! Per-path processing guard.
//!
//! While a path is being written, further events for it are parked rather
//! than run concurrently or dropped. Only the latest parked event per path
//! is kept, and it is handed back when the in-flight write finishes.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::events::FileEvent;

#[derive(Default)]
struct Inner {
    in_flight: HashSet<String>,
    parked: HashMap<String, FileEvent>,
}

#[derive(Default)]
pub struct PathGuard {
    inner: Mutex<Inner>,
}

impl PathGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the event's path. Returns `false` (and parks the event) when
    /// the path is already being processed.
    pub fn begin(&self, event: &FileEvent) -> bool {
        let Ok(mut inner) = self.inner.lock() else { return false };
        if inner.in_flight.contains(&event.path) {
            inner.parked.insert(event.path.clone(), event.clone());
            return false;
        }
        inner.in_flight.insert(event.path.clone());
        true
    }

    /// Releases `path`, or keeps it claimed and returns the parked event
    /// that must be replayed next.
    pub fn finish(&self, path: &str) -> Option<FileEvent> {
        let Ok(mut inner) = self.inner.lock() else { return None };
        match inner.parked.remove(path) {
            Some(next) => Some(next),
            None => {
                inner.in_flight.remove(path);
                None
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.inner.lock().map(|i| i.in_flight.len()).unwrap_or(0)
    }

    pub fn parked(&self) -> usize {
        self.inner.lock().map(|i| i.parked.len()).unwrap_or(0)
    }
}
