//! Keyed debouncing with explicit timer handles.
//!
//! Each key has at most one armed timer. A new trigger for the key re-arms
//! it; when the window passes without another trigger the handler runs once
//! for that key. A handler that has started is never cancelled.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

pub type Handler<K> = Arc<dyn Fn(K) -> BoxFuture<'static, ()> + Send + Sync>;

type Timers<K> = Arc<Mutex<HashMap<K, (u64, JoinHandle<()>)>>>;

pub struct Debouncer<K> {
    window: Duration,
    handler: Handler<K>,
    timers: Timers<K>,
    seq: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(window: Duration, handler: Handler<K>) -> Self {
        Self { window, handler, timers: Arc::new(Mutex::new(HashMap::new())), seq: AtomicU64::new(0) }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Arms (or re-arms) the timer for `key`.
    pub fn trigger(&self, key: K) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let timers = self.timers.clone();
        let handler = self.handler.clone();
        let window = self.window;
        let Ok(mut map) = self.timers.lock() else { return };
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let still_armed = match timers.lock() {
                Ok(mut map) => match map.get(&task_key) {
                    Some((s, _)) if *s == seq => {
                        map.remove(&task_key);
                        true
                    }
                    _ => false,
                },
                Err(_) => false,
            };
            if still_armed {
                handler(task_key).await;
            }
        });
        if let Some((_, old)) = map.insert(key, (seq, handle)) {
            old.abort();
        }
    }

    /// Disarms every timer and returns the keys that were pending.
    pub fn cancel_all(&self) -> Vec<K> {
        let Ok(mut map) = self.timers.lock() else { return Vec::new() };
        map.drain()
            .map(|(k, (_, handle))| {
                handle.abort();
                k
            })
            .collect()
    }

    /// Runs the handler now for every pending key instead of waiting.
    pub async fn fire_all(&self) {
        for key in self.cancel_all() {
            (self.handler)(key).await;
        }
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        if let Ok(mut map) = self.timers.lock() {
            for (_, (_, handle)) in map.drain() {
                handle.abort();
            }
        }
    }
}
