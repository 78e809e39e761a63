//! Explicit unload requests

use crate::{Error, Result};
use futures::channel::oneshot;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// How an explicit unload is carried out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnloadOptions {
    /// Leave a mounted unit alone and complete once a later pass has
    /// unmounted and unloaded it. By default the unit is unmounted and
    /// unloaded right away.
    pub wait_for_unmount: bool,
}

impl UnloadOptions {
    /// Options that wait for the unit to be unmounted by routing
    pub fn wait_for_unmount() -> Self {
        Self {
            wait_for_unmount: true,
        }
    }
}

/// Callers waiting on unload requests, keyed by unit name
#[derive(Default)]
pub(crate) struct UnloadQueue {
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<Result<()>>>>>,
}

impl UnloadQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for the unload of `name`. The flag is `true` for the first waiter
    /// of a request, `false` when the request was already pending.
    pub(crate) fn subscribe(&self, name: &str) -> (oneshot::Receiver<Result<()>>, bool) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let queue = waiters.entry(name.to_string()).or_default();
        let first = queue.is_empty();
        queue.push(tx);
        (rx, first)
    }

    /// Whether anyone waits on `name`
    pub(crate) fn is_pending(&self, name: &str) -> bool {
        self.waiters
            .lock()
            .get(name)
            .is_some_and(|queue| !queue.is_empty())
    }

    /// Complete every waiter of `name` with `result`
    pub(crate) fn finish(&self, name: &str, result: Result<()>) {
        let Some(queue) = self.waiters.lock().remove(name) else {
            return;
        };

        debug!("Completing {} unload waiter(s) for unit {}", queue.len(), name);
        for tx in queue {
            // A waiter that went away does not need an answer
            let _ = tx.send(result.clone());
        }
    }
}

/// Await a subscription, mapping a dropped sender to [`Error::Abandoned`]
pub(crate) async fn wait(rx: oneshot::Receiver<Result<()>>) -> Result<()> {
    match rx.await {
        Ok(result) => result,
        Err(_) => Err(Error::Abandoned),
    }
}
