//! Runtime-agnostic spawning and timers
//!
//! The engine spawns its pass driver and deferred listener failures through
//! a [`Spawner`], and races lifecycle operations against [`sleep`]. The
//! concrete runtime is picked with the `smol` or `tokio` feature; `smol` wins
//! when both are enabled.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

#[cfg(not(any(feature = "smol", feature = "tokio")))]
compile_error!("One of the runtime features must be enabled: smol or tokio");

/// A spawner that can run futures in the background
pub trait Spawner: Send + Sync {
    /// Spawn a future and detach it; it runs to completion on its own
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

/// Spawner for the Smol runtime
#[cfg(feature = "smol")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SmolSpawner;

#[cfg(feature = "smol")]
impl Spawner for SmolSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        smol::spawn(future).detach();
    }
}

/// Spawner for the Tokio runtime. Must be used from inside a runtime.
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSpawner;

#[cfg(feature = "tokio")]
impl Spawner for TokioSpawner {
    fn spawn(&self, future: BoxFuture<'static, ()>) {
        tokio::spawn(future);
    }
}

/// Spawner for the runtime selected by the enabled feature
pub fn default_spawner() -> Arc<dyn Spawner> {
    #[cfg(feature = "smol")]
    {
        Arc::new(SmolSpawner)
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        Arc::new(TokioSpawner)
    }

    #[cfg(not(any(feature = "smol", feature = "tokio")))]
    {
        unreachable!()
    }
}

/// Sleep for the specified duration using the selected runtime
pub async fn sleep(duration: Duration) {
    #[cfg(feature = "smol")]
    {
        smol::Timer::after(duration).await;
    }

    #[cfg(all(feature = "tokio", not(feature = "smol")))]
    {
        tokio::time::sleep(duration).await;
    }
}
