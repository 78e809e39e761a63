//! Error handlers for unit failures.
//!
//! Unit failures never reject unrelated callers; they are reported here
//! instead. With no handler registered a failure is only logged.

use crate::Error;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Callback receiving reported failures
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Identifies a registered error handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

/// Registered error handlers
#[derive(Default)]
pub struct ErrorHandlers {
    handlers: RwLock<Vec<(HandlerId, ErrorHandler)>>,
}

impl ErrorHandlers {
    /// Create an empty handler list
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler
    pub fn add<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        let id = HandlerId(Uuid::new_v4());
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler; returns whether it was registered
    pub fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        handlers.len() != before
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Deliver a failure to every handler
    pub fn report(&self, err: &Error) {
        let handlers: Vec<ErrorHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();

        if handlers.is_empty() {
            error!("Unhandled unit error: {}", err);
            return;
        }

        for handler in handlers {
            handler(err);
        }
    }
}
