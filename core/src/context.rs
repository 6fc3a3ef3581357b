//! Thread-local contextual `extra` values.
//!
//! [`Logger::contextualize`](crate::Logger::contextualize) pushes key-value
//! pairs for the current thread and returns a [`ContextGuard`]; dropping the
//! guard restores the previous context.

use serde_json::{Map, Value};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;

thread_local! {
    static CONTEXT: RefCell<Arc<Map<String, Value>>> = RefCell::new(Arc::new(Map::new()));
}

/// Restores the previous thread context when dropped.
///
/// The guard must be dropped on the thread that created it, so it is neither
/// `Send` nor `Sync`.
#[must_use = "the context is removed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    previous: Option<Arc<Map<String, Value>>>,
    _not_send: PhantomData<Rc<()>>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // The thread-local may already be gone during thread teardown.
            let _ = CONTEXT.try_with(|ctx| *ctx.borrow_mut() = previous);
        }
    }
}

/// Merges `values` into the current thread context.
pub(crate) fn push(values: Map<String, Value>) -> ContextGuard {
    let previous = CONTEXT.with(|ctx| {
        let mut ctx = ctx.borrow_mut();
        let mut merged = (**ctx).clone();
        merged.extend(values);
        std::mem::replace(&mut *ctx, Arc::new(merged))
    });
    ContextGuard {
        previous: Some(previous),
        _not_send: PhantomData,
    }
}

/// Snapshot of the current thread context.
#[must_use]
pub fn current() -> Arc<Map<String, Value>> {
    CONTEXT.with(|ctx| Arc::clone(&ctx.borrow()))
}
