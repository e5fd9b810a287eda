//! Handler registries.
//!
//! # Design invariant
//!
//! Handlers are identified by **pointer identity** (`Arc` address), never by
//! value. Every operation on a registry goes through one guard, and dispatch
//! keeps that guard held for the whole lookup-then-invoke. Consequence:
//!
//! > once `remove_by_handler` has returned, no dispatch can invoke the
//! > removed handler.
//!
//! The guard is reentrant. A handler running on the dispatch thread may call
//! back into the gateway (place a follow-up order, cancel its own
//! subscription) and touch the same registry without deadlocking; other
//! threads block until the invocation finishes. No `RefCell` borrow is ever
//! held across a handler call.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::ReentrantMutex;
use tracing::debug;

/// `true` when both `Arc`s point at the same handler object.
///
/// Compares data addresses only; two `Arc<dyn Trait>` to the same object
/// compare equal even if their vtable pointers differ.
pub fn same_handler<H: ?Sized>(a: &Arc<H>, b: &Arc<H>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

// ---------------------------------------------------------------------------
// CallbackRegistry
// ---------------------------------------------------------------------------

/// Request id → handler awaiting that request's results.
pub struct CallbackRegistry<H: ?Sized> {
    name: &'static str,
    entries: ReentrantMutex<RefCell<HashMap<i32, Arc<H>>>>,
}

impl<H: ?Sized> CallbackRegistry<H> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: ReentrantMutex::new(RefCell::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last writer wins. The replaced handler (if any) is returned and the
    /// overwrite is logged at debug.
    pub fn register(&self, id: i32, handler: Arc<H>) -> Option<Arc<H>> {
        let guard = self.entries.lock();
        let replaced = guard.borrow_mut().insert(id, handler);
        if replaced.is_some() {
            debug!(registry = self.name, id, "handler overwritten");
        }
        replaced
    }

    pub fn lookup(&self, id: i32) -> Option<Arc<H>> {
        let guard = self.entries.lock();
        let found = guard.borrow().get(&id).cloned();
        found
    }

    pub fn contains(&self, id: i32) -> bool {
        let guard = self.entries.lock();
        let found = guard.borrow().contains_key(&id);
        found
    }

    pub fn remove(&self, id: i32) -> Option<Arc<H>> {
        let guard = self.entries.lock();
        let removed = guard.borrow_mut().remove(&id);
        removed
    }

    /// Linear identity scan. Removes the first match and returns its id;
    /// `None` when the handler is not (or no longer) registered.
    pub fn remove_by_handler(&self, handler: &Arc<H>) -> Option<i32> {
        let guard = self.entries.lock();
        let mut map = guard.borrow_mut();
        let id = map
            .iter()
            .find(|(_, h)| same_handler(h, handler))
            .map(|(id, _)| *id)?;
        map.remove(&id);
        Some(id)
    }

    /// Lookup-then-invoke under the registry guard.
    pub fn with_handler<R>(&self, id: i32, f: impl FnOnce(&H) -> R) -> Option<R> {
        let guard = self.entries.lock();
        let handler = guard.borrow().get(&id).cloned();
        let out = handler.map(|h| f(&*h));
        drop(guard);
        out
    }

    /// Remove-then-invoke under the registry guard (end-of-stream events).
    pub fn remove_with<R>(&self, id: i32, f: impl FnOnce(&H) -> R) -> Option<R> {
        let guard = self.entries.lock();
        let handler = guard.borrow_mut().remove(&id);
        let out = handler.map(|h| f(&*h));
        drop(guard);
        out
    }

    /// Invoke every registered handler, in unspecified order.
    pub fn for_each(&self, mut f: impl FnMut(i32, &H)) {
        let guard = self.entries.lock();
        let snapshot: Vec<(i32, Arc<H>)> = guard
            .borrow()
            .iter()
            .map(|(id, h)| (*id, Arc::clone(h)))
            .collect();
        for (id, h) in &snapshot {
            f(*id, &**h);
        }
        drop(guard);
    }

    pub fn ids(&self) -> Vec<i32> {
        let guard = self.entries.lock();
        let mut ids: Vec<i32> = guard.borrow().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        let guard = self.entries.lock();
        let n = guard.borrow().len();
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// HandlerSet
// ---------------------------------------------------------------------------

/// Unkeyed broadcast category (account updates, live orders, positions, ...).
pub struct HandlerSet<H: ?Sized> {
    name: &'static str,
    entries: ReentrantMutex<RefCell<Vec<Arc<H>>>>,
}

impl<H: ?Sized> HandlerSet<H> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Returns `false` (and leaves the set unchanged) if the handler is
    /// already a member.
    pub fn add(&self, handler: Arc<H>) -> bool {
        let guard = self.entries.lock();
        let mut v = guard.borrow_mut();
        if v.iter().any(|h| same_handler(h, &handler)) {
            debug!(set = self.name, "handler already registered");
            return false;
        }
        v.push(handler);
        true
    }

    pub fn remove(&self, handler: &Arc<H>) -> bool {
        let guard = self.entries.lock();
        let mut v = guard.borrow_mut();
        match v.iter().position(|h| same_handler(h, handler)) {
            Some(i) => {
                v.remove(i);
                true
            }
            None => false,
        }
    }

    /// Single-slot categories (time, bulletins, trade reports): the new
    /// handler replaces every previous one.
    pub fn replace(&self, handler: Arc<H>) {
        let guard = self.entries.lock();
        let mut v = guard.borrow_mut();
        if !v.is_empty() {
            debug!(set = self.name, replaced = v.len(), "handler replaced");
        }
        v.clear();
        v.push(handler);
    }

    pub fn contains(&self, handler: &Arc<H>) -> bool {
        let guard = self.entries.lock();
        let found = guard.borrow().iter().any(|h| same_handler(h, handler));
        found
    }

    /// Invoke every member in insertion order. The guard is held for the
    /// whole fan-out; members added or removed by a handler on this thread
    /// take effect on the next event.
    pub fn for_each(&self, mut f: impl FnMut(&H)) {
        let guard = self.entries.lock();
        let snapshot: Vec<Arc<H>> = guard.borrow().clone();
        for h in &snapshot {
            f(&**h);
        }
        drop(guard);
    }

    pub fn len(&self) -> usize {
        let guard = self.entries.lock();
        let n = guard.borrow().len();
        n
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
