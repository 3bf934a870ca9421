//! Change notification.
//!
//! Listeners are plain callbacks kept in registration order. Delivery is
//! synchronous on the caller's thread; a listener that panics is logged and
//! skipped, and the rest still run.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

/// What part of the engine state changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The active slot's identity or content changed
    CurrentChanged,
    /// Queue contents or order changed
    QueueChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentChanged => "current_changed",
            Self::QueueChanged => "queue_changed",
        }
    }
}

/// A committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// Engine clock time of the commit
    pub at: DateTime<Utc>,
}

/// Handle returned by registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<S> = Box<dyn FnMut(&ChangeEvent, &S)>;

/// Ordered set of change listeners over state `S`.
pub struct Listeners<S> {
    next_id: u64,
    entries: Vec<(ListenerId, Listener<S>)>,
}

impl<S> Listeners<S> {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// Register a listener. It runs after every listener registered before it.
    pub fn add<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ChangeEvent, &S) + 'static,
    {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(listener)));
        id
    }

    /// Unregister a listener. Returns false if it was not registered.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver an event to every listener, returning how many panicked.
    pub fn dispatch(&mut self, event: &ChangeEvent, state: &S) -> usize {
        let mut failures = 0;
        for (id, listener) in self.entries.iter_mut() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(event, state)));
            if let Err(payload) = outcome {
                failures += 1;
                error!(
                    listener = id.0,
                    kind = event.kind.as_str(),
                    panic = %panic_message(&*payload),
                    "Change listener panicked"
                );
            }
        }
        failures
    }
}

impl<S> Default for Listeners<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> fmt::Debug for Listeners<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn event(kind: ChangeKind) -> ChangeEvent {
        ChangeEvent {
            kind,
            at: DateTime::<Utc>::default(),
        }
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut listeners: Listeners<u32> = Listeners::new();

        for tag in ["first", "second", "third"] {
            let log = log.clone();
            listeners.add(move |e: &ChangeEvent, state: &u32| {
                log.borrow_mut().push((tag, e.kind, *state));
            });
        }

        listeners.dispatch(&event(ChangeKind::QueueChanged), &7);

        assert_eq!(
            *log.borrow(),
            vec![
                ("first", ChangeKind::QueueChanged, 7),
                ("second", ChangeKind::QueueChanged, 7),
                ("third", ChangeKind::QueueChanged, 7),
            ]
        );
    }

    #[test]
    fn test_remove() {
        let hits = Rc::new(RefCell::new(0));
        let mut listeners: Listeners<()> = Listeners::new();

        let h = hits.clone();
        let id = listeners.add(move |_: &ChangeEvent, _: &()| *h.borrow_mut() += 1);
        assert_eq!(listeners.len(), 1);

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        assert!(listeners.is_empty());

        listeners.dispatch(&event(ChangeKind::CurrentChanged), &());
        assert_eq!(*hits.borrow(), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_delivery() {
        let hits = Rc::new(RefCell::new(0));
        let mut listeners: Listeners<()> = Listeners::new();

        listeners.add(|_: &ChangeEvent, _: &()| panic!("listener blew up"));
        let h = hits.clone();
        listeners.add(move |_: &ChangeEvent, _: &()| *h.borrow_mut() += 1);

        let failures = listeners.dispatch(&event(ChangeKind::CurrentChanged), &());

        assert_eq!(failures, 1);
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"boom".to_string()), "boom");
        assert_eq!(panic_message(&42_i32), "non-string panic payload");
    }
}
