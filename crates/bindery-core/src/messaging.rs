#![forbid(unsafe_code)]

//! Synchronous publish/subscribe bus for object notifications.
//!
//! The bus has two typed channels: [`PropertyChanged`] and [`EventEmitted`].
//! Publishing is a synchronous fan-out: every live subscriber runs before
//! [`Channel::emit`] returns, with no batching or coalescing.
//!
//! # Architecture
//!
//! Subscribers are stored as `Weak` function pointers. The strong reference
//! lives inside the [`Subscription`] guard returned to the subscriber, so
//! dropping the guard unsubscribes. Dead entries are pruned lazily on the
//! next emission.
//!
//! # Invariants
//!
//! 1. Subscribers run in registration order.
//! 2. No `RefCell` borrow is held while a subscriber runs, so subscribers may
//!    publish, subscribe or drop guards re-entrantly.
//! 3. A subscriber added during an emission is not called by that emission.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::event::EventRef;
use crate::object::ObjectRef;
use crate::value::Value;

/// Payload of the `propertyChanged` channel.
#[derive(Debug, Clone)]
pub struct PropertyChanged {
    pub sender: ObjectRef,
    pub property: String,
    pub value: Value,
}

/// Payload of the `eventEmitted` channel, also passed to actions.
#[derive(Debug, Clone)]
pub struct EventEmitted {
    pub sender: ObjectRef,
    pub event_name: String,
    pub event: EventRef,
}

/// RAII guard that unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    _guard: Box<dyn Any>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

type Callback<T> = dyn Fn(&T);

/// One typed channel of the bus.
pub struct Channel<T> {
    subscribers: RefCell<Vec<Weak<Callback<T>>>>,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
        }
    }
}

impl<T: 'static> Channel<T> {
    /// Register a callback. It stays registered while the guard lives.
    pub fn subscribe(&self, callback: impl Fn(&T) + 'static) -> Subscription {
        let strong: Rc<Callback<T>> = Rc::new(callback);
        self.subscribers.borrow_mut().push(Rc::downgrade(&strong));
        Subscription {
            _guard: Box::new(strong),
        }
    }

    /// Deliver `message` to every live subscriber.
    pub fn emit(&self, message: &T) {
        let live: Vec<Rc<Callback<T>>> = {
            let mut subs = self.subscribers.borrow_mut();
            subs.retain(|w| w.strong_count() > 0);
            subs.iter().filter_map(Weak::upgrade).collect()
        };
        for callback in live {
            callback(message);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .borrow()
            .iter()
            .filter(|w| w.strong_count() > 0)
            .count()
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("subscribers", &self.subscribers.borrow().len())
            .finish()
    }
}

/// The bus owned by a [`Runtime`](crate::runtime::Runtime).
#[derive(Debug, Default)]
pub struct MessageBus {
    property_changed: Channel<PropertyChanged>,
    event_emitted: Channel<EventEmitted>,
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn property_changed(&self) -> &Channel<PropertyChanged> {
        &self.property_changed
    }

    #[must_use]
    pub fn event_emitted(&self) -> &Channel<EventEmitted> {
        &self.event_emitted
    }
}
