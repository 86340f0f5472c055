//! Lifecycle signal bus.
//!
//! Handlers are registered per [`Signal`] and per [`Sender`]: either a model
//! type or the root channel. Sending invokes the handlers registered under
//! exactly that sender, synchronously and in registration order. A handler
//! error aborts the send and propagates to the lifecycle operation that fired
//! it.
//!
//! Disconnecting tombstones the handler's slot, so [`SlotId`]s stay valid and
//! a handler may disconnect itself (or others) while a send is in progress.
//!
//! ```ignore
//! use docmodel::signal::{signals, Sender, Signal};
//!
//! let slot = signals().connect(Signal::PostCreate, Sender::model::<Post>(), |event| {
//!     let post = event.instance::<Post>().unwrap();
//!     println!("created {:?}", post.title);
//!     Ok(())
//! });
//! signals().disconnect(Signal::PostCreate, Sender::model::<Post>(), slot);
//! ```

use bson::oid::ObjectId;
use dashmap::DashMap;
use std::{
    any::{Any, TypeId},
    sync::{Arc, LazyLock},
};

use crate::error::DocumentStoreResult;

/// Lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    PreCreate,
    PostCreate,
    PreUpdate,
    PostUpdate,
    WillErase,
    Recycled,
    Revived,
}

/// The channel a handler listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sender {
    /// The global channel.
    Root,
    /// Events fired by one model type.
    Model(TypeId),
}

impl Sender {
    pub fn model<M: Any>() -> Self {
        Sender::Model(TypeId::of::<M>())
    }
}

/// Stable index of a connected handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

/// Context handed to handlers.
pub struct SignalEvent<'a> {
    pub signal: Signal,
    pub sender: Sender,
    /// Collection of the model that fired the event.
    pub collection: &'a str,
    /// Identifier of the instance, `None` before its first save.
    pub id: Option<ObjectId>,
    instance: &'a (dyn Any + Send + Sync),
}

impl<'a> SignalEvent<'a> {
    pub fn new(
        signal: Signal,
        sender: Sender,
        collection: &'a str,
        id: Option<ObjectId>,
        instance: &'a (dyn Any + Send + Sync),
    ) -> Self {
        SignalEvent { signal, sender, collection, id, instance }
    }

    /// The instance the event is about, when it is an `M`.
    pub fn instance<M: Any>(&self) -> Option<&M> {
        self.instance.downcast_ref::<M>()
    }
}

pub type Handler = Arc<dyn Fn(&SignalEvent<'_>) -> DocumentStoreResult<()> + Send + Sync>;

/// Registry of handlers.
#[derive(Default)]
pub struct SignalBus {
    handlers: DashMap<(Signal, Sender), Vec<Option<Handler>>>,
}

impl SignalBus {
    pub fn new() -> Self {
        SignalBus::default()
    }

    /// Appends a handler and returns its slot.
    pub fn connect<F>(&self, signal: Signal, sender: Sender, handler: F) -> SlotId
    where
        F: Fn(&SignalEvent<'_>) -> DocumentStoreResult<()> + Send + Sync + 'static,
    {
        let mut slots = self.handlers.entry((signal, sender)).or_default();
        slots.push(Some(Arc::new(handler)));
        SlotId(slots.len() - 1)
    }

    /// Clears a slot. Other slots keep their indices.
    pub fn disconnect(&self, signal: Signal, sender: Sender, slot: SlotId) -> bool {
        self.handlers
            .get_mut(&(signal, sender))
            .and_then(|mut slots| slots.get_mut(slot.0).and_then(Option::take))
            .is_some()
    }

    /// Invokes every live handler registered under the event's signal and sender.
    ///
    /// # Errors
    ///
    /// Returns the first handler error; later handlers are not invoked.
    pub fn send(&self, event: &SignalEvent<'_>) -> DocumentStoreResult<()> {
        // snapshot so handlers can connect or disconnect without deadlocking the map
        let handlers: Vec<Handler> = match self.handlers.get(&(event.signal, event.sender)) {
            Some(slots) => slots.iter().flatten().cloned().collect(),
            None => return Ok(()),
        };

        tracing::trace!(signal = ?event.signal, collection = event.collection, handlers = handlers.len(), "sending signal");
        for handler in handlers {
            handler(event)?;
        }
        Ok(())
    }

    /// Number of live handlers for a signal and sender.
    pub fn receivers(&self, signal: Signal, sender: Sender) -> usize {
        self.handlers
            .get(&(signal, sender))
            .map_or(0, |slots| slots.iter().flatten().count())
    }

    /// Drops every handler.
    pub fn clear(&self) {
        self.handlers.clear();
    }
}

static SIGNALS: LazyLock<SignalBus> = LazyLock::new(SignalBus::new);

/// The process-wide bus models fire their lifecycle events on.
pub fn signals() -> &'static SignalBus {
    &SIGNALS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentStoreError;
    use std::sync::Mutex;

    struct Thing;

    #[test]
    fn disconnect_keeps_other_slots() {
        let bus = SignalBus::new();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sender = Sender::model::<Thing>();

        let slots = (0..3)
            .map(|n| {
                let calls = calls.clone();
                bus.connect(Signal::PreCreate, sender, move |_| {
                    calls.lock().unwrap().push(n);
                    Ok(())
                })
            })
            .collect::<Vec<_>>();

        assert!(bus.disconnect(Signal::PreCreate, sender, slots[1]));
        assert!(!bus.disconnect(Signal::PreCreate, sender, slots[1]));
        assert_eq!(bus.receivers(Signal::PreCreate, sender), 2);

        bus.send(&SignalEvent::new(Signal::PreCreate, sender, "thing", None, &Thing))
            .unwrap();
        assert_eq!(*calls.lock().unwrap(), vec![0, 2]);

        let late = bus.connect(Signal::PreCreate, sender, |_| Ok(()));
        assert_eq!(late, SlotId(3));
    }

    #[test]
    fn sends_only_to_the_given_sender() {
        let bus = SignalBus::new();
        let hits = Arc::new(Mutex::new(0));

        let counter = hits.clone();
        bus.connect(Signal::Recycled, Sender::Root, move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        bus.send(&SignalEvent::new(Signal::Recycled, Sender::model::<Thing>(), "thing", None, &Thing))
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), 0);

        bus.send(&SignalEvent::new(Signal::Recycled, Sender::Root, "thing", None, &Thing))
            .unwrap();
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[test]
    fn handler_errors_stop_the_send() {
        let bus = SignalBus::new();
        let reached = Arc::new(Mutex::new(false));

        bus.connect(Signal::WillErase, Sender::Root, |_| {
            Err(DocumentStoreError::Signal("refused".into()))
        });
        let flag = reached.clone();
        bus.connect(Signal::WillErase, Sender::Root, move |_| {
            *flag.lock().unwrap() = true;
            Ok(())
        });

        let result = bus.send(&SignalEvent::new(Signal::WillErase, Sender::Root, "thing", None, &Thing));
        assert!(matches!(result, Err(DocumentStoreError::Signal(_))));
        assert!(!*reached.lock().unwrap());
    }

    #[test]
    fn handlers_may_disconnect_during_send() {
        let bus = Arc::new(SignalBus::new());
        let slot = Arc::new(Mutex::new(None));

        let inner_bus = bus.clone();
        let inner_slot = slot.clone();
        let id = bus.connect(Signal::PostUpdate, Sender::Root, move |_| {
            if let Some(slot) = inner_slot.lock().unwrap().take() {
                inner_bus.disconnect(Signal::PostUpdate, Sender::Root, slot);
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(id);

        let event = SignalEvent::new(Signal::PostUpdate, Sender::Root, "thing", None, &Thing);
        bus.send(&event).unwrap();
        assert_eq!(bus.receivers(Signal::PostUpdate, Sender::Root), 0);
    }
}
