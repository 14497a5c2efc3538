//! Internal event bus: lossless fan-out to every subscriber.
//!
//! Multi-producer (the bus is `Clone`), multi-consumer, unbounded. Dropped
//! subscribers are pruned on the next publish.

use std::sync::{Arc, Mutex};

use crossbeam::channel::{Receiver, Sender, unbounded};

use super::event::Event;

#[derive(Clone, Default)]
pub struct MessageBus {
    subscribers: Arc<Mutex<Vec<Sender<Event>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new subscription receiving every event published from now on.
    pub fn subscribe(&self) -> Receiver<Event> {
        let (tx, rx) = unbounded();
        self.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, in subscription order.
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<Event>>> {
        // A poisoned lock means a publisher panicked mid-retain; the sender
        // list itself is still sound.
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
