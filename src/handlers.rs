//! Observer registry backing the connection's public event channels.
//!
//! Every channel keeps its own ordered subscriber list. Dispatch snapshots the
//! list before invoking anything, so a callback may subscribe or unsubscribe
//! (on any channel) without deadlocking. A panicking callback is logged and
//! skipped; the remaining subscribers still run.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::error;

use crate::event::ConnectionEvent;

type ConnectedFn = dyn Fn() + Send + Sync;
type ConnectionErrorFn = dyn Fn(&str) + Send + Sync;
type ClosedFn = dyn Fn(u16, &str, bool) + Send + Sync;
type MessageFn = dyn Fn(&str) + Send + Sync;

/// Handle returned by every `on_*` registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Channel<F: ?Sized> {
    subscribers: Mutex<Vec<(SubscriptionId, Arc<F>)>>,
}

impl<F: ?Sized> Channel<F> {
    fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, id: SubscriptionId, callback: Arc<F>) {
        self.subscribers.lock().push((id, callback));
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    fn snapshot(&self) -> Vec<Arc<F>> {
        self.subscribers
            .lock()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect()
    }

    fn len(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Per-channel subscriber lists for `connected`, `connectionError`, `closed`
/// and `message`, plus any channel sinks handed out by
/// [`Connection::events`](crate::Connection::events).
///
/// Subscribers of one channel are notified in registration order.
pub struct EventHandlers {
    next_id: AtomicU64,
    connected: Channel<ConnectedFn>,
    connection_error: Channel<ConnectionErrorFn>,
    closed: Channel<ClosedFn>,
    message: Channel<MessageFn>,
    /// `None` once [`close_channels`](Self::close_channels) has run.
    sinks: Mutex<Option<Vec<mpsc::UnboundedSender<ConnectionEvent>>>>,
}

impl EventHandlers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connected: Channel::new(),
            connection_error: Channel::new(),
            closed: Channel::new(),
            message: Channel::new(),
            sinks: Mutex::new(Some(Vec::new())),
        }
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Subscribe to the `connected` channel.
    pub fn on_connected(&self, callback: impl Fn() + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id();
        self.connected.add(id, Arc::new(callback));
        id
    }

    /// Subscribe to the `connectionError` channel.
    pub fn on_connection_error(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.connection_error.add(id, Arc::new(callback));
        id
    }

    /// Subscribe to the `closed` channel. The callback receives
    /// `(status_code, reason, was_clean)`.
    pub fn on_closed(
        &self,
        callback: impl Fn(u16, &str, bool) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = self.next_id();
        self.closed.add(id, Arc::new(callback));
        id
    }

    /// Subscribe to the `message` channel.
    pub fn on_message(&self, callback: impl Fn(&str) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id();
        self.message.add(id, Arc::new(callback));
        id
    }

    /// Remove a subscription from whichever channel holds it.
    ///
    /// Returns `false` if the id was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.connected.remove(id)
            || self.connection_error.remove(id)
            || self.closed.remove(id)
            || self.message.remove(id)
    }

    /// Register a channel that receives every event on all four channels.
    ///
    /// The sink is dropped from the registry the first time a send fails
    /// because its receiver is gone. After [`close_channels`](Self::close_channels)
    /// the returned receiver yields `None` straight away.
    pub fn subscribe_channel(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(sinks) = self.sinks.lock().as_mut() {
            sinks.push(tx);
        }
        rx
    }

    /// Drop every channel sink so receivers see `None` after the events
    /// already queued. Callback subscriptions are unaffected.
    pub fn close_channels(&self) {
        self.sinks.lock().take();
    }

    /// Number of callback subscribers across all channels.
    pub fn subscriber_count(&self) -> usize {
        self.connected.len() + self.connection_error.len() + self.closed.len() + self.message.len()
    }

    /// Fan `event` out to the matching channel's subscribers, then to the sinks.
    pub fn dispatch(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Connected => {
                for cb in self.connected.snapshot() {
                    invoke("connected", || cb());
                }
            }
            ConnectionEvent::ConnectionError { reason } => {
                for cb in self.connection_error.snapshot() {
                    invoke("connectionError", || cb(reason));
                }
            }
            ConnectionEvent::Closed {
                status_code,
                reason,
                was_clean,
            } => {
                for cb in self.closed.snapshot() {
                    invoke("closed", || cb(*status_code, reason, *was_clean));
                }
            }
            ConnectionEvent::Message(text) => {
                for cb in self.message.snapshot() {
                    invoke("message", || cb(text));
                }
            }
        }

        if let Some(sinks) = self.sinks.lock().as_mut() {
            sinks.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

fn invoke(channel: &'static str, callback: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
        error!(
            channel,
            "event subscriber panicked: {}",
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Default for EventHandlers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("connected", &self.connected.len())
            .field("connection_error", &self.connection_error.len())
            .field("closed", &self.closed.len())
            .field("message", &self.message.len())
            .field("sinks", &self.sinks.lock().as_ref().map_or(0, Vec::len))
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribers_run_in_registration_order() {
        let handlers = EventHandlers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for n in 0..3 {
            let seen = Arc::clone(&seen);
            handlers.on_message(move |text| seen.lock().push(format!("{n}:{text}")));
        }

        handlers.dispatch(&ConnectionEvent::Message("hi".into()));
        assert_eq!(*seen.lock(), vec!["0:hi", "1:hi", "2:hi"]);
    }

    #[test]
    fn dispatch_only_reaches_matching_channel() {
        let handlers = EventHandlers::new();
        let connected = Arc::new(AtomicUsize::new(0));
        let messages = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&connected);
        handlers.on_connected(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        let m = Arc::clone(&messages);
        handlers.on_message(move |_| {
            m.fetch_add(1, Ordering::SeqCst);
        });

        handlers.dispatch(&ConnectionEvent::Connected);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(messages.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closed_payload_is_passed_through() {
        let handlers = EventHandlers::new();
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        handlers.on_closed(move |code, reason, clean| {
            *s.lock() = Some((code, reason.to_string(), clean));
        });

        handlers.dispatch(&ConnectionEvent::Closed {
            status_code: 1000,
            reason: "normal".into(),
            was_clean: true,
        });
        assert_eq!(*seen.lock(), Some((1000, "normal".to_string(), true)));
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let handlers = EventHandlers::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = handlers.on_connection_error(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handlers.unsubscribe(id));
        assert!(!handlers.unsubscribe(id));
        handlers.dispatch(&ConnectionEvent::ConnectionError {
            reason: "boom".into(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(handlers.subscriber_count(), 0);
    }

    #[test]
    fn callback_may_subscribe_during_dispatch() {
        let handlers = Arc::new(EventHandlers::new());
        let inner = Arc::clone(&handlers);
        handlers.on_connected(move || {
            inner.on_message(|_| {});
        });

        handlers.dispatch(&ConnectionEvent::Connected);
        assert_eq!(handlers.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn channel_sink_receives_every_event() {
        let handlers = EventHandlers::new();
        let mut rx = handlers.subscribe_channel();

        handlers.dispatch(&ConnectionEvent::Connected);
        handlers.dispatch(&ConnectionEvent::Message("a".into()));

        assert_eq!(rx.recv().await, Some(ConnectionEvent::Connected));
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Message("a".into())));
    }

    #[test]
    fn dropped_sink_is_pruned() {
        let handlers = EventHandlers::new();
        drop(handlers.subscribe_channel());
        handlers.dispatch(&ConnectionEvent::Connected);
        assert_eq!(handlers.sinks.lock().as_ref().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn panicking_subscriber_does_not_stop_fan_out() {
        let handlers = EventHandlers::new();
        let mut rx = handlers.subscribe_channel();
        let count = Arc::new(AtomicUsize::new(0));

        handlers.on_message(|_| panic!("subscriber bug"));
        let c = Arc::clone(&count);
        handlers.on_message(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        handlers.dispatch(&ConnectionEvent::Message("a".into()));
        handlers.dispatch(&ConnectionEvent::Message("b".into()));

        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Message("a".into())));
        assert_eq!(rx.recv().await, Some(ConnectionEvent::Message("b".into())));
    }

    #[tokio::test]
    async fn closing_channels_ends_every_stream() {
        let handlers = EventHandlers::new();
        let mut early = handlers.subscribe_channel();
        handlers.dispatch(&ConnectionEvent::Connected);

        handlers.close_channels();
        handlers.dispatch(&ConnectionEvent::Message("dropped".into()));

        assert_eq!(early.recv().await, Some(ConnectionEvent::Connected));
        assert_eq!(early.recv().await, None);

        let mut late = handlers.subscribe_channel();
        assert_eq!(late.recv().await, None);
    }

    #[test]
    fn panic_message_reads_string_payloads() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
