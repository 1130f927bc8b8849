//! The four public lifecycle signals of a [`Connection`](crate::Connection).

/// One occurrence on one of the connection's public event channels.
///
/// Each variant corresponds 1:1 to a signal of the underlying transport and
/// carries its payload unmodified. Events are delivered in the order the
/// connection task observes them; nothing is buffered, merged or reordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The transport finished its opening handshake.
    Connected,

    /// Negotiation or the transport failed. May fire before or instead of
    /// [`Connected`](ConnectionEvent::Connected).
    ConnectionError {
        /// Human-readable diagnostic.
        reason: String,
    },

    /// The transport closed. Terminal for that transport instance.
    Closed {
        /// WebSocket close status code.
        status_code: u16,
        /// Close reason text.
        reason: String,
        /// Whether the closing handshake completed.
        was_clean: bool,
    },

    /// One inbound text frame.
    Message(String),
}
