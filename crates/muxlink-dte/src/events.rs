//! Asynchronous notifications published by the DTE.

use tokio::sync::broadcast;

/// Events published on the DTE's event sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// A line (or frame) arrived that no handler consumed.
    UnknownLine(String),
    /// The link entered PPP mode.
    PppStart,
    /// The link is leaving PPP mode.
    PppStop,
}

/// Multi-subscriber event sink backed by a broadcast channel.
pub(crate) struct EventSink {
    tx: broadcast::Sender<ModemEvent>,
}

impl EventSink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Delivery is best-effort: an error only means
    /// nobody is subscribed.
    pub(crate) fn publish(&self, event: ModemEvent) {
        let _ = self.tx.send(event);
    }
}
