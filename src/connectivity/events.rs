use chrono::{DateTime, Utc};
use futures_util::Stream;
use tokio::sync::mpsc;

/// Raw online/offline event from the host environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportSignal {
	Online,
	Offline,
}

/// Connectivity as confirmed by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
	Online,
	Offline,
}

/// Emitted once per confirmed offline-to-online transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequested {
	pub confirmed_at: DateTime<Utc>,
}

/// Sending half used by the host integration to report transport signals
#[derive(Debug, Clone)]
pub struct SignalSender {
	tx: mpsc::UnboundedSender<TransportSignal>,
}

impl SignalSender {
	/// Reports a signal; returns `false` once the monitor has stopped listening.
	pub fn send(&self, signal: TransportSignal) -> bool {
		self.tx.send(signal).is_ok()
	}
}

/// Creates a sender for transport signals and the stream the monitor consumes.
pub fn signal_channel() -> (SignalSender, impl Stream<Item = TransportSignal> + Send + Unpin) {
	let (tx, rx) = mpsc::unbounded_channel();
	let stream = futures_util::stream::unfold(rx, |mut rx| async move {
		rx.recv().await.map(|signal| (signal, rx))
	});
	(SignalSender { tx }, Box::pin(stream))
}
