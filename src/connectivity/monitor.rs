use crate::connectivity::events::{ConnectivityState, SyncRequested, TransportSignal};
use crate::remote::RemoteStore;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

type ProbeFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

/// Configuration for connectivity detection
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
	/// Signals inside this window are coalesced; also the minimum gap between sync requests.
	pub debounce_ms: u64,
	/// Timeout for one liveness probe.
	pub probe_timeout_ms: u64,
	/// Re-probe interval while the transport reports online but the probe keeps failing.
	pub reprobe_interval_ms: Option<u64>,
}

impl Default for ConnectivityConfig {
	fn default() -> Self {
		Self {
			debounce_ms: 2000,
			probe_timeout_ms: 3000,
			reprobe_interval_ms: Some(30_000),
		}
	}
}

impl ConnectivityConfig {
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn probe_timeout(&self) -> Duration {
		Duration::from_millis(self.probe_timeout_ms)
	}

	pub fn reprobe_interval(&self) -> Option<Duration> {
		self.reprobe_interval_ms.map(Duration::from_millis)
	}
}

/// Online/offline state machine driven by transport signals.
///
/// The monitor is the single owner of the process-wide connectivity state. Consumers
/// observe it through `subscribe_state` and receive `SyncRequested` through
/// `subscribe_sync_requests`.
pub struct ConnectivityMonitor {
	config: ConnectivityConfig,
	prober: Arc<dyn RemoteStore>,
	state_tx: watch::Sender<ConnectivityState>,
	sync_tx: broadcast::Sender<SyncRequested>,
}

impl ConnectivityMonitor {
	pub fn new(config: ConnectivityConfig, prober: Arc<dyn RemoteStore>) -> Self {
		let (state_tx, _) = watch::channel(ConnectivityState::Offline);
		let (sync_tx, _) = broadcast::channel(16);
		Self {
			config,
			prober,
			state_tx,
			sync_tx,
		}
	}

	pub fn current_state(&self) -> ConnectivityState {
		*self.state_tx.borrow()
	}

	pub fn subscribe_state(&self) -> watch::Receiver<ConnectivityState> {
		self.state_tx.subscribe()
	}

	pub fn subscribe_sync_requests(&self) -> broadcast::Receiver<SyncRequested> {
		self.sync_tx.subscribe()
	}

	/// Consumes transport signals until the stream ends.
	///
	/// An `Online` signal starts (or restarts) the debounce window; `Offline` cancels any
	/// pending transition. When the window settles on online, the remote is probed, and a
	/// successful probe confirms the transition and requests a sync.
	pub async fn run<S>(&self, signals: S)
	where
		S: Stream<Item = TransportSignal> + Send,
	{
		let mut signals = Box::pin(signals);
		let mut settle_at: Option<Instant> = None;
		let mut probe: Option<ProbeFuture> = None;
		let mut transport_online = false;
		let mut last_request: Option<Instant> = None;

		info!(
			"Connectivity monitor started (debounce {:?}, probing {})",
			self.config.debounce(),
			self.prober.name()
		);

		loop {
			tokio::select! {
				signal = signals.next() => {
					let Some(signal) = signal else {
						info!("Transport signal stream ended, stopping connectivity monitor");
						break;
					};
					debug!("Transport signal: {:?}", signal);

					match signal {
						TransportSignal::Online => {
							transport_online = true;
							if self.current_state() == ConnectivityState::Online
								&& settle_at.is_none()
								&& probe.is_none()
							{
								continue;
							}
							probe = None;
							settle_at = Some(Instant::now() + self.config.debounce());
						}
						TransportSignal::Offline => {
							transport_online = false;
							settle_at = None;
							probe = None;
							self.set_state(ConnectivityState::Offline);
						}
					}
				}
				_ = sleep_until(settle_at), if settle_at.is_some() => {
					settle_at = None;
					probe = Some(self.start_probe());
				}
				reachable = wait_for_probe(&mut probe), if probe.is_some() => {
					probe = None;
					if reachable {
						self.confirm_online(&mut last_request);
					} else {
						warn!("Transport reports online but {} is not reachable", self.prober.name());
						if transport_online {
							settle_at = self.config.reprobe_interval().map(|interval| Instant::now() + interval);
						}
					}
				}
			}
		}
	}

	fn start_probe(&self) -> ProbeFuture {
		let prober = self.prober.clone();
		let timeout = self.config.probe_timeout();
		debug!("Probing {} for reachability", prober.name());

		Box::pin(async move {
			match tokio::time::timeout(timeout, prober.probe()).await {
				Ok(reachable) => reachable,
				Err(_) => {
					warn!("Liveness probe timed out after {:?}", timeout);
					false
				}
			}
		})
	}

	fn set_state(&self, state: ConnectivityState) -> ConnectivityState {
		let previous = self.state_tx.send_replace(state);
		if previous != state {
			info!("Connectivity changed: {:?} -> {:?}", previous, state);
		}
		previous
	}

	fn confirm_online(&self, last_request: &mut Option<Instant>) {
		let previous = self.set_state(ConnectivityState::Online);
		if previous == ConnectivityState::Online {
			return;
		}

		let now = Instant::now();
		if let Some(last) = *last_request {
			if now.duration_since(last) < self.config.debounce() {
				debug!("Coalescing sync request issued {:?} ago", now.duration_since(last));
				return;
			}
		}
		*last_request = Some(now);

		let request = SyncRequested {
			confirmed_at: Utc::now(),
		};
		if self.sync_tx.send(request).is_err() {
			debug!("Sync requested but nobody is subscribed");
		} else {
			info!("Connectivity confirmed, sync requested");
		}
	}
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}

async fn wait_for_probe(probe: &mut Option<ProbeFuture>) -> bool {
	match probe {
		Some(probe) => probe.as_mut().await,
		None => std::future::pending().await,
	}
}
