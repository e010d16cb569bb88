//! Broadcast scheduler: drives snapshot generation on a cadence.
//!
//! The scheduler is an explicit phase machine running on one Tokio task:
//!
//! ```text
//! Idle -> Scheduled -> Running -> Scheduled | Stopped
//! ```
//!
//! Each tick is awaited to completion before the next delay is drawn, so
//! ticks never overlap. Because waiting is done on the Tokio timer, tests
//! drive the scheduler on a paused virtual clock.
//!
//! Stopping is cooperative: [`SchedulerHandle::stop`] wakes a sleeping
//! scheduler at once, and a tick already running finishes its broadcast
//! but never reschedules.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use astratos_types::Envelope;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cadence::Cadence;
use crate::generator::SnapshotGenerator;
use crate::registry::ConnectionRegistry;

/// Where the scheduler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SchedulerPhase {
    /// Created, task not yet polled.
    Idle = 0,
    /// Waiting for the next tick.
    Scheduled = 1,
    /// Generating and broadcasting.
    Running = 2,
    /// Finished; no further ticks will fire.
    Stopped = 3,
}

impl SchedulerPhase {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Scheduled,
            2 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// State shared between the scheduler task and its handle.
#[derive(Debug)]
struct Shared {
    phase: AtomicU8,
    stop_requested: AtomicBool,
    stop_notify: Notify,
    ticks: AtomicU64,
}

impl Shared {
    fn phase(&self) -> SchedulerPhase {
        SchedulerPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }
}

/// Starts broadcast loops.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastScheduler;

impl BroadcastScheduler {
    /// Spawn the broadcast loop on the current Tokio runtime.
    ///
    /// The first tick fires after the first cadence delay, not
    /// immediately; new connections get their welcome from the registry.
    pub fn start(
        registry: Arc<ConnectionRegistry>,
        generator: SnapshotGenerator,
        cadence: Cadence,
    ) -> SchedulerHandle {
        let shared = Arc::new(Shared {
            phase: AtomicU8::new(SchedulerPhase::Idle as u8),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            ticks: AtomicU64::new(0),
        });

        info!(?cadence, alert_chance = generator.alert_chance(), "broadcast scheduler starting");
        let task = tokio::spawn(run(Arc::clone(&shared), registry, generator, cadence));

        SchedulerHandle { shared, task }
    }
}

/// Control handle for a running scheduler.
#[derive(Debug)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler. Idempotent.
    ///
    /// A sleeping scheduler wakes and exits without ticking. A tick in
    /// progress completes its broadcast and then exits.
    pub fn stop(&self) {
        if self.shared.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("broadcast scheduler stop requested");
        self.shared.stop_notify.notify_one();
    }

    /// Current phase.
    pub fn phase(&self) -> SchedulerPhase {
        self.shared.phase()
    }

    /// Number of completed ticks.
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Acquire)
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stop_requested(&self) -> bool {
        self.shared.is_stop_requested()
    }

    /// Wait for the scheduler task to finish.
    ///
    /// Does not stop it; call [`stop`](Self::stop) first.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "broadcast scheduler task ended abnormally");
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    registry: Arc<ConnectionRegistry>,
    generator: SnapshotGenerator,
    cadence: Cadence,
) {
    let mut rng = StdRng::from_os_rng();

    loop {
        if shared.is_stop_requested() {
            break;
        }

        shared.set_phase(SchedulerPhase::Scheduled);
        let delay = cadence.next_delay(&mut rng);
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shared.stop_notify.notified() => {}
        }
        if shared.is_stop_requested() {
            break;
        }

        shared.set_phase(SchedulerPhase::Running);
        let snapshot = generator.generate_with(&mut rng, Utc::now());
        match Envelope::simulation_update(&snapshot).and_then(|env| env.to_json()) {
            Ok(json) => {
                let report = registry.broadcast(&json).await;
                debug!(
                    delivered = report.delivered,
                    skipped = report.skipped,
                    dropped = report.dropped,
                    alerts = snapshot.alerts.len(),
                    "snapshot broadcast"
                );
            }
            Err(e) => warn!(error = %e, "failed to encode snapshot, skipping tick"),
        }
        shared.ticks.fetch_add(1, Ordering::AcqRel);
    }

    shared.set_phase(SchedulerPhase::Stopped);
    info!(ticks = shared.ticks.load(Ordering::Acquire), "broadcast scheduler stopped");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::OnceLock;
    use std::time::Duration;

    use astratos_types::{ConnectionId, EnvelopeKind, MetricBound, MetricValue, MetricsSnapshot};
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::RangeTable;
    use crate::registry::{Connection, QueuedConnection, ReadyState, SendError};

    fn fixed_x_generator() -> SnapshotGenerator {
        SnapshotGenerator::new(RangeTable::try_new([("x", MetricBound::integer(10, 10))]).unwrap(), 0.0)
    }

    fn updates(rx: &mut mpsc::Receiver<Arc<str>>) -> Vec<MetricsSnapshot> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let env = Envelope::from_json(&frame).unwrap();
            if env.kind() == Some(EnvelopeKind::SimulationUpdate) {
                out.push(serde_json::from_value(env.payload).unwrap());
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_cadence_ticks_once_per_interval() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut rx) = QueuedConnection::open(None);
        registry.register(conn).await;

        let handle = BroadcastScheduler::start(
            Arc::clone(&registry),
            fixed_x_generator(),
            Cadence::Fixed(Duration::from_secs(1)),
        );

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(handle.ticks(), 3);
        assert_eq!(handle.phase(), SchedulerPhase::Scheduled);

        let got = updates(&mut rx);
        assert_eq!(got.len(), 3);
        assert!(got.iter().all(|s| s.metric("x") == Some(&MetricValue::Integer(10))));
        assert!(got.iter().all(|s| s.alerts.is_empty()));

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_sleeping_prevents_any_tick() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut rx) = QueuedConnection::open(None);
        registry.register(conn).await;

        let handle = BroadcastScheduler::start(
            Arc::clone(&registry),
            fixed_x_generator(),
            Cadence::Fixed(Duration::from_secs(10)),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.stop();
        handle.stop();
        assert!(handle.is_stop_requested());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.ticks(), 0);
        assert_eq!(handle.phase(), SchedulerPhase::Stopped);
        assert!(updates(&mut rx).is_empty());
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_stop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, mut rx) = QueuedConnection::open(None);
        registry.register(conn).await;

        let handle = BroadcastScheduler::start(
            Arc::clone(&registry),
            fixed_x_generator(),
            Cadence::Fixed(Duration::from_millis(500)),
        );
        tokio::time::sleep(Duration::from_millis(1200)).await;
        handle.stop();
        let ticks_at_stop = handle.ticks();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.ticks(), ticks_at_stop);
        assert_eq!(updates(&mut rx).len(), 2);
        handle.join().await;
    }

    /// Connection that stops the scheduler from inside the first update it
    /// is handed.
    struct StopsOnUpdate {
        id: ConnectionId,
        scheduler: Arc<OnceLock<SchedulerHandle>>,
        updates: AtomicU64,
    }

    impl Connection for StopsOnUpdate {
        fn id(&self) -> ConnectionId {
            self.id
        }

        fn remote_addr(&self) -> Option<SocketAddr> {
            None
        }

        fn ready_state(&self) -> ReadyState {
            ReadyState::Open
        }

        fn send(&self, frame: Arc<str>) -> Result<(), SendError> {
            let env = Envelope::from_json(&frame).unwrap();
            if env.kind() == Some(EnvelopeKind::SimulationUpdate) {
                self.updates.fetch_add(1, Ordering::AcqRel);
                self.scheduler.get().unwrap().stop();
            }
            Ok(())
        }

        fn mark_closed(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn stop_during_a_tick_finishes_it_without_rescheduling() {
        let registry = Arc::new(ConnectionRegistry::new());
        let slot = Arc::new(OnceLock::new());
        let conn = Arc::new(StopsOnUpdate {
            id: ConnectionId::new(),
            scheduler: Arc::clone(&slot),
            updates: AtomicU64::new(0),
        });
        registry.register(conn.clone()).await;

        let handle = BroadcastScheduler::start(
            Arc::clone(&registry),
            fixed_x_generator(),
            Cadence::Fixed(Duration::from_secs(1)),
        );
        slot.set(handle).unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let handle = slot.get().unwrap();
        assert_eq!(conn.updates.load(Ordering::Acquire), 1);
        assert_eq!(handle.ticks(), 1);
        assert!(handle.is_stop_requested());
        assert_eq!(handle.phase(), SchedulerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn randomized_cadence_stays_within_bounds() {
        let registry = Arc::new(ConnectionRegistry::new());
        let handle = BroadcastScheduler::start(
            Arc::clone(&registry),
            fixed_x_generator(),
            Cadence::between(Duration::from_secs(1), Duration::from_secs(3)),
        );

        tokio::time::sleep(Duration::from_millis(30_500)).await;
        let ticks = handle.ticks();
        assert!((10..=30).contains(&ticks), "ticks = {ticks}");

        handle.stop();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn dead_connection_does_not_stop_the_scheduler() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (dead, dead_rx) = QueuedConnection::open(None);
        let (live, mut live_rx) = QueuedConnection::open(None);
        registry.register(dead).await;
        registry.register(live).await;
        drop(dead_rx);

        let handle = BroadcastScheduler::start(
            Arc::clone(&registry),
            fixed_x_generator(),
            Cadence::Fixed(Duration::from_secs(1)),
        );
        tokio::time::sleep(Duration::from_millis(2500)).await;

        assert_eq!(handle.ticks(), 2);
        assert_eq!(registry.len().await, 1);
        assert_eq!(updates(&mut live_rx).len(), 2);

        handle.stop();
        handle.join().await;
    }
}
