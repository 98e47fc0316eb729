//! Composition root. Builds every governance service from configuration
//! and host seams, wires detector events into the mode coordinator, and
//! drives the whole engine from one periodic tick.
//!
//! All components are synchronous state machines; the governor owns the
//! only clock and the only tokio task, so tests drive `tick` directly
//! with a manual clock and get fully deterministic behavior.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::budget::{ActiveBudgets, BudgetEnforcer, BudgetMode, BudgetOverrides};
use crate::bus::{BusSnapshot, EventBus};
use crate::clock::Clock;
use crate::coordinator::{ModeCoordinator, PerfState, RecoveryInputs, RecoveryPolicy};
use crate::error::{GovernanceError, Result};
use crate::events::GovernanceEvent;
use crate::guardian::{GpuSoftLimits, GuardianStatus, ResourceGuardian, SharedListenerRegistry, TrackedGpu};
use crate::host::{DomHost, GcHinter, GpuFactory, HeapStats, HostActions, OrphanSweeper};
use crate::monitors::dom::{DomGrowthMonitor, DomMonitorConfig};
use crate::monitors::heap::{DriftBand, HeapDriftConfig, HeapDriftDetector};
use crate::predictive::{AlertLevel, PredictiveConfig, PredictiveEngine};
use crate::sampler::{frame_tap, FpsSampler, FrameDrain, FrameTap, SharedTicker, SharedTickerHandle, DEFAULT_FRAME_TAP_CAPACITY};
use crate::watchdog::{Watchdog, WatchdogConfig, WatchdogStatus};

/// Top-level engine configuration, one field per subsystem.
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Governance tick period (watchdog cadence)
    pub tick_period_ms: u64,
    /// Heap sampling period
    pub heap_sample_period_ms: u64,
    pub bus_buffer: usize,
    pub bus_history: usize,
    pub max_pool_size: usize,
    pub heap: HeapDriftConfig,
    pub dom: DomMonitorConfig,
    pub predictive: PredictiveConfig,
    pub watchdog: WatchdogConfig,
    pub recovery: RecoveryPolicy,
    /// External budgets document; `None` keeps defaults
    pub budget_path: Option<PathBuf>,
    /// Startup override query string, e.g. `max-nodes=200&debug`
    pub override_query: Option<String>,
    pub budget_mode: Option<BudgetMode>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 100,
            heap_sample_period_ms: 30_000,
            bus_buffer: 256,
            bus_history: 64,
            max_pool_size: 32,
            heap: HeapDriftConfig::default(),
            dom: DomMonitorConfig::default(),
            predictive: PredictiveConfig::default(),
            watchdog: WatchdogConfig::default(),
            recovery: RecoveryPolicy::default(),
            budget_path: None,
            override_query: None,
            budget_mode: None,
        }
    }
}

/// Host capabilities handed to the governor at construction. The first
/// three are required; the rest degrade gracefully when absent.
pub struct GovernorHosts {
    pub dom: Arc<dyn DomHost>,
    pub actions: Arc<dyn HostActions>,
    pub gpu: Arc<dyn GpuFactory>,
    pub heap: Option<Arc<dyn HeapStats>>,
    pub sweeper: Option<Arc<dyn OrphanSweeper>>,
    pub gc: Option<Arc<dyn GcHinter>>,
}

/// Aggregated engine state, serializable for the diag CLI and any
/// embedding debug surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub running: bool,
    pub state: PerfState,
    pub state_label: String,
    pub current_fps: f64,
    pub alert_level: AlertLevel,
    pub anomaly_score: f64,
    pub heap_growth_percent: f64,
    pub timers: usize,
    pub watchdog: WatchdogStatus,
    pub guardian: GuardianStatus,
    pub budgets: ActiveBudgets,
    pub bus: BusSnapshot,
}

struct TickState {
    last_heap_sample_ms: Option<u64>,
    last_maintenance_ms: Option<u64>,
}

/// The governance engine. Construct once, share as `Arc<Governor>`.
pub struct Governor {
    clock: Arc<dyn Clock>,
    bus: Arc<EventBus>,
    budget: BudgetEnforcer,
    ticker: SharedTickerHandle,
    heap_host: Option<Arc<dyn HeapStats>>,

    heap: Mutex<HeapDriftDetector>,
    dom: Mutex<DomGrowthMonitor>,
    predictive: Mutex<PredictiveEngine>,
    watchdog: Mutex<Watchdog>,
    coordinator: Mutex<ModeCoordinator>,
    guardian: Mutex<ResourceGuardian>,

    fps: Mutex<FpsSampler>,
    frame_drain: Mutex<FrameDrain>,
    frame_tap: Mutex<Option<FrameTap>>,
    /// Drains the bus into the coordinator during tick
    routing_rx: Mutex<tokio::sync::broadcast::Receiver<GovernanceEvent>>,

    tick_state: Mutex<TickState>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,

    config: GovernorConfig,
}

impl Governor {
    pub fn new(config: GovernorConfig, hosts: GovernorHosts, clock: Arc<dyn Clock>) -> Self {
        let bus = Arc::new(EventBus::new(config.bus_buffer, config.bus_history));
        let routing_rx = bus.subscribe();

        let mut budget = match &config.budget_path {
            Some(path) => BudgetEnforcer::load(path),
            None => BudgetEnforcer::new(),
        };
        if let Some(query) = &config.override_query {
            budget.apply_overrides(&BudgetOverrides::parse(query));
        }
        if let Some(mode) = config.budget_mode {
            budget.apply_mode(mode);
        }

        // Budget ceilings feed the detector thresholds so the loaded
        // document is authoritative over compiled-in defaults.
        let mut heap_config = config.heap.clone();
        heap_config.warning_growth = budget.max_heap_growth();
        heap_config.critical_growth = budget.max_heap_growth() * 2.0;

        let mut heap = HeapDriftDetector::new(heap_config);
        if let Some(gc) = &hosts.gc {
            heap = heap.with_gc_hinter(Arc::clone(gc));
        }

        let mut dom = DomGrowthMonitor::new(config.dom.clone(), Arc::clone(&hosts.dom));
        if let Some(sweeper) = &hosts.sweeper {
            dom = dom.with_orphan_sweeper(Arc::clone(sweeper));
        }

        let tracked_gpu = {
            let clock_for_gpu = Arc::clone(&clock);
            TrackedGpu::wrap(Arc::clone(&hosts.gpu), move || clock_for_gpu.now_ms())
        };
        let gpu_limits = GpuSoftLimits {
            max_textures: budget.max_webgl_textures(),
            max_programs: budget.max_webgl_programs(),
        };
        let guardian = ResourceGuardian::new(
            config.max_pool_size,
            SharedListenerRegistry::default(),
            tracked_gpu,
            gpu_limits,
        );

        let mut predictive_config = config.predictive.clone();
        predictive_config.critical_fps_floor = budget.fps_emergency_threshold();

        let (tap, drain) = frame_tap(DEFAULT_FRAME_TAP_CAPACITY);

        Self {
            clock,
            bus,
            budget,
            ticker: Arc::new(SharedTicker::new(config.tick_period_ms)),
            heap_host: hosts.heap.clone(),
            heap: Mutex::new(heap),
            dom: Mutex::new(dom),
            predictive: Mutex::new(PredictiveEngine::new(predictive_config)),
            watchdog: Mutex::new(Watchdog::new(
                config.watchdog.clone(),
                Arc::clone(&hosts.actions),
            )),
            coordinator: Mutex::new(ModeCoordinator::new(config.recovery)),
            guardian: Mutex::new(guardian),
            fps: Mutex::new(FpsSampler::new(60)),
            frame_drain: Mutex::new(drain),
            frame_tap: Mutex::new(Some(tap)),
            routing_rx: Mutex::new(routing_rx),
            tick_state: Mutex::new(TickState {
                last_heap_sample_ms: None,
                last_maintenance_ms: None,
            }),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
            config,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn budget(&self) -> &BudgetEnforcer {
        &self.budget
    }

    pub fn ticker(&self) -> &SharedTickerHandle {
        &self.ticker
    }

    /// The lock-free frame-time producer, handed out exactly once. The
    /// host's render loop pushes frame timestamps into it.
    pub fn take_frame_tap(&self) -> Option<FrameTap> {
        self.frame_tap.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Begin governance: capture the DOM baseline, arm the watchdog, and
    /// spawn the periodic tick task. Idempotent: starting a running
    /// governor is a no-op.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("start ignored, governor already running");
            return Ok(());
        }

        if let Ok(mut dom) = self.dom.lock() {
            dom.capture_baseline();
        }
        {
            let mut watchdog = self
                .watchdog
                .lock()
                .map_err(|_| GovernanceError::lock_poisoned("watchdog"))?;
            watchdog.start();
            watchdog.beat(self.clock.now_ms());
        }

        let governor = Arc::clone(self);
        let period = self.config.tick_period_ms;
        let handle = tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_millis(period.max(1)));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if !governor.running.load(Ordering::SeqCst) {
                    break;
                }
                governor.tick(governor.clock.now_ms());
            }
        });
        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }

        info!(period_ms = period, "governance engine started");
        Ok(())
    }

    /// Stop governance and release watchdog/guardian resources.
    /// Idempotent: stopping a stopped governor is a no-op.
    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("stop ignored, governor not running");
            return Ok(());
        }
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
        if let Ok(mut watchdog) = self.watchdog.lock() {
            watchdog.stop();
        }
        if let Ok(mut guardian) = self.guardian.lock() {
            guardian.teardown();
        }
        info!("governance engine stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One governance step. The spawned task calls this with wall time;
    /// tests call it directly with a manual clock.
    pub fn tick(&self, now_ms: u64) {
        self.ticker.tick(now_ms);
        self.ingest_frames(now_ms);

        if let Ok(mut watchdog) = self.watchdog.lock() {
            watchdog.check(now_ms, &self.bus);
        }

        self.sample_heap(now_ms);
        self.run_maintenance(now_ms);
        self.route_events(now_ms);
        self.drive_recovery(now_ms);
    }

    /// Host-facing ingestion: a mutation-observer batch arrived.
    pub fn on_mutation_batch(&self, added: usize, removed: usize) {
        if let Ok(mut dom) = self.dom.lock() {
            dom.on_mutation_batch(added, removed, &self.bus);
        }
    }

    /// Host-facing ingestion: an uncaught error surfaced. Returns the
    /// quarantine bucket it was filed under.
    pub fn report_error(&self, message: &str) -> Option<String> {
        let mut watchdog = self.watchdog.lock().ok()?;
        Some(watchdog.record_error(message, &self.bus))
    }

    pub fn is_quarantined(&self, component: &str) -> bool {
        self.watchdog
            .lock()
            .map(|w| w.is_quarantined(component))
            .unwrap_or(false)
    }

    /// Lift a quarantine after the host replaced or repaired the
    /// component. Unknown components are a no-op.
    pub fn release_quarantine(&self, component: &str) {
        if let Ok(mut watchdog) = self.watchdog.lock() {
            watchdog.release_quarantine(component);
        }
    }

    pub fn on_context_lost(&self) {
        if let Ok(mut watchdog) = self.watchdog.lock() {
            watchdog.on_context_lost(self.clock.now_ms());
        }
    }

    pub fn on_context_restored(&self, context_id: u64) {
        if let Ok(mut watchdog) = self.watchdog.lock() {
            watchdog.on_context_restored(context_id, &self.bus);
        }
    }

    /// Explicit operator transition request.
    pub fn request_state(&self, target: PerfState) {
        if let Ok(mut coordinator) = self.coordinator.lock() {
            coordinator.request_state(target, self.clock.now_ms(), &self.bus);
        }
    }

    pub fn state(&self) -> PerfState {
        self.coordinator
            .lock()
            .map(|c| c.state())
            .unwrap_or_default()
    }

    pub fn guardian(&self) -> &Mutex<ResourceGuardian> {
        &self.guardian
    }

    pub fn status(&self) -> StatusReport {
        let state = self.state();
        let (alert_level, anomaly_score) = self
            .predictive
            .lock()
            .map(|p| {
                (
                    p.level(),
                    p.last_assessment().map(|a| a.anomaly_score).unwrap_or(0.0),
                )
            })
            .unwrap_or((AlertLevel::None, 0.0));

        StatusReport {
            running: self.is_running(),
            state,
            state_label: state.label().to_string(),
            current_fps: self.fps.lock().map(|f| f.current_fps()).unwrap_or(0.0),
            alert_level,
            anomaly_score,
            heap_growth_percent: self.heap.lock().map(|h| h.growth_percent()).unwrap_or(0.0),
            timers: self.ticker.subscriber_count(),
            watchdog: self
                .watchdog
                .lock()
                .map(|w| w.status())
                .unwrap_or_default(),
            guardian: self
                .guardian
                .lock()
                .map(|g| g.status())
                .unwrap_or_default(),
            budgets: self.budget.snapshot(),
            bus: self.bus.snapshot(),
        }
    }

    fn ingest_frames(&self, _now_ms: u64) {
        let timestamps = match self.frame_drain.lock() {
            Ok(mut drain) => drain.drain(),
            Err(_) => return,
        };
        if timestamps.is_empty() {
            return;
        }

        // Frames double as watchdog heartbeats.
        if let Ok(mut watchdog) = self.watchdog.lock() {
            if let Some(last) = timestamps.last() {
                watchdog.beat(*last);
            }
        }

        let mut fps = match self.fps.lock() {
            Ok(fps) => fps,
            Err(_) => return,
        };
        let mut predictive = match self.predictive.lock() {
            Ok(engine) => engine,
            Err(_) => return,
        };
        for ts in timestamps {
            if let Some(sample) = fps.record_frame(ts) {
                predictive.record_fps(sample.value, ts, &self.bus);
            }
        }
    }

    fn sample_heap(&self, now_ms: u64) {
        let Some(heap_host) = &self.heap_host else {
            return;
        };
        let due = match self.tick_state.lock() {
            Ok(mut state) => {
                let due = state
                    .last_heap_sample_ms
                    .map(|last| now_ms.saturating_sub(last) >= self.config.heap_sample_period_ms)
                    .unwrap_or(true);
                if due {
                    state.last_heap_sample_ms = Some(now_ms);
                }
                due
            }
            Err(_) => false,
        };
        if !due {
            return;
        }

        let Some((used, total)) = heap_host.heap_bytes() else {
            debug!("heap readings unavailable, skipping drift sample");
            return;
        };
        if let Ok(mut heap) = self.heap.lock() {
            heap.sample(used, total, now_ms);
            heap.evaluate(&self.bus);
        }
    }

    fn run_maintenance(&self, now_ms: u64) {
        let interval = self.budget.cleanup_interval_ms();
        let due = match self.tick_state.lock() {
            Ok(mut state) => {
                let due = state
                    .last_maintenance_ms
                    .map(|last| now_ms.saturating_sub(last) >= interval)
                    .unwrap_or(true);
                if due {
                    state.last_maintenance_ms = Some(now_ms);
                }
                due
            }
            Err(_) => false,
        };
        if !due {
            return;
        }

        if let Ok(mut guardian) = self.guardian.lock() {
            guardian.maintain(now_ms);
        }

        // Timer ceiling is a soft limit, same contract as the GPU
        // resource limits: warn, never unregister.
        let timers = self.ticker.subscriber_count();
        if timers > self.budget.max_timers() {
            warn!(
                live = timers,
                limit = self.budget.max_timers(),
                "ticker subscriptions over timer budget"
            );
        }

        // Absolute node ceiling, independent of growth-over-baseline.
        if let Ok(mut dom) = self.dom.lock() {
            if dom.node_count() > self.budget.max_dom_nodes() {
                warn!(
                    limit = self.budget.max_dom_nodes(),
                    "node budget exceeded, forcing a growth check"
                );
                dom.check(&self.bus);
            }
        }
    }

    /// Drain bus events published since the last tick into the
    /// coordinator, which is the only component that acts on them.
    fn route_events(&self, now_ms: u64) {
        let mut rx = match self.routing_rx.lock() {
            Ok(rx) => rx,
            Err(_) => return,
        };
        let mut coordinator = match self.coordinator.lock() {
            Ok(coordinator) => coordinator,
            Err(_) => return,
        };
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    match &event {
                        GovernanceEvent::MemoryCritical { .. } => {
                            if let Ok(mut guardian) = self.guardian.lock() {
                                guardian.emergency_cleanup(now_ms);
                            }
                        }
                        // The soft restart replaces failed components, so
                        // their quarantines no longer apply.
                        GovernanceEvent::SoftRestart => {
                            if let Ok(mut watchdog) = self.watchdog.lock() {
                                watchdog.release_all_quarantines();
                            }
                        }
                        _ => {}
                    }
                    coordinator.observe(&event, now_ms, &self.bus);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event routing lagged, degradation signals dropped");
                }
            }
        }
    }

    fn drive_recovery(&self, now_ms: u64) {
        let heartbeat_stable = self
            .watchdog
            .lock()
            .map(|w| w.heartbeat_stable(now_ms))
            .unwrap_or(false);
        let heap_band = self
            .heap
            .lock()
            .map(|h| {
                let growth = h.growth_percent();
                h.classify(growth)
            })
            .unwrap_or(DriftBand::Normal);
        let anomaly_score = self
            .predictive
            .lock()
            .map(|p| p.last_assessment().map(|a| a.anomaly_score).unwrap_or(0.0))
            .unwrap_or(0.0);

        let inputs = RecoveryInputs {
            heartbeat_stable,
            heap_band,
            anomaly_score,
        };
        let recovered = match self.coordinator.lock() {
            Ok(mut coordinator) => {
                coordinator.tick(now_ms, &inputs, &self.bus);
                coordinator.state() == PerfState::S0
            }
            Err(_) => false,
        };

        // Back at full quality the latched alert level is history; clear
        // it so the next regression can alert from scratch.
        if recovered {
            if let Ok(mut predictive) = self.predictive.lock() {
                if predictive.level() != AlertLevel::None {
                    predictive.reset_alert();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{FakeDom, FakeGpu, FakeHeap, FakeHost};

    fn hosts(dom: Arc<FakeDom>, heap: Arc<FakeHeap>) -> GovernorHosts {
        GovernorHosts {
            dom,
            actions: Arc::new(FakeHost::new()),
            gpu: Arc::new(FakeGpu::new()),
            heap: Some(heap),
            sweeper: None,
            gc: None,
        }
    }

    fn governor() -> (Arc<Governor>, Arc<ManualClock>, Arc<FakeDom>, Arc<FakeHeap>) {
        let clock = Arc::new(ManualClock::new(0));
        let dom = Arc::new(FakeDom::new(500));
        let heap = Arc::new(FakeHeap::new(100_000_000, 500_000_000));
        let governor = Arc::new(Governor::new(
            GovernorConfig::default(),
            hosts(Arc::clone(&dom), Arc::clone(&heap)),
            clock.clone(),
        ));
        (governor, clock, dom, heap)
    }

    #[tokio::test]
    async fn test_start_stop_idempotence() {
        let (governor, _, _, _) = governor();
        assert!(governor.start().is_ok());
        assert!(governor.start().is_ok(), "repeated start is a no-op");
        assert!(governor.is_running());

        assert!(governor.stop().is_ok());
        assert!(governor.stop().is_ok(), "repeated stop is a no-op");
        assert!(!governor.is_running());

        // A stopped governor can be started again.
        assert!(governor.start().is_ok());
        assert!(governor.is_running());
        assert!(governor.stop().is_ok());
    }

    #[tokio::test]
    async fn test_frame_tap_handed_out_once() {
        let (governor, _, _, _) = governor();
        assert!(governor.take_frame_tap().is_some());
        assert!(governor.take_frame_tap().is_none());
    }

    #[tokio::test]
    async fn test_memory_critical_escalates_ladder() {
        let (governor, clock, _, heap) = governor();
        governor.start().expect("start");

        // 30s-spaced samples with >100% growth cross the critical band.
        for i in 0..4u64 {
            heap.set_used(100_000_000 + i * 60_000_000);
            clock.set(i * 30_000);
            governor.tick(clock.now_ms());
        }
        // One more tick routes the published event into the coordinator.
        governor.tick(clock.now_ms() + 100);

        assert_eq!(governor.state(), PerfState::S4);
        assert!(governor.bus().topic_count("memory:critical") >= 1);
        governor.stop().expect("stop");
    }

    #[tokio::test]
    async fn test_status_report_serializes() {
        let (governor, _, _, _) = governor();
        let report = governor.status();
        assert!(!report.running);
        assert_eq!(report.state, PerfState::S0);
        let json = serde_json::to_string(&report).expect("serializable");
        assert!(json.contains("\"state\":\"s0\""));
    }

    #[tokio::test]
    async fn test_timer_budget_is_checked_against_subscriptions() {
        let clock = Arc::new(ManualClock::new(0));
        let dom = Arc::new(FakeDom::new(500));
        let heap = Arc::new(FakeHeap::new(100_000_000, 500_000_000));
        let config = GovernorConfig {
            override_query: Some("max-timers=2".to_string()),
            ..GovernorConfig::default()
        };
        let governor = Arc::new(Governor::new(
            config,
            hosts(Arc::clone(&dom), Arc::clone(&heap)),
            clock.clone(),
        ));
        assert_eq!(governor.budget().max_timers(), 2);

        for _ in 0..3 {
            governor.ticker().register(|_now| {});
        }
        governor.start().expect("start");
        // Maintenance runs on the first tick and compares the live count
        // against the ceiling.
        governor.tick(100);
        let status = governor.status();
        assert_eq!(status.timers, 3);
        assert!(status.timers > status.budgets.max_timers);
        governor.stop().expect("stop");
    }

    #[tokio::test]
    async fn test_soft_restart_releases_quarantines() {
        let (governor, _, _, _) = governor();
        governor.start().expect("start");
        for _ in 0..3 {
            governor.report_error("webgl texture upload failed");
        }
        assert!(governor.is_quarantined("render"));

        governor.bus().publish(GovernanceEvent::SoftRestart);
        governor.tick(100);
        assert!(
            !governor.is_quarantined("render"),
            "soft restart replaces components, quarantines must lift"
        );

        // Host-driven release after repairing a single component.
        for _ in 0..3 {
            governor.report_error("gsap tween died");
        }
        assert!(governor.is_quarantined("animation"));
        governor.release_quarantine("animation");
        assert!(!governor.is_quarantined("animation"));
        governor.stop().expect("stop");
    }
}
