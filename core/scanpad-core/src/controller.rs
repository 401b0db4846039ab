//! Display Loop Controller.
//!
//! # States
//!
//! ```text
//! GENERATING ─▶ RENDERING ─▶ AWAITING_ACK ─┬─▶ ACK_SHOWN ─┬─▶ CLEARING ─▶ GENERATING
//!                                          └─▶ TIMED_OUT ─┘
//!
//! any state ── shutdown requested / device error ──▶ SHUTTING_DOWN
//! ```
//!
//! Cancellation is cooperative: the [`ShutdownFlag`] is checked at every
//! state boundary and between poll or dwell ticks, never inside a single
//! render. The shutdown sequence (clear, sleep the panel, discard residual
//! signals of the in-flight session) runs on every exit path. A requested
//! shutdown is a normal return; a device error is returned after cleanup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::code::{CodeImager, QrImager};
use crate::config::DeviceConfig;
use crate::display::DisplayDriver;
use crate::error::Result;
use crate::layout::{LayoutEngine, LayoutFields, TextStyle};
use crate::metadata::load_metadata;
use crate::payload::{PayloadBuilder, PayloadMode};
use crate::session::{new_session_id, QrSession};
use crate::signal::{ConsumeOutcome, PollOptions, SignalChannel, SignalKey, WildcardPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Generating,
    Rendering,
    AwaitingAck,
    AckShown,
    TimedOut,
    Clearing,
    ShuttingDown,
}

/// Cooperative cancellation shared with signal handlers.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub mode: PayloadMode,
    pub scan_base_url: String,
    pub node_id: String,
    pub metadata_source: Option<String>,
    pub wait_for_ack: bool,
    pub ack_timeout: Duration,
    pub poll_interval: Duration,
    pub ack_dwell: Duration,
    pub ack_message: String,
    pub wildcard: WildcardPolicy,
    /// Stop after this many sessions. `None` runs until shutdown.
    pub max_cycles: Option<u64>,
}

impl From<&DeviceConfig> for LoopConfig {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            mode: config.mode,
            scan_base_url: config.scan_base_url.clone(),
            node_id: config.node_id.clone(),
            metadata_source: config.metadata_source.clone(),
            wait_for_ack: config.wait_for_ack,
            ack_timeout: config.ack_timeout(),
            poll_interval: config.poll_interval(),
            ack_dwell: config.ack_dwell(),
            ack_message: config.ack_message.clone(),
            wildcard: config.wildcard,
            max_cycles: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Sessions that reached CLEARING.
    pub cycles: u64,
    pub acknowledged: u64,
    pub timed_out: u64,
    /// The loop stopped on a shutdown request rather than the cycle limit.
    pub cancelled: bool,
}

enum AckResult {
    Acked(SignalKey),
    TimedOut,
    Cancelled,
}

pub struct DisplayLoop<D: DisplayDriver> {
    config: LoopConfig,
    driver: D,
    signals: Arc<dyn SignalChannel>,
    imager: Arc<dyn CodeImager>,
    layout: LayoutEngine,
    payload: PayloadBuilder,
    shutdown: ShutdownFlag,
    state: LoopState,
    in_flight: Option<SignalKey>,
}

impl<D: DisplayDriver> DisplayLoop<D> {
    pub fn new(
        config: LoopConfig,
        driver: D,
        signals: Arc<dyn SignalChannel>,
        layout: LayoutEngine,
        shutdown: ShutdownFlag,
    ) -> Self {
        let payload = PayloadBuilder::new(config.mode, config.scan_base_url.clone());
        Self {
            config,
            driver,
            signals,
            imager: Arc::new(QrImager::default()),
            layout,
            payload,
            shutdown,
            state: LoopState::Generating,
            in_flight: None,
        }
    }

    pub fn with_imager(mut self, imager: Arc<dyn CodeImager>) -> Self {
        self.imager = imager;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Runs until shutdown, the cycle limit, or a failure. The shutdown
    /// sequence runs in every case.
    pub fn run(&mut self) -> Result<LoopSummary> {
        let result = self.run_cycles();
        self.shut_down();

        match &result {
            Ok(summary) => tracing::info!(
                cycles = summary.cycles,
                acknowledged = summary.acknowledged,
                timed_out = summary.timed_out,
                cancelled = summary.cancelled,
                "Display loop stopped"
            ),
            Err(err) => tracing::error!(error = %err, "Display loop failed"),
        }
        result
    }

    fn run_cycles(&mut self) -> Result<LoopSummary> {
        let mut summary = LoopSummary::default();
        self.driver.init()?;

        loop {
            if self.shutdown.is_requested() {
                summary.cancelled = true;
                break;
            }
            if self
                .config
                .max_cycles
                .is_some_and(|max| summary.cycles >= max)
            {
                break;
            }

            self.enter(LoopState::Generating);
            let session = self.generate()?;
            if self.cancelled(&mut summary) {
                break;
            }

            self.enter(LoopState::Rendering);
            self.render(&session)?;
            if self.cancelled(&mut summary) {
                break;
            }

            self.enter(LoopState::AwaitingAck);
            match self.await_ack(&session)? {
                AckResult::Acked(matched) => {
                    tracing::info!(
                        session_id = %session.id(),
                        matched = %matched,
                        "Scan acknowledged"
                    );
                    self.enter(LoopState::AckShown);
                    summary.acknowledged += 1;
                    let frame = self.layout.message(
                        self.driver.canvas(),
                        &self.config.ack_message,
                        TextStyle::Banner,
                    );
                    self.driver.show(&frame)?;
                    if !self.pause(self.config.ack_dwell) {
                        summary.cancelled = true;
                        break;
                    }
                }
                AckResult::TimedOut => {
                    tracing::info!(session_id = %session.id(), "No scan before timeout");
                    self.enter(LoopState::TimedOut);
                    summary.timed_out += 1;
                }
                AckResult::Cancelled => {
                    summary.cancelled = true;
                    break;
                }
            }

            self.enter(LoopState::Clearing);
            self.driver.clear()?;
            if let Some(key) = self.in_flight.take() {
                self.signals.discard(&key)?;
            }
            summary.cycles += 1;
        }

        Ok(summary)
    }

    fn cancelled(&self, summary: &mut LoopSummary) -> bool {
        if self.shutdown.is_requested() {
            summary.cancelled = true;
            return true;
        }
        false
    }

    fn enter(&mut self, state: LoopState) {
        tracing::debug!(from = ?self.state, to = ?state, "State transition");
        self.state = state;
    }

    fn generate(&mut self) -> Result<QrSession> {
        if self.config.wildcard == WildcardPolicy::BindToCurrent
            && self.signals.take(&SignalKey::Wildcard)?
        {
            tracing::info!("Discarded stale wildcard signal");
        }
        let stale = self.signals.sweep_sessions()?;
        if stale > 0 {
            tracing::info!(count = stale, "Discarded stale session signals");
        }

        let metadata = load_metadata(self.config.metadata_source.as_deref()).metadata;
        let id = new_session_id();
        let payload = self.payload.build(&metadata, &id, &self.config.node_id)?;
        let session = QrSession::with_id(id, metadata, payload);

        self.in_flight = Some(SignalKey::session(session.id())?);
        tracing::info!(
            session_id = %session.id(),
            mode = %self.payload.mode(),
            "Session generated"
        );
        Ok(session)
    }

    fn render(&mut self, session: &QrSession) -> Result<()> {
        let bitmap = self.imager.encode(session.payload())?;
        let timestamp = session
            .created_at()
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let fields = LayoutFields::device(
            &self.config.node_id,
            &timestamp,
            session.id(),
            &session.metadata().name,
            &session.metadata().description,
        );

        let layout = self.layout.layout(self.driver.canvas(), &fields, &bitmap);
        tracing::debug!(
            session_id = %session.id(),
            code_edge = layout.code_edge,
            compressed = layout.compressed,
            truncated = layout.truncated,
            "Layout computed"
        );
        self.driver.show(&layout.frame)?;
        Ok(())
    }

    fn await_ack(&mut self, session: &QrSession) -> Result<AckResult> {
        if !self.config.wait_for_ack {
            return Ok(if self.pause(self.config.ack_timeout) {
                AckResult::TimedOut
            } else {
                AckResult::Cancelled
            });
        }

        let key = SignalKey::session(session.id())?;
        let options = PollOptions::new(self.config.ack_timeout, self.config.poll_interval)
            .with_wildcard(self.config.wildcard);
        let shutdown = self.shutdown.clone();
        let outcome = self
            .signals
            .try_consume_until(&key, &options, &|| shutdown.is_requested())?;

        Ok(match outcome {
            ConsumeOutcome::Consumed(matched) => AckResult::Acked(matched),
            ConsumeOutcome::TimedOut => AckResult::TimedOut,
            ConsumeOutcome::Cancelled => AckResult::Cancelled,
        })
    }

    /// Sleeps for `total` in poll-interval ticks. Returns `false` if shutdown
    /// was requested before the time ran out.
    fn pause(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        let tick = self.config.poll_interval.max(Duration::from_millis(10));
        loop {
            if self.shutdown.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(tick.min(deadline - now));
        }
    }

    /// Best effort: every step runs even if an earlier one failed.
    fn shut_down(&mut self) {
        self.enter(LoopState::ShuttingDown);

        if let Err(err) = self.driver.clear() {
            tracing::warn!(error = %err, "Failed to clear display during shutdown");
        }
        if let Err(err) = self.driver.sleep() {
            tracing::warn!(error = %err, "Failed to put display to sleep");
        }

        self.in_flight = None;
        if let Err(err) = self.signals.sweep_sessions() {
            tracing::warn!(error = %err, "Failed to discard residual session signals");
        }
        if self.config.wildcard == WildcardPolicy::BindToCurrent {
            if let Err(err) = self.signals.discard(&SignalKey::Wildcard) {
                tracing::warn!(error = %err, "Failed to discard residual wildcard signal");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::HeadlessDisplay;
    use crate::layout::{Canvas, LayoutConstraints, MonospaceMetrics};
    use crate::signal::MemorySignalChannel;

    fn config() -> LoopConfig {
        LoopConfig {
            mode: PayloadMode::Json,
            scan_base_url: "http://127.0.0.1:5000".to_string(),
            node_id: "node-test".to_string(),
            metadata_source: None,
            wait_for_ack: true,
            ack_timeout: Duration::from_millis(40),
            poll_interval: Duration::from_millis(10),
            ack_dwell: Duration::ZERO,
            ack_message: "Scanned!".to_string(),
            wildcard: WildcardPolicy::BindToCurrent,
            max_cycles: Some(1),
        }
    }

    fn display_loop(
        config: LoopConfig,
        signals: Arc<MemorySignalChannel>,
    ) -> DisplayLoop<HeadlessDisplay> {
        let engine = LayoutEngine::new(
            LayoutConstraints::default(),
            Arc::new(MonospaceMetrics::unicode()),
        );
        DisplayLoop::new(
            config,
            HeadlessDisplay::new(Canvas::new(122, 250)),
            signals,
            engine,
            ShutdownFlag::new(),
        )
    }

    #[test]
    fn timed_out_cycle_ends_in_shutdown() {
        let signals = Arc::new(MemorySignalChannel::new());
        let mut display_loop = display_loop(config(), signals);

        let summary = display_loop.run().expect("run");

        assert_eq!(summary.cycles, 1);
        assert_eq!(summary.timed_out, 1);
        assert!(!summary.cancelled);
        assert_eq!(display_loop.state(), LoopState::ShuttingDown);
        assert_eq!(display_loop.driver().frames_shown(), 1);
    }

    #[test]
    fn stale_wildcard_is_discarded_before_polling() {
        let signals = Arc::new(MemorySignalChannel::new());
        signals.raise(&SignalKey::Wildcard).expect("raise");
        let mut display_loop = display_loop(config(), signals.clone());

        let summary = display_loop.run().expect("run");

        assert_eq!(summary.acknowledged, 0);
        assert_eq!(summary.timed_out, 1);
        assert!(signals.pending().expect("pending").is_empty());
    }

    #[test]
    fn ignore_policy_leaves_wildcard_alone() {
        let signals = Arc::new(MemorySignalChannel::new());
        signals.raise(&SignalKey::Wildcard).expect("raise");
        let mut config = config();
        config.wildcard = WildcardPolicy::Ignore;
        let mut display_loop = display_loop(config, signals.clone());

        let summary = display_loop.run().expect("run");

        assert_eq!(summary.timed_out, 1);
        assert_eq!(signals.pending().expect("pending"), vec![SignalKey::Wildcard]);
    }

    #[test]
    fn shutdown_before_start_runs_cleanup_only() {
        let signals = Arc::new(MemorySignalChannel::new());
        let mut display_loop = display_loop(config(), signals);
        display_loop.shutdown.request();

        let summary = display_loop.run().expect("run");

        assert_eq!(summary.cycles, 0);
        assert!(summary.cancelled);
        assert_eq!(display_loop.driver().frames_shown(), 0);
    }

    #[test]
    fn stale_session_markers_are_discarded() {
        let signals = Arc::new(MemorySignalChannel::new());
        signals
            .raise(&SignalKey::session("01OLDSESSION").expect("key"))
            .expect("raise");
        let mut display_loop = display_loop(config(), signals.clone());

        let summary = display_loop.run().expect("run");

        assert_eq!(summary.timed_out, 1);
        assert!(signals.pending().expect("pending").is_empty());
    }
}
