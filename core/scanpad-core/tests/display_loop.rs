//! Drives the display loop against an in-memory signal channel and a
//! recording display.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use scanpad_core::{
    Canvas, DisplayDriver, DisplayError, DisplayLoop, DrawOp, Frame, LayoutConstraints,
    LayoutEngine, LoopConfig, MemorySignalChannel, MonospaceMetrics, PayloadMode, Result,
    ShutdownFlag, SignalChannel, SignalKey, TextStyle, WildcardPolicy,
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Init,
    Code(Vec<String>),
    Message(String),
    Clear,
    Sleep,
}

#[derive(Clone, Default)]
struct RecordingDisplay {
    events: Arc<Mutex<Vec<Event>>>,
    fail_on_show: bool,
}

impl RecordingDisplay {
    fn events(&self) -> Vec<Event> {
        self.events.lock().expect("events lock").clone()
    }

    fn push(&self, event: Event) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl DisplayDriver for RecordingDisplay {
    fn init(&mut self) -> std::result::Result<(), DisplayError> {
        self.push(Event::Init);
        Ok(())
    }

    fn canvas(&self) -> Canvas {
        Canvas::new(122, 250)
    }

    fn clear(&mut self) -> std::result::Result<(), DisplayError> {
        self.push(Event::Clear);
        Ok(())
    }

    fn show(&mut self, frame: &Frame) -> std::result::Result<(), DisplayError> {
        if self.fail_on_show {
            return Err(DisplayError::Disconnected);
        }
        let has_code = frame
            .ops
            .iter()
            .any(|op| matches!(op, DrawOp::Code { .. }));
        let texts: Vec<String> = frame
            .ops
            .iter()
            .filter_map(|op| match op {
                DrawOp::Text { text, .. } => Some(text.clone()),
                DrawOp::Code { .. } => None,
            })
            .collect();
        if has_code {
            self.push(Event::Code(texts));
        } else {
            self.push(Event::Message(texts.concat()));
        }
        Ok(())
    }

    fn sleep(&mut self) -> std::result::Result<(), DisplayError> {
        self.push(Event::Sleep);
        Ok(())
    }
}

/// Simulates a phone scanning each code as soon as the device starts
/// polling for it.
#[derive(Default)]
struct ScanOnFirstPoll {
    inner: MemorySignalChannel,
    scanned: Mutex<HashSet<SignalKey>>,
    polled: Mutex<Vec<SignalKey>>,
}

impl SignalChannel for ScanOnFirstPoll {
    fn raise(&self, key: &SignalKey) -> Result<()> {
        self.inner.raise(key)
    }

    fn take(&self, key: &SignalKey) -> Result<bool> {
        if !key.is_wildcard() && self.scanned.lock().expect("lock").insert(key.clone()) {
            self.polled.lock().expect("lock").push(key.clone());
            self.inner.raise(key)?;
        }
        self.inner.take(key)
    }

    fn pending(&self) -> Result<Vec<SignalKey>> {
        self.inner.pending()
    }
}

/// Records the session keys the loop polls for, without scanning anything.
#[derive(Default)]
struct RecordingChannel {
    inner: MemorySignalChannel,
    polled: Mutex<Vec<SignalKey>>,
}

impl SignalChannel for RecordingChannel {
    fn raise(&self, key: &SignalKey) -> Result<()> {
        self.inner.raise(key)
    }

    fn take(&self, key: &SignalKey) -> Result<bool> {
        if !key.is_wildcard() {
            let mut polled = self.polled.lock().expect("lock");
            if !polled.contains(key) {
                polled.push(key.clone());
            }
        }
        self.inner.take(key)
    }

    fn pending(&self) -> Result<Vec<SignalKey>> {
        self.inner.pending()
    }
}

fn config(max_cycles: Option<u64>) -> LoopConfig {
    LoopConfig {
        mode: PayloadMode::Json,
        scan_base_url: "http://127.0.0.1:5000".to_string(),
        node_id: "node-s-8213".to_string(),
        metadata_source: None,
        wait_for_ack: true,
        ack_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
        ack_dwell: Duration::from_millis(5),
        ack_message: "Scanned!".to_string(),
        wildcard: WildcardPolicy::BindToCurrent,
        max_cycles,
    }
}

fn engine() -> LayoutEngine {
    LayoutEngine::new(
        LayoutConstraints::default(),
        Arc::new(MonospaceMetrics::unicode()),
    )
}

#[test]
fn acknowledged_cycles_show_message_then_clear() {
    let display = RecordingDisplay::default();
    let signals = Arc::new(ScanOnFirstPoll::default());
    let mut display_loop = DisplayLoop::new(
        config(Some(2)),
        display.clone(),
        signals.clone(),
        engine(),
        ShutdownFlag::new(),
    );

    let summary = display_loop.run().expect("run");

    assert_eq!(summary.cycles, 2);
    assert_eq!(summary.acknowledged, 2);
    assert_eq!(summary.timed_out, 0);
    assert!(!summary.cancelled);

    let events = display.events();
    assert_eq!(events.len(), 9, "{:?}", events);
    assert_eq!(events[0], Event::Init);
    for cycle in 0..2 {
        let base = 1 + cycle * 3;
        let Event::Code(texts) = &events[base] else {
            panic!("expected code frame, got {:?}", events[base]);
        };
        assert_eq!(texts[0], "Node ID:");
        assert_eq!(texts[1], "node-s-8213");
        assert_eq!(events[base + 1], Event::Message("Scanned!".to_string()));
        assert_eq!(events[base + 2], Event::Clear);
    }
    assert_eq!(&events[7..], &[Event::Clear, Event::Sleep]);

    // Each cycle polled a fresh session id.
    let polled = signals.polled.lock().expect("lock").clone();
    assert_eq!(polled.len(), 2);
    assert_ne!(polled[0], polled[1]);
    assert!(signals.pending().expect("pending").is_empty());
}

#[test]
fn code_frame_shows_session_tail() {
    let display = RecordingDisplay::default();
    let signals = Arc::new(ScanOnFirstPoll::default());
    let mut display_loop = DisplayLoop::new(
        config(Some(1)),
        display.clone(),
        signals.clone(),
        engine(),
        ShutdownFlag::new(),
    );
    display_loop.run().expect("run");

    let polled = signals.polled.lock().expect("lock").clone();
    let SignalKey::Session(id) = &polled[0] else {
        panic!("expected session key");
    };
    let Event::Code(texts) = &display.events()[1] else {
        panic!("expected code frame");
    };
    assert_eq!(texts[4], format!("(QR ID: {})", &id[id.len() - 8..]));
    // The default name wraps on the 122 px panel.
    assert!(texts[5..].concat().starts_with("yama log e-paper"));
}

#[test]
fn fixed_dwell_without_ack_waiting() {
    let display = RecordingDisplay::default();
    let signals = Arc::new(MemorySignalChannel::new());
    let mut config = config(Some(1));
    config.wait_for_ack = false;
    config.ack_timeout = Duration::from_millis(60);

    let started = Instant::now();
    let summary = DisplayLoop::new(config, display.clone(), signals, engine(), ShutdownFlag::new())
        .run()
        .expect("run");

    assert!(started.elapsed() >= Duration::from_millis(60));
    assert_eq!(summary.timed_out, 1);
    assert!(!display
        .events()
        .iter()
        .any(|e| matches!(e, Event::Message(_))));
}

#[test]
fn shutdown_mid_poll_cleans_up_and_succeeds() {
    let display = RecordingDisplay::default();
    let signals = Arc::new(MemorySignalChannel::new());
    let shutdown = ShutdownFlag::new();
    let mut config = config(None);
    config.ack_timeout = Duration::from_secs(30);

    let trigger = shutdown.clone();
    let started = Instant::now();
    let summary = thread::scope(|scope| {
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(80));
            trigger.request();
        });
        DisplayLoop::new(config, display.clone(), signals.clone(), engine(), shutdown)
            .run()
            .expect("run")
    });

    assert!(summary.cancelled);
    assert_eq!(summary.cycles, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
    let events = display.events();
    assert_eq!(&events[events.len() - 2..], &[Event::Clear, Event::Sleep]);
    assert!(signals.pending().expect("pending").is_empty());
}

#[test]
fn device_failure_runs_shutdown_then_propagates() {
    let display = RecordingDisplay {
        fail_on_show: true,
        ..Default::default()
    };
    let signals = Arc::new(MemorySignalChannel::new());

    let result = DisplayLoop::new(
        config(Some(3)),
        display.clone(),
        signals.clone(),
        engine(),
        ShutdownFlag::new(),
    )
    .run();

    let err = result.expect_err("device failure");
    assert!(err.is_device_failure());
    assert_eq!(display.events(), vec![Event::Init, Event::Clear, Event::Sleep]);
}

#[test]
fn wildcard_raised_during_poll_confirms_current_session() {
    let display = RecordingDisplay::default();
    let signals = Arc::new(MemorySignalChannel::new());
    let writer = signals.clone();

    let summary = thread::scope(|scope| {
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(80));
            writer.raise(&SignalKey::Wildcard).expect("raise");
        });
        DisplayLoop::new(
            config(Some(1)),
            display.clone(),
            signals.clone(),
            engine(),
            ShutdownFlag::new(),
        )
        .run()
        .expect("run")
    });

    assert_eq!(summary.acknowledged, 1);
    assert!(display
        .events()
        .contains(&Event::Message("Scanned!".to_string())));
}

#[test]
fn ack_message_style_is_banner() {
    let frame = engine().message(Canvas::new(122, 250), "Scanned!", TextStyle::Banner);
    assert!(matches!(
        &frame.ops[0],
        DrawOp::Text {
            style: TextStyle::Banner,
            ..
        }
    ));
}

#[test]
fn late_scan_of_timed_out_session_does_not_linger() {
    let signals = Arc::new(RecordingChannel::default());
    let mut config = config(Some(1));
    config.ack_timeout = Duration::from_millis(30);

    let first = DisplayLoop::new(
        config.clone(),
        RecordingDisplay::default(),
        signals.clone(),
        engine(),
        ShutdownFlag::new(),
    )
    .run()
    .expect("first run");
    assert_eq!(first.timed_out, 1);

    let expired = signals.polled.lock().expect("lock")[0].clone();
    signals.raise(&expired).expect("late scan");

    let second = DisplayLoop::new(
        config,
        RecordingDisplay::default(),
        signals.clone(),
        engine(),
        ShutdownFlag::new(),
    )
    .run()
    .expect("second run");

    assert_eq!(second.acknowledged, 0);
    assert!(signals.pending().expect("pending").is_empty());
}

#[test]
fn foreign_scan_during_poll_is_cleared_at_shutdown() {
    let signals = Arc::new(MemorySignalChannel::new());
    let writer = signals.clone();
    let mut config = config(Some(1));
    config.ack_timeout = Duration::from_millis(150);

    let summary = thread::scope(|scope| {
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(40));
            writer
                .raise(&SignalKey::Session("01OTHERSESSION".to_string()))
                .expect("raise");
        });
        DisplayLoop::new(
            config,
            RecordingDisplay::default(),
            signals.clone(),
            engine(),
            ShutdownFlag::new(),
        )
        .run()
        .expect("run")
    });

    assert_eq!(summary.timed_out, 1);
    assert!(signals.pending().expect("pending").is_empty());
}
