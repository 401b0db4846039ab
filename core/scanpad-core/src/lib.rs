//! scanpad core library.
//!
//! Shows a machine-readable code on a small bitmap panel, waits for an
//! out-of-band "scanned" confirmation, then cycles to the next code.
//!
//! ## Modules
//!
//! - [`payload`]: mode + metadata + session identity to encoded bytes
//! - [`session`]: in-memory session records with an at-most-once validate
//! - [`signal`]: scan markers shared between the receiver and the device
//! - [`layout`]: wraps text and sizes the code image for a fixed canvas
//! - [`controller`]: the device loop state machine
//! - [`display`]: the panel driver boundary plus a headless driver
//! - [`code`]: QR bitmap generation
//! - [`metadata`], [`config`], [`storage`]: inputs and paths
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use scanpad_core::{
//!     Canvas, DisplayLoop, HeadlessDisplay, LayoutConstraints, LayoutEngine, LoopConfig,
//!     MemorySignalChannel, MonospaceMetrics, ShutdownFlag,
//! };
//!
//! let config = LoopConfig::from(&scanpad_core::DeviceConfig::default());
//! let engine = LayoutEngine::new(
//!     LayoutConstraints::default(),
//!     Arc::new(MonospaceMetrics::ascii_only()),
//! );
//! let mut display_loop = DisplayLoop::new(
//!     config,
//!     HeadlessDisplay::new(Canvas::new(122, 250)),
//!     Arc::new(MemorySignalChannel::new()),
//!     engine,
//!     ShutdownFlag::new(),
//! );
//! let summary = display_loop.run().expect("display loop");
//! println!("{} cycles", summary.cycles);
//! ```

pub mod code;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod layout;
pub mod metadata;
pub mod payload;
pub mod session;
pub mod signal;
pub mod storage;

pub use code::{CodeBitmap, CodeImager, QrImager};
pub use config::{load_device_config, DeviceConfig};
pub use controller::{DisplayLoop, LoopConfig, LoopState, LoopSummary, ShutdownFlag};
pub use display::{DisplayDriver, DisplayError, HeadlessDisplay};
pub use error::{Result, ScanpadError};
pub use layout::{
    metrics_for_font, Canvas, DrawOp, Frame, GlyphMetrics, Layout, LayoutConstraints,
    LayoutEngine, LayoutFields, MonospaceMetrics, TextStyle,
};
pub use metadata::{load_metadata, LoadedMetadata, Metadata, MetadataOrigin};
pub use payload::{PayloadBuilder, PayloadMode};
pub use session::{QrSession, SessionRecord, SessionStore, ValidateOutcome};
pub use signal::{
    ConsumeOutcome, FsSignalChannel, MemorySignalChannel, PollOptions, SignalChannel, SignalKey,
    WildcardPolicy,
};
pub use storage::StorageConfig;
