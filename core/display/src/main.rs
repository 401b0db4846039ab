//! scanpad-display: device process for the scan-to-confirm loop.
//!
//! ## Subcommands
//!
//! - `run`: show codes and wait for scans until interrupted
//! - `scan`: raise a scan signal locally (same effect as the receiver's `/scan`)
//! - `clear-signals`: remove every pending marker
//! - `layout`: print the computed layout as JSON, no device needed

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use scanpad_core::{
    load_device_config, load_metadata, metrics_for_font, Canvas, CodeImager, DeviceConfig,
    DisplayLoop, FsSignalChannel, HeadlessDisplay, LayoutConstraints, LayoutEngine, LayoutFields,
    LoopConfig, PayloadBuilder, PayloadMode, QrImager, Result, ShutdownFlag, SignalChannel,
    SignalKey, StorageConfig,
};

#[derive(Parser)]
#[command(name = "scanpad-display")]
#[command(about = "Shows scan codes on an e-paper panel and waits for confirmation")]
#[command(version)]
struct Cli {
    /// Device configuration file (default: ~/.scanpad/device.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Signal directory shared with the receiver
    #[arg(long, global = true)]
    signal_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the display loop
    Run {
        #[command(flatten)]
        device: DeviceArgs,

        /// Payload mode: json, image or url
        #[arg(long)]
        mode: Option<PayloadMode>,

        /// Seconds to wait for a scan (or to show each code with --no-wait)
        #[arg(long)]
        timeout: Option<u64>,

        /// Show each code for a fixed time instead of waiting for a scan
        #[arg(long)]
        no_wait: bool,

        /// Stop after this many codes
        #[arg(long)]
        cycles: Option<u64>,

        /// Write each frame as a PNG into this directory
        #[arg(long)]
        snapshots: Option<PathBuf>,
    },

    /// Raise a scan signal for a session id (`*` for the wildcard)
    Scan {
        #[arg(value_name = "SESSION_ID")]
        session_id: String,
    },

    /// Remove every pending scan signal
    ClearSignals,

    /// Print the layout for the given text as JSON
    Layout {
        #[command(flatten)]
        device: DeviceArgs,

        /// Name line (defaults to the metadata name)
        #[arg(long)]
        name: Option<String>,

        /// Description (defaults to the metadata description)
        #[arg(long)]
        description: Option<String>,

        #[arg(long, default_value = "01J0000000000000000EXAMPLE")]
        session_id: String,
    },
}

#[derive(Args)]
struct DeviceArgs {
    /// Metadata document (path or file:// URI)
    #[arg(long)]
    metadata: Option<String>,

    /// Font file; without one, text is rendered ASCII-only
    #[arg(long)]
    font: Option<PathBuf>,

    #[arg(long)]
    node_id: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,
}

impl DeviceArgs {
    fn apply(self, config: &mut DeviceConfig) {
        if let Some(metadata) = self.metadata {
            config.metadata_source = Some(metadata);
        }
        if let Some(font) = self.font {
            config.font_source = Some(font);
        }
        if let Some(node_id) = self.node_id {
            config.node_id = node_id;
        }
        if let Some(width) = self.width {
            config.canvas_width = width;
        }
        if let Some(height) = self.height {
            config.canvas_height = height;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let storage = StorageConfig::default();
    let _logging_guard = logging::init(&storage.log_dir());

    if let Err(err) = dispatch(cli, &storage) {
        tracing::error!(error = %err, "scanpad-display failed");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli, storage: &StorageConfig) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(|| storage.config_file());
    let mut config = load_device_config(&config_path)?;
    config.apply_env();
    if let Some(dir) = cli.signal_dir {
        config.signal_dir = Some(dir);
    }

    match cli.command {
        Commands::Run {
            device,
            mode,
            timeout,
            no_wait,
            cycles,
            snapshots,
        } => {
            device.apply(&mut config);
            if let Some(mode) = mode {
                config.mode = mode;
            }
            if let Some(timeout) = timeout {
                config.timeout_secs = timeout;
            }
            if no_wait {
                config.wait_for_ack = false;
            }
            run(&config, storage, cycles, snapshots)
        }
        Commands::Scan { session_id } => {
            let key = SignalKey::parse(&session_id)?;
            signal_channel(&config, storage)?.raise(&key)?;
            println!("raised {}", key);
            Ok(())
        }
        Commands::ClearSignals => {
            let removed = signal_channel(&config, storage)?.sweep()?;
            println!("removed {} signal(s)", removed);
            Ok(())
        }
        Commands::Layout {
            device,
            name,
            description,
            session_id,
        } => {
            device.apply(&mut config);
            print_layout(&config, name, description, &session_id)
        }
    }
}

fn signal_channel(config: &DeviceConfig, storage: &StorageConfig) -> Result<FsSignalChannel> {
    FsSignalChannel::open(config.signal_dir_or(storage))
}

fn layout_engine(config: &DeviceConfig) -> LayoutEngine {
    let metrics = metrics_for_font(config.font_source.as_deref());
    LayoutEngine::new(LayoutConstraints::default(), Arc::new(metrics))
}

fn run(
    config: &DeviceConfig,
    storage: &StorageConfig,
    cycles: Option<u64>,
    snapshots: Option<PathBuf>,
) -> Result<()> {
    let signals = signal_channel(config, storage)?;
    tracing::info!(
        mode = %config.mode,
        wait_for_ack = config.wait_for_ack,
        timeout_secs = config.timeout_secs,
        signal_dir = %signals.dir().display(),
        "scanpad display starting"
    );

    let shutdown = ShutdownFlag::new();
    let handler_flag = shutdown.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_flag.request()) {
        tracing::warn!(error = %err, "Failed to install interrupt handler");
    }

    let mut display = HeadlessDisplay::new(config.canvas());
    if let Some(dir) = snapshots {
        display = display.with_snapshots(dir);
    }

    let mut loop_config = LoopConfig::from(config);
    loop_config.max_cycles = cycles;

    DisplayLoop::new(
        loop_config,
        display,
        Arc::new(signals),
        layout_engine(config),
        shutdown,
    )
    .run()
    .map(|_| ())
}

fn print_layout(
    config: &DeviceConfig,
    name: Option<String>,
    description: Option<String>,
    session_id: &str,
) -> Result<()> {
    let metadata = load_metadata(config.metadata_source.as_deref()).metadata;
    let payload = PayloadBuilder::new(config.mode, config.scan_base_url.clone()).build(
        &metadata,
        session_id,
        &config.node_id,
    )?;
    let bitmap = QrImager::default().encode(&payload)?;

    let fields = LayoutFields::device(
        &config.node_id,
        "0000-00-00 00:00:00",
        session_id,
        name.as_deref().unwrap_or(&metadata.name),
        description.as_deref().unwrap_or(&metadata.description),
    );
    let canvas: Canvas = config.canvas();
    let layout = layout_engine(config).layout(canvas, &fields, &bitmap);

    let report = serde_json::json!({
        "canvas": canvas,
        "code_edge": layout.code_edge,
        "text_bottom": layout.text_bottom,
        "compressed": layout.compressed,
        "truncated": layout.truncated,
        "body_dropped": layout.body_dropped,
        "undersized": layout.undersized,
        "ops": layout.frame.ops,
    });
    let rendered = serde_json::to_string_pretty(&report).map_err(|source| {
        scanpad_core::ScanpadError::Json {
            context: "render layout report".to_string(),
            source,
        }
    })?;
    println!("{}", rendered);
    Ok(())
}
