//! CAN Bench CLI Application
//!
//! Command-line front end for the can-bench library:
//! - `run`: execute the scenarios of a bench file
//! - `listen`: print every frame seen on an interface
//! - `burst`: send a raw frame repeatedly, then dump the traffic
//! - `inspect`: load a DBC file and print its messages

use anyhow::{bail, Context, Result};
use can_bench::{
    BurstScenario, BusChannel, CancelToken, LoadOptions, MonitorScenario, Scenario, ScenarioRunner,
    SignalDatabase, VirtualBus,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

mod config;
mod report;

/// CAN Bench - Simulate ECUs and check their responses on a CAN bus
#[derive(Parser, Debug)]
#[command(name = "can-bench-cli")]
#[command(about = "Inject, listen and assert on a CAN bus", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every scenario of a bench file
    Run {
        /// Path to the bench file (bench.toml)
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print every received frame
    Listen {
        /// CAN interface, or `virtual`
        #[arg(short, long, default_value = "can0")]
        interface: String,

        /// Receive timeout in seconds
        #[arg(long, default_value_t = 1.0)]
        timeout: f64,

        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<f64>,
    },

    /// Send one raw frame repeatedly, then print received frames
    Burst {
        /// CAN interface, or `virtual`
        #[arg(short, long, default_value = "can0")]
        interface: String,

        /// Arbitration id, hex (0xC0) or decimal
        #[arg(long, value_parser = parse_id)]
        id: u32,

        /// Use a 29-bit identifier
        #[arg(long)]
        extended: bool,

        /// Payload as hex, e.g. 0102030101010101
        #[arg(long, value_parser = parse_payload)]
        data: Payload,

        /// Number of copies to send
        #[arg(long, default_value_t = 10)]
        count: usize,

        /// Gap between copies in seconds
        #[arg(long, default_value_t = 0.1)]
        interval: f64,

        /// Number of receive polls after sending
        #[arg(long, default_value_t = 0)]
        listen: usize,

        /// Timeout of each receive poll in seconds
        #[arg(long, default_value_t = 1.0)]
        listen_timeout: f64,
    },

    /// Load a DBC file and print its messages and signals
    Inspect {
        /// Path to the DBC file
        #[arg(long, value_name = "FILE")]
        dbc: PathBuf,

        /// Report overlapping signals as warnings instead of failing
        #[arg(long)]
        lenient: bool,
    },
}

/// Frame payload given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
struct Payload(Vec<u8>);

fn main() -> ExitCode {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Bench CLI v{}", env!("CARGO_PKG_VERSION"));
    log::debug!("Using bench library v{}", can_bench::VERSION);

    match execute(args.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Run one subcommand; `Ok(false)` means a scenario failed
fn execute(command: Command) -> Result<bool> {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::warn!("Interrupted, stopping");
        handler_token.cancel();
    })
    .context("Failed to install Ctrl-C handler")?;

    match command {
        Command::Run { config, json } => run_bench(&config, json, &cancel),
        Command::Listen {
            interface,
            timeout,
            duration,
        } => {
            let scenario = Scenario::Monitor(MonitorScenario {
                name: format!("listen {}", interface),
                recv_timeout_s: timeout,
                duration_s: duration,
            });
            run_single(&interface, &scenario, &cancel)
        }
        Command::Burst {
            interface,
            id,
            extended,
            data,
            count,
            interval,
            listen,
            listen_timeout,
        } => {
            let scenario = Scenario::Burst(BurstScenario {
                name: format!("burst 0x{:X}", id),
                id,
                extended,
                data: data.0,
                count,
                interval_s: interval,
                listen_count: listen,
                listen_timeout_s: listen_timeout,
            });
            run_single(&interface, &scenario, &cancel)
        }
        Command::Inspect { dbc, lenient } => {
            inspect(&dbc, lenient)?;
            Ok(true)
        }
    }
}

/// Load the bench file, then run its scenarios in order on a fresh channel each
fn run_bench(config_path: &Path, json: bool, cancel: &CancelToken) -> Result<bool> {
    log::info!("Loading configuration from: {:?}", config_path);
    let config = config::load_config(config_path)?;

    let db = match &config.database {
        Some(database) => load_database(&database.path, database.options)?,
        None => SignalDatabase::load(Vec::new(), LoadOptions::default())?,
    };

    let mut runner = ScenarioRunner::new(&db).with_cancel_token(cancel.clone());
    if json {
        // Keep stdout for the JSON document
        runner = runner.with_output(|line| log::info!("{}", line));
    }

    let mut summary = report::BenchSummary::new(chrono::Local::now(), &config.bus.interface);
    for scenario in &config.scenarios {
        if cancel.is_cancelled() {
            log::warn!("Skipping scenario '{}' after interrupt", scenario.name());
            summary.cancelled = true;
            continue;
        }
        let channel = open_channel(&config.bus.interface)?;
        let report = runner
            .run(channel, scenario)
            .with_context(|| format!("Scenario '{}' aborted", scenario.name()))?;
        summary.push(report);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.render_text());
    }
    Ok(summary.passed())
}

fn run_single(interface: &str, scenario: &Scenario, cancel: &CancelToken) -> Result<bool> {
    let db = SignalDatabase::load(Vec::new(), LoadOptions::default())?;
    let runner = ScenarioRunner::new(&db).with_cancel_token(cancel.clone());
    let channel = open_channel(interface)?;
    let report = runner.run(channel, scenario)?;
    log::info!(
        "{}: {} sent, {} received in {:.2} s",
        report.name,
        report.run.frames_sent,
        report.run.frames_received,
        report.run.elapsed.as_secs_f64()
    );
    Ok(!report.outcome.is_failure())
}

fn inspect(path: &Path, lenient: bool) -> Result<()> {
    let options = if lenient {
        LoadOptions::lenient()
    } else {
        LoadOptions::default()
    };
    let db = load_database(path, options)?;

    let stats = db.stats();
    println!("Signal Database: {:?}", path);
    println!("  Messages: {}", stats.num_messages);
    println!("  Signals:  {}", stats.num_signals);
    println!();

    for message in db.messages() {
        println!(
            "0x{:03X}{} {} ({} bytes{})",
            message.id,
            if message.is_extended { "x" } else { "" },
            message.name,
            message.size,
            message
                .sender
                .as_ref()
                .map(|s| format!(", from {}", s))
                .unwrap_or_default()
        );
        for signal in &message.signals {
            println!(
                "    {:<40} bit {:>2} len {:>2} {:?} {:?} x{} +{} {}",
                signal.name,
                signal.start_bit,
                signal.length,
                signal.byte_order,
                signal.value_type,
                signal.factor,
                signal.offset,
                signal.unit.as_deref().unwrap_or("")
            );
        }
    }
    Ok(())
}

fn load_database(path: &Path, options: LoadOptions) -> Result<SignalDatabase> {
    log::info!("Loading DBC: {:?}", path);
    SignalDatabase::load_dbc_file(path, options)
        .with_context(|| format!("Failed to load DBC file: {:?}", path))
}

/// Open a bus channel by interface name.
///
/// `virtual` gives a silent in-memory bus (sends go nowhere, receives time
/// out), usable for dry runs without hardware.
fn open_channel(interface: &str) -> Result<Box<dyn BusChannel>> {
    if interface == "virtual" {
        let (channel, _peer) = VirtualBus::pair();
        return Ok(Box::new(channel));
    }
    open_hardware_channel(interface)
}

#[cfg(feature = "socketcan")]
fn open_hardware_channel(interface: &str) -> Result<Box<dyn BusChannel>> {
    let channel = can_bench::SocketCanChannel::open(interface)
        .with_context(|| format!("Failed to open CAN interface {}", interface))?;
    Ok(Box::new(channel))
}

#[cfg(not(feature = "socketcan"))]
fn open_hardware_channel(interface: &str) -> Result<Box<dyn BusChannel>> {
    bail!(
        "interface '{}' needs the `socketcan` feature; rebuild with --features socketcan or use `virtual`",
        interface
    )
}

/// Parse `0xC0`, `C0h` or `192`
fn parse_id(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if let Some(hex) = s.strip_suffix('h') {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.with_context(|| format!("invalid CAN id '{}'", s))
}

/// Parse hex bytes; spaces, `:` and `,` between bytes are ignored
fn parse_payload(s: &str) -> Result<Payload> {
    let digits: String = s
        .chars()
        .filter(|c| !matches!(c, ' ' | ':' | ','))
        .collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);
    if digits.len() % 2 != 0 {
        bail!("payload '{}' has an odd number of hex digits", s);
    }
    let bytes = (0..digits.len())
        .step_by(2)
        .map(|i| {
            digits
                .get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .with_context(|| format!("invalid hex byte at offset {} in '{}'", i, s))
        })
        .collect::<Result<Vec<u8>>>()?;
    if bytes.len() > 8 {
        bail!("payload '{}' is {} bytes, at most 8 allowed", s, bytes.len());
    }
    Ok(Payload(bytes))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
