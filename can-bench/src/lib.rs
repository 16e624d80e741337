//! CAN Bench Library
//!
//! Building blocks for simulating control units on a CAN bus: a DBC-driven
//! signal database, a frame codec, swappable bus channels, a scheduled
//! transmit/receive loop and the bench scenarios built on top of them.
//!
//! # Architecture
//!
//! - [`SignalDatabase`] is loaded once and shared read-only (`&` or `Arc`).
//! - [`FrameCodec`] encodes physical values into frames and decodes them back.
//! - [`BusChannel`] is the transport seam: [`VirtualBus`] in memory,
//!   `SocketCanChannel` on Linux with the `socketcan` feature.
//! - [`ScheduledTransceiver`] transmits on a fixed period and polls for inbound
//!   frames in between, closing the channel on every exit path.
//! - [`ScenarioRunner`] composes the above into request/response checks,
//!   continuous injection, bursts and bus monitoring.
//!
//! Argument parsing, scenario files and logging setup live in the CLI crate.
//!
//! # Example Usage
//!
//! ```no_run
//! use can_bench::{FrameCodec, LoadOptions, ScheduledTransceiver, SignalDatabase, TransceiverConfig, VirtualBus};
//! use std::path::Path;
//!
//! let db = SignalDatabase::load_dbc_file(Path::new("LC_Main.dbc"), LoadOptions::default()).unwrap();
//! let speed = db.message_by_name("MCM_Motor_Position_Info").unwrap();
//! let frame = FrameCodec::encode(speed, &[("MCM_Motor_Speed", 4000.0)]).unwrap();
//!
//! let (channel, _ecu) = VirtualBus::pair();
//! let transceiver = ScheduledTransceiver::new(TransceiverConfig::new(0.01, 5.0)).unwrap();
//! let report = transceiver
//!     .run(
//!         channel,
//!         || Ok(vec![frame.clone()]),
//!         |inbound| {
//!             let decoded = FrameCodec::decode_frame(&db, inbound)?;
//!             println!("{} from 0x{:X}", decoded.message, decoded.can_id);
//!             Ok(())
//!         },
//!     )
//!     .unwrap();
//! println!("{} ticks", report.ticks);
//! ```

// Public modules
pub mod bus;
pub mod codec;
pub mod config;
pub mod scenario;
pub mod signals;
pub mod transceiver;
pub mod types;

// Re-export main types for convenience
#[cfg(feature = "socketcan")]
pub use bus::SocketCanChannel;
pub use bus::{BusChannel, ChannelGuard, VirtualBus, VirtualChannel};
pub use codec::FrameCodec;
pub use config::TransceiverConfig;
pub use scenario::{
    pack_be_u16, BurstScenario, InjectFrame, InjectionScenario, MessageValues, MonitorScenario,
    RawFrame, RequestResponseScenario, Scenario, ScenarioOutcome, ScenarioReport, ScenarioRunner,
    WatchSpec,
};
pub use signals::{
    ByteOrder, DatabaseStats, LoadOptions, MessageDefinition, MultiplexerInfo, SignalDatabase,
    SignalDefinition, ValueType,
};
pub use transceiver::{CancelToken, RunReport, ScheduledTransceiver};
pub use types::{DecodedSignal, DecodedSignals, Frame, HarnessError, Result, SignalValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
