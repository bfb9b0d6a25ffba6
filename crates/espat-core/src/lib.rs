//! # espat Core Library
//!
//! Protocol engine for WiFi co-processors driven by AT commands over a serial
//! link (ESP8266 family).

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A resumable parser for the module's mixed line and binary output
//! - One-at-a-time command dispatch with deadlines and tickets
//! - A connection table with per-link receive buffering
//! - Event delivery, immediate or deferred, with follow-up actions
//! - Station, soft-AP, SNTP and transparent-transfer operations
//!
//! ## Example
//!
//! ```rust,ignore
//! use espat_core::prelude::*;
//!
//! let (producer, rx) = rx_buffer(4096);
//! let transport = SerialTransport::open("/dev/ttyUSB0", 115200, producer)?;
//! let clock = Clock::new();
//! let _ticker = clock.spawn_ticker(std::time::Duration::from_millis(1));
//!
//! let mut engine = Engine::new(
//!     EngineConfig::default(),
//!     Platform { transport: Box::new(transport), rx, clock },
//! )?;
//! engine.initialize()?;
//! for ap in engine.scan()? {
//!     println!("{} ({} dBm)", ap.ssid, ap.rssi);
//! }
//! ```

pub mod buffer;
pub mod clock;
pub mod config;
pub mod connection;
pub mod engine;
pub mod event;
pub mod protocol;
pub mod shared;
pub mod sync;
pub mod wifi;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::buffer::{rx_buffer, RxConsumer, RxProducer};
    pub use crate::clock::{Clock, Deadline, Ticker};
    pub use crate::config::{ContentLengthPolicy, DeliveryMode, EngineConfig, TimeoutConfig};
    pub use crate::connection::{ConnectionId, ConnectionState, ConnectionType, Role};
    pub use crate::engine::{Engine, Platform};
    pub use crate::event::{Action, Actions, Event};
    pub use crate::protocol::{
        list_ports, CommandOutput, CommandTicket, EspError, SerialTransport, Transmit,
    };
    pub use crate::shared::SharedEngine;
    pub use crate::sync::{LockPrimitive, NoLock, StdLock};
    pub use crate::wifi::{
        AccessPoint, SntpConfig, SoftApConfig, TransferMode, WifiMode, WifiStatus,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
