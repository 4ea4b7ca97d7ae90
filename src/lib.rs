//! # Modbus Signal Map - Signal Mapping Layer for Modbus Master Drivers
//!
//! Turns a flat list of named signals, each described by a short
//! configuration string, into batched Modbus transactions, and turns the
//! raw words read back into typed, scaled engineering values.
//!
//! ## Features
//!
//! - **Signal parsing**: `mbFunctionNumber:3, reg:100, type:float, byteOrder:2-3-0-1`
//! - **Batched reads**: contiguous spans split into bounded chunks
//! - **Byte-order codecs**: 16/32/64-bit values in all four word/byte permutations
//! - **Scaling**: linear raw ↔ engineering-unit mapping with band checks
//! - **Serialized writes**: concurrent requests retried onto one shared link
//!
//! The wire protocol (framing, CRC, TCP/RTU/ASCII I/O) stays behind the
//! [`ModbusTransport`] trait; published values go to a [`ValueSink`].
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Map |
//! |------|----------|-----|
//! | 0x01 | Read Coils | [`ReadMap`] |
//! | 0x02 | Read Discrete Inputs | [`ReadMap`] |
//! | 0x03 | Read Holding Registers | [`ReadMap`] |
//! | 0x04 | Read Input Registers | [`ReadMap`] |
//! | 0x05 | Write Single Coil | [`WriteMap`] |
//! | 0x06 | Write Single Register | [`WriteMap`] |
//! | 0x0F | Write Multiple Coils | [`WriteMap`] |
//! | 0x10 | Write Multiple Registers | [`WriteMap`] |
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use modbus_signal_map::{
//!     DeviceSettings, LiveValues, MapResult, MasterDevice, SignalConfig, SimulatedDevice,
//!     WriteRequest, WriteState,
//! };
//!
//! #[tokio::main]
//! async fn main() -> MapResult<()> {
//!     let plc = SimulatedDevice::new();
//!     plc.set_holding_registers(10, &[0x41C8, 0x0000]);
//!
//!     let values = Arc::new(LiveValues::new());
//!     let mut device = MasterDevice::new("boiler", DeviceSettings::new(), plc, values.clone());
//!     device.init(&[
//!         SignalConfig::new("temperature", "mbFunctionNumber:3, reg:10, type:float"),
//!         SignalConfig::new("setpoint", "mbFunctionNumber:16, reg:20, type:float")
//!             .with_eu_band(0.0, 100.0),
//!     ])?;
//!
//!     device.poll().await?;
//!     assert_eq!(values.get("temperature"), Some(25.0));
//!
//!     device.spawn_writers()?;
//!     let handle = device.submit(WriteRequest::new("setpoint", 42.5))?;
//!     assert_eq!(handle.finished().await, WriteState::Succeeded);
//!     Ok(())
//! }
//! ```

// ============================================================================
// Core modules
// ============================================================================

/// Core error types and result handling
pub mod error;

/// Modbus protocol constants and driver defaults
pub mod constants;

/// Modbus function codes handled by the maps
pub mod function;

/// Transport collaborator interface
pub mod transport;

/// Shared link lock and process-wide link registry
pub mod link;

// ============================================================================
// Data handling
// ============================================================================

/// Signal data types and decoded raw values
pub mod value;

/// Byte order handling for multi-register data types
pub mod bytes;

/// Encoding and decoding of register words
pub mod codec;

/// Raw ↔ engineering unit scaling
pub mod scaling;

// ============================================================================
// Mapping
// ============================================================================

/// Signal descriptor parsing
pub mod signal;

/// Span computation and chunked read planning
pub mod planner;

/// Per-function poll orchestration
pub mod read_map;

/// Per-function write orchestration and retry loop
pub mod write_map;

/// Live value publication
pub mod sink;

/// Device-level settings
pub mod settings;

/// Device wiring of read and write maps onto one link
pub mod device;

/// In-process Modbus slave for tests and demos
pub mod simulator;

// ============================================================================
// Re-exports for convenience
// ============================================================================

// === Async runtime ===
pub use tokio;

// === Error handling ===
pub use error::{MapError, MapResult};

// === Core types ===
pub use bytes::ByteOrder;
pub use function::ModbusFunction;
pub use scaling::{ScaleBand, Scaling};
pub use transport::{ModbusTransport, SlaveId, WritePayload};
pub use value::{DataType, RawValue};

// === Signals ===
pub use signal::{
    parse_configs, MainAttributes, ScaleConfig, SignalConfig, SignalDescriptor, SignalType,
};

// === Maps ===
pub use device::{MasterDevice, PollReport};
pub use planner::{ReadChunk, RegisterSpan};
pub use read_map::{RawValueTable, ReadMap};
pub use write_map::{
    RequestHandle, WriteMap, WriteOutcome, WriteRequest, WriteState, WriteSubmitter,
};

// === Links and hosts ===
pub use link::{Link, LinkGuard, LinkRegistry};
pub use settings::{DeviceSettings, Protocol, SourceArg};
pub use simulator::SimulatedDevice;
pub use sink::{LiveValue, LiveValues, ValueSink};

// === Protocol limits (commonly needed constants) ===
pub use constants::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};

#[doc(hidden)]
pub use codec::{clamp_to_data_type, decode_registers, encode_raw};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
