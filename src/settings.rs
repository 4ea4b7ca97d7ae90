//! # Device Settings
//!
//! Per-device configuration of the mapping layer.
//!
//! Settings come either from a serde document (JSON/YAML) or from the host's
//! flat `name=value` source arguments:
//!
//! | Argument | Field | Default |
//! |----------|-------|---------|
//! | `Protocol` | `protocol` | `ModbusTCP` |
//! | `IPAddress` / `Port` | `ip_address` / `port` | `192.168.0.1` / `502` |
//! | `PortName` / `BaudRate` | `port_name` / `baud_rate` | `COM1` / `9600` |
//! | `Parity` / `DataBits` / `StopBits` | serial framing | `None` / `8` / `One` |
//! | `SlaveId` | `slave_id` | `1` |
//! | `MaxNumberReadRegistersAtTime` | `max_read_registers` | `0` (unlimited) |
//! | `RegisterShift` | `register_shift` | `0` |
//!
//! Unparsable values are logged and ignored; the field keeps its previous
//! value.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::constants::{DEFAULT_SLAVE_ID, DEFAULT_WRITE_BACKOFF_MS};
use crate::transport::SlaveId;

/// Default host poll cadence in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Default time without a poll after which the link is closed (milliseconds).
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 20_000;

/// Physical protocol of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(alias = "modbustcp", alias = "ModbusTCP")]
    Tcp,
    #[serde(alias = "modbusrtu", alias = "ModbusRTU")]
    Rtu,
    #[serde(alias = "modbusascii", alias = "ModbusASCII")]
    Ascii,
}

impl Protocol {
    /// Serial links are released after every transaction.
    #[inline]
    pub fn is_serial(&self) -> bool {
        matches!(self, Self::Rtu | Self::Ascii)
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "modbustcp" | "tcp" => Ok(Self::Tcp),
            "modbusrtu" | "rtu" => Ok(Self::Rtu),
            "modbusascii" | "ascii" => Ok(Self::Ascii),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "ModbusTcp"),
            Self::Rtu => write!(f, "ModbusRtu"),
            Self::Ascii => write!(f, "ModbusAscii"),
        }
    }
}

/// One host source argument.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceArg {
    pub name: String,
    pub value: String,
}

impl SourceArg {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Mapping-layer settings of one Modbus device.
///
/// # Example
///
/// ```rust
/// use modbus_signal_map::DeviceSettings;
///
/// let settings = DeviceSettings::new()
///     .with_slave_id(3)
///     .with_max_read_registers(50)
///     .with_register_shift(-1);
///
/// assert_eq!(settings.slave_id, 3);
/// assert_eq!(settings.link_id(), "192.168.0.1:502");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub protocol: Protocol,

    pub ip_address: String,
    pub port: u16,

    pub port_name: String,
    pub baud_rate: u32,
    pub parity: String,
    pub data_bits: u8,
    pub stop_bits: String,

    pub slave_id: SlaveId,
    /// Maximum points per read request; 0 reads each span in one request.
    pub max_read_registers: u16,
    /// Signed offset added to every configured register address.
    pub register_shift: i16,
    /// Pause between write attempts after a failure (milliseconds).
    pub write_backoff_ms: u64,
    /// Host poll cadence (milliseconds).
    pub poll_interval_ms: u64,
    /// Close the link when no poll ran for this long (milliseconds).
    pub idle_timeout_ms: u64,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            protocol: Protocol::default(),
            ip_address: "192.168.0.1".to_string(),
            port: 502,
            port_name: "COM1".to_string(),
            baud_rate: 9600,
            parity: "None".to_string(),
            data_bits: 8,
            stop_bits: "One".to_string(),
            slave_id: DEFAULT_SLAVE_ID,
            max_read_registers: 0,
            register_shift: 0,
            write_backoff_ms: DEFAULT_WRITE_BACKOFF_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            idle_timeout_ms: DEFAULT_IDLE_TIMEOUT_MS,
        }
    }
}

impl DeviceSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build settings from the host's source arguments.
    ///
    /// Unknown argument names are ignored. Values that fail to parse are
    /// logged and leave the default in place.
    pub fn from_source_args<'a>(
        device: &str,
        args: impl IntoIterator<Item = &'a SourceArg>,
    ) -> Self {
        let mut settings = Self::default();
        for arg in args {
            let value = arg.value.trim();
            match arg.name.as_str() {
                "Protocol" => assign(device, arg, &mut settings.protocol),
                "IPAddress" => settings.ip_address = value.to_string(),
                "Port" => assign(device, arg, &mut settings.port),
                "PortName" => settings.port_name = value.to_string(),
                "BaudRate" => assign(device, arg, &mut settings.baud_rate),
                "Parity" => settings.parity = value.to_string(),
                "DataBits" => assign(device, arg, &mut settings.data_bits),
                "StopBits" => settings.stop_bits = value.to_string(),
                "SlaveId" => assign(device, arg, &mut settings.slave_id),
                "MaxNumberReadRegistersAtTime" => {
                    assign(device, arg, &mut settings.max_read_registers)
                }
                "RegisterShift" => assign(device, arg, &mut settings.register_shift),
                _ => {}
            }
        }

        info!(
            device,
            protocol = %settings.protocol,
            link = %settings.link_id(),
            slave_id = settings.slave_id,
            max_read_registers = settings.max_read_registers,
            register_shift = settings.register_shift,
            "device settings loaded"
        );
        settings
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_tcp_address(mut self, ip_address: impl Into<String>, port: u16) -> Self {
        self.protocol = Protocol::Tcp;
        self.ip_address = ip_address.into();
        self.port = port;
        self
    }

    pub fn with_serial_port(mut self, protocol: Protocol, port_name: impl Into<String>) -> Self {
        self.protocol = protocol;
        self.port_name = port_name.into();
        self
    }

    pub fn with_slave_id(mut self, slave_id: SlaveId) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_max_read_registers(mut self, count: u16) -> Self {
        self.max_read_registers = count;
        self
    }

    pub fn with_register_shift(mut self, shift: i16) -> Self {
        self.register_shift = shift;
        self
    }

    pub fn with_write_backoff(mut self, backoff: Duration) -> Self {
        self.write_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[inline]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    #[inline]
    pub fn write_backoff(&self) -> Duration {
        Duration::from_millis(self.write_backoff_ms)
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Key of the physical link. Devices on the same serial port share it.
    pub fn link_id(&self) -> String {
        if self.protocol.is_serial() {
            self.port_name.clone()
        } else {
            format!("{}:{}", self.ip_address, self.port)
        }
    }
}

fn assign<T>(device: &str, arg: &SourceArg, field: &mut T)
where
    T: FromStr,
{
    match arg.value.trim().parse::<T>() {
        Ok(value) => *field = value,
        Err(_) => warn!(
            device,
            argument = %arg.name,
            value = %arg.value,
            "ignoring unparsable source argument"
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = DeviceSettings::default();
        assert_eq!(settings.protocol, Protocol::Tcp);
        assert_eq!(settings.slave_id, DEFAULT_SLAVE_ID);
        assert_eq!(settings.max_read_registers, 0);
        assert_eq!(settings.register_shift, 0);
        assert_eq!(settings.write_backoff(), Duration::from_millis(50));
        assert_eq!(settings.link_id(), "192.168.0.1:502");
    }

    #[test]
    fn test_builder_pattern() {
        let settings = DeviceSettings::new()
            .with_serial_port(Protocol::Rtu, "/dev/ttyUSB0")
            .with_slave_id(17)
            .with_max_read_registers(60)
            .with_register_shift(-1)
            .with_write_backoff(Duration::from_millis(5));

        assert!(settings.protocol.is_serial());
        assert_eq!(settings.link_id(), "/dev/ttyUSB0");
        assert_eq!(settings.slave_id, 17);
        assert_eq!(settings.max_read_registers, 60);
        assert_eq!(settings.register_shift, -1);
        assert_eq!(settings.write_backoff_ms, 5);
    }

    #[test]
    fn test_from_source_args() {
        let args = vec![
            SourceArg::new("Protocol", "ModbusRTU"),
            SourceArg::new("PortName", "COM7"),
            SourceArg::new("BaudRate", "19200"),
            SourceArg::new("SlaveId", "12"),
            SourceArg::new("MaxNumberReadRegistersAtTime", "40"),
            SourceArg::new("RegisterShift", "-1"),
            SourceArg::new("Comment", "ignored"),
        ];
        let settings = DeviceSettings::from_source_args("boiler", &args);

        assert_eq!(settings.protocol, Protocol::Rtu);
        assert_eq!(settings.link_id(), "COM7");
        assert_eq!(settings.baud_rate, 19200);
        assert_eq!(settings.slave_id, 12);
        assert_eq!(settings.max_read_registers, 40);
        assert_eq!(settings.register_shift, -1);
    }

    #[test]
    fn test_from_source_args_ignores_bad_values() {
        let args = vec![
            SourceArg::new("SlaveId", "300"),
            SourceArg::new("MaxNumberReadRegistersAtTime", "many"),
            SourceArg::new("RegisterShift", "40000"),
            SourceArg::new("Protocol", "profibus"),
        ];
        let settings = DeviceSettings::from_source_args("boiler", &args);
        assert_eq!(settings, DeviceSettings::default());
    }

    #[test]
    fn test_deserialize_partial() {
        let json = r#"{"protocol": "modbusascii", "port_name": "COM2", "slave_id": 4}"#;
        let settings: DeviceSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.protocol, Protocol::Ascii);
        assert_eq!(settings.link_id(), "COM2");
        assert_eq!(settings.slave_id, 4);
        assert_eq!(settings.write_backoff_ms, DEFAULT_WRITE_BACKOFF_MS);
    }
}
