//! # Signal Descriptors
//!
//! A signal is configured by the host as a comma-separated `key:value`
//! string plus optional scale bands and main attributes:
//!
//! ```text
//! mbFunctionNumber:3, reg:100, type:float, byteOrder:word-swap
//! ```
//!
//! | Key | Required | Default |
//! |-----|----------|---------|
//! | `mbFunctionNumber` | yes | - |
//! | `reg` | yes | - |
//! | `type` | no | `ushort` |
//! | `byteOrder` | no | natural |
//! | `count` | no | 1 |
//!
//! Parsing is all-or-nothing: a malformed pair, a missing required key or
//! an unknown type/byte-order tag drops the whole signal.

use std::cmp::Ordering;

use serde::Deserialize;
use tracing::warn;

use crate::bytes::ByteOrder;
use crate::constants::{EU_BAND_NAME, RAW_BAND_NAME};
use crate::error::{MapError, MapResult};
use crate::function::ModbusFunction;
use crate::scaling::{ScaleBand, Scaling};
use crate::value::DataType;

/// Named scale band as provided by the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScaleConfig {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl ScaleConfig {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
        }
    }
}

/// Discrete (boolean-like) or analog signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "String")]
pub enum SignalType {
    Discrete,
    #[default]
    Analog,
}

impl From<&str> for SignalType {
    /// `discrete` selects boolean handling; every other tag is analog.
    fn from(tag: &str) -> Self {
        if tag.trim().eq_ignore_ascii_case("discrete") {
            Self::Discrete
        } else {
            Self::Analog
        }
    }
}

impl From<String> for SignalType {
    fn from(tag: String) -> Self {
        Self::from(tag.as_str())
    }
}

/// Main attributes record of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct MainAttributes {
    #[serde(default)]
    pub signal_type: SignalType,
    #[serde(default)]
    pub invert: bool,
}

/// Raw signal configuration as consumed from the host.
///
/// # Example
///
/// ```rust
/// use modbus_signal_map::{SignalConfig, SignalDescriptor, DataType};
///
/// let config = SignalConfig::new("tank_level", "mbFunctionNumber:3, reg:10, type:float");
/// let signal = SignalDescriptor::parse(&config).unwrap();
/// assert_eq!(signal.register, 10);
/// assert_eq!(signal.data_type, DataType::Float);
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SignalConfig {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub scales: Vec<ScaleConfig>,
    #[serde(default)]
    pub attributes: MainAttributes,
}

impl SignalConfig {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            scales: Vec::new(),
            attributes: MainAttributes::default(),
        }
    }

    pub fn with_scale(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.scales.push(ScaleConfig::new(name, min, max));
        self
    }

    pub fn with_raw_band(self, min: f64, max: f64) -> Self {
        self.with_scale(RAW_BAND_NAME, min, max)
    }

    pub fn with_eu_band(self, min: f64, max: f64) -> Self {
        self.with_scale(EU_BAND_NAME, min, max)
    }

    pub fn discrete(mut self, invert: bool) -> Self {
        self.attributes = MainAttributes {
            signal_type: SignalType::Discrete,
            invert,
        };
        self
    }
}

/// Immutable, typed description of one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDescriptor {
    pub name: String,
    pub function: ModbusFunction,
    pub register: u16,
    pub data_type: DataType,
    pub byte_order: ByteOrder,
    /// Stored for completeness; not used by the maps.
    pub count: u16,
    pub invert: bool,
    pub signal_type: SignalType,
    pub scaling: Scaling,
}

impl SignalDescriptor {
    /// Parse a host signal configuration.
    pub fn parse(config: &SignalConfig) -> MapResult<Self> {
        let name = config.name.as_str();
        if config.source.trim().is_empty() {
            return Err(MapError::malformed(name, "empty source string"));
        }

        let mut function = None;
        let mut register = None;
        let mut data_type = DataType::default();
        let mut byte_order_tag = "";
        let mut count = 1u16;

        for pair in config.source.split(',') {
            let tokens: Vec<&str> = pair.trim().split(':').collect();
            let [key, value] = tokens.as_slice() else {
                return Err(MapError::malformed(
                    name,
                    format!("expected key:value, got '{}'", pair.trim()),
                ));
            };
            let value = value.trim();

            match key.trim() {
                "mbFunctionNumber" => {
                    let code: u8 = parse_number(name, key, value)?;
                    function = Some(ModbusFunction::from_u8(code).ok_or_else(|| {
                        MapError::malformed(name, format!("unsupported function code {}", code))
                    })?);
                }
                "reg" => register = Some(parse_number::<u16>(name, key, value)?),
                "type" => {
                    data_type = DataType::from_config(value).ok_or_else(|| {
                        MapError::malformed(name, format!("unknown data type '{}'", value))
                    })?;
                }
                "byteOrder" => byte_order_tag = value,
                "count" => count = parse_number(name, key, value)?,
                _ => {}
            }
        }

        let function =
            function.ok_or_else(|| MapError::malformed(name, "missing mbFunctionNumber"))?;
        let register = register.ok_or_else(|| MapError::malformed(name, "missing reg"))?;

        let byte_order = ByteOrder::from_tag(byte_order_tag).ok_or_else(|| {
            MapError::malformed(name, format!("unknown byte order '{}'", byte_order_tag))
        })?;
        if !byte_order.supports_width(data_type.register_count()) {
            return Err(MapError::malformed(
                name,
                format!("byte order '{}' does not apply to {}", byte_order, data_type),
            ));
        }

        let scaling = parse_scaling(name, &config.scales)?;

        Ok(Self {
            name: config.name.clone(),
            function,
            register,
            data_type,
            byte_order,
            count,
            invert: config.attributes.invert,
            signal_type: config.attributes.signal_type,
            scaling,
        })
    }

    /// Number of registers (or bits, for coil functions) the signal occupies.
    #[inline]
    pub fn width(&self) -> u16 {
        if self.function.is_bit_access() {
            1
        } else {
            self.data_type.register_count()
        }
    }

    #[inline]
    pub fn is_discrete(&self) -> bool {
        self.signal_type == SignalType::Discrete
    }
}

/// Parse every config, logging and dropping the malformed ones.
pub fn parse_configs(configs: &[SignalConfig]) -> Vec<SignalDescriptor> {
    configs
        .iter()
        .filter_map(|config| match SignalDescriptor::parse(config) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(signal = %config.name, error = %e, "dropping signal");
                None
            }
        })
        .collect()
}

/// Sort signals ascending by register address (name breaks ties).
pub fn sort_by_register(signals: &mut [SignalDescriptor]) {
    signals.sort_by(compare_registers);
}

fn compare_registers(a: &SignalDescriptor, b: &SignalDescriptor) -> Ordering {
    a.register
        .cmp(&b.register)
        .then_with(|| a.name.cmp(&b.name))
}

fn parse_number<T: std::str::FromStr>(signal: &str, key: &str, value: &str) -> MapResult<T> {
    value
        .parse::<T>()
        .map_err(|_| MapError::malformed(signal, format!("invalid {} '{}'", key, value)))
}

fn parse_scaling(signal: &str, scales: &[ScaleConfig]) -> MapResult<Scaling> {
    let mut scaling = Scaling::identity();
    for scale in scales {
        let band = ScaleBand::new(scale.min, scale.max);
        if scale.name == EU_BAND_NAME {
            scaling.eu = Some(band);
        } else if scale.name == RAW_BAND_NAME {
            scaling.raw = Some(band);
        }
    }

    for band in [scaling.raw, scaling.eu].into_iter().flatten() {
        if band.span() == 0.0 || !band.span().is_finite() {
            return Err(MapError::malformed(
                signal,
                format!("degenerate scale band [{}; {}]", band.min, band.max),
            ));
        }
    }
    Ok(scaling)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> MapResult<SignalDescriptor> {
        SignalDescriptor::parse(&SignalConfig::new("sig", source))
    }

    #[test]
    fn test_parse_defaults() {
        let signal = parse("mbFunctionNumber:3, reg:100").unwrap();
        assert_eq!(signal.name, "sig");
        assert_eq!(signal.function, ModbusFunction::ReadHoldingRegisters);
        assert_eq!(signal.register, 100);
        assert_eq!(signal.data_type, DataType::U16);
        assert_eq!(signal.byte_order, ByteOrder::Natural);
        assert_eq!(signal.count, 1);
        assert!(!signal.invert);
        assert_eq!(signal.signal_type, SignalType::Analog);
        assert_eq!(signal.scaling, Scaling::identity());
    }

    #[test]
    fn test_parse_all_keys() {
        let signal =
            parse(" mbFunctionNumber : 16 ,reg:40001 , type: double, byteOrder:7-6-5-4-3-2-1-0, count:4")
                .unwrap();
        assert_eq!(signal.function, ModbusFunction::WriteMultipleRegisters);
        assert_eq!(signal.register, 40001);
        assert_eq!(signal.data_type, DataType::Double);
        assert_eq!(signal.byte_order, ByteOrder::WordByteSwap);
        assert_eq!(signal.count, 4);
        assert_eq!(signal.width(), 4);
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let signal = parse("mbFunctionNumber:4, reg:7, comment:spare").unwrap();
        assert_eq!(signal.register, 7);
    }

    #[test]
    fn test_parse_malformed_pair() {
        assert!(matches!(
            parse("mbFunctionNumber:3, reg"),
            Err(MapError::MalformedConfig { .. })
        ));
        assert!(matches!(
            parse("mbFunctionNumber:3, reg:1:2"),
            Err(MapError::MalformedConfig { .. })
        ));
    }

    #[test]
    fn test_parse_missing_required() {
        assert!(parse("reg:10").is_err());
        assert!(parse("mbFunctionNumber:3").is_err());
        assert!(parse("").is_err());
        assert!(parse("   ").is_err());
    }

    #[test]
    fn test_parse_invalid_numbers() {
        assert!(parse("mbFunctionNumber:3, reg:70000").is_err());
        assert!(parse("mbFunctionNumber:9, reg:1").is_err());
        assert!(parse("mbFunctionNumber:three, reg:1").is_err());
        assert!(parse("mbFunctionNumber:3, reg:1, count:-1").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_tags() {
        assert!(parse("mbFunctionNumber:3, reg:1, type:qword").is_err());
        assert!(parse("mbFunctionNumber:3, reg:1, type:float, byteOrder:CDAB").is_err());
    }

    #[test]
    fn test_parse_rejects_mismatched_byte_order() {
        assert!(parse("mbFunctionNumber:3, reg:1, type:float, byteOrder:swap").is_err());
        assert!(parse("mbFunctionNumber:3, reg:1, type:word, byteOrder:word-swap").is_err());
        assert!(parse("mbFunctionNumber:3, reg:1, type:word, byteOrder:1-0").is_ok());
    }

    #[test]
    fn test_parse_scale_bands() {
        let config = SignalConfig::new("flow", "mbFunctionNumber:4, reg:3")
            .with_raw_band(0.0, 27648.0)
            .with_eu_band(0.0, 250.0)
            .with_scale("alarmBand", 10.0, 20.0);
        let signal = SignalDescriptor::parse(&config).unwrap();
        assert_eq!(signal.scaling.raw, Some(ScaleBand::new(0.0, 27648.0)));
        assert_eq!(signal.scaling.eu, Some(ScaleBand::new(0.0, 250.0)));
    }

    #[test]
    fn test_parse_degenerate_band() {
        let config = SignalConfig::new("flow", "mbFunctionNumber:4, reg:3").with_raw_band(5.0, 5.0);
        assert!(SignalDescriptor::parse(&config).is_err());
    }

    #[test]
    fn test_discrete_attributes() {
        let config = SignalConfig::new("valve_open", "mbFunctionNumber:1, reg:12").discrete(true);
        let signal = SignalDescriptor::parse(&config).unwrap();
        assert!(signal.is_discrete());
        assert!(signal.invert);
        assert_eq!(signal.width(), 1);
    }

    #[test]
    fn test_coil_width_ignores_data_type() {
        let signal = parse("mbFunctionNumber:1, reg:5, type:double").unwrap();
        assert_eq!(signal.width(), 1);
    }

    #[test]
    fn test_parse_configs_drops_malformed() {
        let configs = vec![
            SignalConfig::new("good", "mbFunctionNumber:3, reg:1"),
            SignalConfig::new("bad", "mbFunctionNumber:3"),
            SignalConfig::new("also_good", "mbFunctionNumber:5, reg:2"),
        ];
        let names: Vec<String> = parse_configs(&configs).into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["good".to_string(), "also_good".to_string()]);
    }

    #[test]
    fn test_ordering_by_register() {
        let mut signals = vec![
            parse("mbFunctionNumber:3, reg:16").unwrap(),
            parse("mbFunctionNumber:3, reg:10").unwrap(),
            parse("mbFunctionNumber:3, reg:12").unwrap(),
        ];
        sort_by_register(&mut signals);
        let registers: Vec<u16> = signals.iter().map(|s| s.register).collect();
        assert_eq!(registers, vec![10, 12, 16]);
    }

    #[test]
    fn test_deserialize_config() {
        let json = r#"{
            "name": "pressure",
            "source": "mbFunctionNumber:3, reg:20, type:float",
            "scales": [{"name": "euValueBand", "min": 0.0, "max": 16.0}],
            "attributes": {"signal_type": "analog", "invert": false}
        }"#;
        let config: SignalConfig = serde_json::from_str(json).unwrap();
        let signal = SignalDescriptor::parse(&config).unwrap();
        assert_eq!(signal.scaling.eu, Some(ScaleBand::new(0.0, 16.0)));

        let json = r#"{"name": "door", "source": "mbFunctionNumber:2, reg:1",
            "attributes": {"signal_type": "discrete", "invert": true}}"#;
        let config: SignalConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.attributes.signal_type, SignalType::Discrete);
        assert!(config.scales.is_empty());
    }

    #[test]
    fn test_signal_type_tags() {
        assert_eq!(SignalType::from("Discrete"), SignalType::Discrete);
        assert_eq!(SignalType::from("analog"), SignalType::Analog);
        assert_eq!(SignalType::from("counter"), SignalType::Analog);
    }
}
