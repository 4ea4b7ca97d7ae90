//! # Signal Data Types
//!
//! Closed set of register layouts a signal can be configured with, and the
//! raw values decoded from them.
//!
//! | Type | Registers | Config spellings |
//! |------|-----------|------------------|
//! | U16 | 1 | ushort, u16, uint16 |
//! | S16 | 1 | short, s16, int16 |
//! | Word | 1 | word |
//! | Dword | 2 | dword, u32, uint32 |
//! | Float | 2 | float, f32, float32 |
//! | Double | 4 | double, f64, float64 |

use std::fmt;

/// Register layout of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Unsigned 16-bit integer (1 register)
    #[default]
    U16,
    /// Signed 16-bit integer (1 register)
    S16,
    /// Unsigned 16-bit word, the legacy spelling of `U16` (1 register)
    Word,
    /// Unsigned 32-bit integer (2 registers)
    Dword,
    /// IEEE-754 single precision (2 registers)
    Float,
    /// IEEE-754 double precision (4 registers)
    Double,
}

impl DataType {
    /// Parse a configuration spelling (case-insensitive).
    pub fn from_config(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ushort" | "u16" | "uint16" => Some(Self::U16),
            "short" | "s16" | "int16" | "i16" => Some(Self::S16),
            "word" => Some(Self::Word),
            "dword" | "u32" | "uint32" => Some(Self::Dword),
            "float" | "f32" | "float32" | "real" => Some(Self::Float),
            "double" | "f64" | "float64" | "lreal" => Some(Self::Double),
            _ => None,
        }
    }

    /// Number of consecutive 16-bit registers occupied.
    #[inline]
    pub fn register_count(&self) -> u16 {
        match self {
            Self::U16 | Self::S16 | Self::Word => 1,
            Self::Dword | Self::Float => 2,
            Self::Double => 4,
        }
    }

    /// True when raw values of this type are whole register counts.
    #[inline]
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::U16 | Self::S16 | Self::Word | Self::Dword)
    }

    /// Representable raw range, used to clamp values before encoding.
    pub fn raw_range(&self) -> (f64, f64) {
        match self {
            Self::U16 | Self::Word => (0.0, f64::from(u16::MAX)),
            Self::S16 => (f64::from(i16::MIN), f64::from(i16::MAX)),
            Self::Dword => (0.0, f64::from(u32::MAX)),
            Self::Float => (f64::from(f32::MIN), f64::from(f32::MAX)),
            Self::Double => (f64::MIN, f64::MAX),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::U16 => "ushort",
            Self::S16 => "short",
            Self::Word => "word",
            Self::Dword => "dword",
            Self::Float => "float",
            Self::Double => "double",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw value decoded from registers, before scaling.
///
/// # Example
///
/// ```rust
/// use modbus_signal_map::RawValue;
///
/// let raw = RawValue::F32(25.5);
/// assert!((raw.as_f64() - 25.5).abs() < 0.001);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    /// Coil or discrete input state
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    F32(f32),
    F64(f64),
}

impl RawValue {
    /// Convert the value to f64 for scaling.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            RawValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            RawValue::U16(v) => f64::from(*v),
            RawValue::I16(v) => f64::from(*v),
            RawValue::U32(v) => f64::from(*v),
            RawValue::F32(v) => f64::from(*v),
            RawValue::F64(v) => *v,
        }
    }
}

impl fmt::Display for RawValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Bool(v) => write!(f, "{}", v),
            RawValue::U16(v) => write!(f, "{}", v),
            RawValue::I16(v) => write!(f, "{}", v),
            RawValue::U32(v) => write!(f, "{}", v),
            RawValue::F32(v) => write!(f, "{}", v),
            RawValue::F64(v) => write!(f, "{}", v),
        }
    }
}
