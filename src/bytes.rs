//! # Byte Order Handling
//!
//! Maps the words read from a device onto a canonical big-endian byte
//! sequence before the bytes are reinterpreted as an integer or float.
//!
//! ## Permutations
//!
//! For a 32-bit value read as `[w1, w2]`, with `hi()`/`lo()` the high and
//! low byte of a word:
//!
//! | Order | Canonical bytes `B0..B3` | Legacy tag |
//! |-------|--------------------------|------------|
//! | `Natural` | `hi(w1) lo(w1) hi(w2) lo(w2)` | `0-1-2-3` |
//! | `WordSwap` | `hi(w2) lo(w2) hi(w1) lo(w1)` | `2-3-0-1` |
//! | `ByteSwap` | `lo(w1) hi(w1) lo(w2) hi(w2)` | `1-0-3-2` |
//! | `WordByteSwap` | `lo(w2) hi(w2) lo(w1) hi(w1)` | `3-2-1-0` |
//!
//! 64-bit values apply the same families at word granularity: `WordSwap`
//! reverses all four words. 16-bit values only know `Natural` and `Swap`.

use std::fmt;

/// Named permutation from wire words to canonical big-endian bytes.
///
/// # Example
///
/// ```rust
/// use modbus_signal_map::ByteOrder;
///
/// let order = ByteOrder::from_tag("2-3-0-1").unwrap();
/// assert_eq!(order, ByteOrder::WordSwap);
/// assert!(order.has_word_swap());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Words and bytes in wire order (big-endian).
    #[default]
    Natural,

    /// High/low byte exchanged inside a single 16-bit word.
    Swap,

    /// Word order reversed, bytes inside each word kept.
    WordSwap,

    /// Bytes swapped inside each word, word order kept.
    ByteSwap,

    /// Word order reversed and bytes swapped inside each word.
    WordByteSwap,
}

impl ByteOrder {
    /// Parse a configuration tag.
    ///
    /// Accepts the descriptive names (`natural`, `swap`, `word-swap`,
    /// `byte-swap`, `word-byte-swap`, case-insensitive, `_` or `-`) and the
    /// positional notation of legacy driver configs (`1-0`, `2-3-0-1`,
    /// `6-7-4-5-2-3-0-1`, ...). The empty string is `Natural`.
    ///
    /// Unknown tags return `None`; callers treat that as a config error.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let normalized = tag.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "" | "natural" | "0-1" | "0-1-2-3" | "0-1-2-3-4-5-6-7" => Some(Self::Natural),
            "swap" | "1-0" => Some(Self::Swap),
            "word-swap" | "2-3-0-1" | "6-7-4-5-2-3-0-1" => Some(Self::WordSwap),
            "byte-swap" | "1-0-3-2" | "1-0-3-2-5-4-7-6" => Some(Self::ByteSwap),
            "word-byte-swap" | "3-2-1-0" | "7-6-5-4-3-2-1-0" => Some(Self::WordByteSwap),
            _ => None,
        }
    }

    /// Canonical tag, as accepted by [`ByteOrder::from_tag`].
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Natural => "natural",
            Self::Swap => "swap",
            Self::WordSwap => "word-swap",
            Self::ByteSwap => "byte-swap",
            Self::WordByteSwap => "word-byte-swap",
        }
    }

    /// Check if this permutation applies to a value `registers` words wide.
    pub fn supports_width(&self, registers: u16) -> bool {
        match self {
            Self::Natural => true,
            Self::Swap => registers == 1,
            Self::WordSwap | Self::ByteSwap | Self::WordByteSwap => registers > 1,
        }
    }

    /// Check if words are reversed (for 32/64-bit values).
    #[inline]
    pub fn has_word_swap(&self) -> bool {
        matches!(self, Self::WordSwap | Self::WordByteSwap)
    }

    /// Check if bytes are exchanged inside each word.
    #[inline]
    pub fn has_byte_swap(&self) -> bool {
        matches!(self, Self::Swap | Self::ByteSwap | Self::WordByteSwap)
    }
}

impl fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Register to Bytes Conversions
// ============================================================================

#[inline]
fn word_bytes(word: u16, order: ByteOrder) -> [u8; 2] {
    if order.has_byte_swap() {
        word.to_le_bytes()
    } else {
        word.to_be_bytes()
    }
}

/// Apply a 16-bit permutation to a single register.
#[inline]
pub fn reg_to_u16(reg: u16, order: ByteOrder) -> u16 {
    u16::from_be_bytes(word_bytes(reg, order))
}

/// Convert 2 registers to 4 canonical big-endian bytes.
///
/// # Example
///
/// ```rust
/// use modbus_signal_map::ByteOrder;
/// use modbus_signal_map::bytes::regs_to_bytes_4;
///
/// let regs = [0x1234, 0x5678];
/// assert_eq!(regs_to_bytes_4(&regs, ByteOrder::Natural), [0x12, 0x34, 0x56, 0x78]);
/// assert_eq!(regs_to_bytes_4(&regs, ByteOrder::WordSwap), [0x56, 0x78, 0x12, 0x34]);
/// ```
#[inline]
pub fn regs_to_bytes_4(regs: &[u16; 2], order: ByteOrder) -> [u8; 4] {
    let (first, second) = if order.has_word_swap() {
        (regs[1], regs[0])
    } else {
        (regs[0], regs[1])
    };
    let [b0, b1] = word_bytes(first, order);
    let [b2, b3] = word_bytes(second, order);
    [b0, b1, b2, b3]
}

/// Convert 4 registers to 8 canonical big-endian bytes.
#[inline]
pub fn regs_to_bytes_8(regs: &[u16; 4], order: ByteOrder) -> [u8; 8] {
    let mut words = *regs;
    if order.has_word_swap() {
        words.reverse();
    }

    let mut bytes = [0u8; 8];
    for (i, word) in words.iter().enumerate() {
        let [hi, lo] = word_bytes(*word, order);
        bytes[i * 2] = hi;
        bytes[i * 2 + 1] = lo;
    }
    bytes
}

// ============================================================================
// Bytes to Register Conversions (for encoding)
// ============================================================================

#[inline]
fn bytes_to_word(pair: [u8; 2], order: ByteOrder) -> u16 {
    if order.has_byte_swap() {
        u16::from_le_bytes(pair)
    } else {
        u16::from_be_bytes(pair)
    }
}

/// Inverse of [`reg_to_u16`].
#[inline]
pub fn u16_to_reg(value: u16, order: ByteOrder) -> u16 {
    bytes_to_word(value.to_be_bytes(), order)
}

/// Convert 4 canonical big-endian bytes to the 2 registers `order` expects.
#[inline]
pub fn bytes_4_to_regs(bytes: &[u8; 4], order: ByteOrder) -> [u16; 2] {
    let first = bytes_to_word([bytes[0], bytes[1]], order);
    let second = bytes_to_word([bytes[2], bytes[3]], order);
    if order.has_word_swap() {
        [second, first]
    } else {
        [first, second]
    }
}

/// Convert 8 canonical big-endian bytes to the 4 registers `order` expects.
#[inline]
pub fn bytes_8_to_regs(bytes: &[u8; 8], order: ByteOrder) -> [u16; 4] {
    let mut words = [0u16; 4];
    for (i, word) in words.iter_mut().enumerate() {
        *word = bytes_to_word([bytes[i * 2], bytes[i * 2 + 1]], order);
    }
    if order.has_word_swap() {
        words.reverse();
    }
    words
}

// ============================================================================
// Register to Numeric Type Conversions
// ============================================================================

/// Convert 2 registers to u32.
#[inline]
pub fn regs_to_u32(regs: &[u16; 2], order: ByteOrder) -> u32 {
    u32::from_be_bytes(regs_to_bytes_4(regs, order))
}

/// Convert 2 registers to f32.
#[inline]
pub fn regs_to_f32(regs: &[u16; 2], order: ByteOrder) -> f32 {
    f32::from_be_bytes(regs_to_bytes_4(regs, order))
}

/// Convert 4 registers to f64.
#[inline]
pub fn regs_to_f64(regs: &[u16; 4], order: ByteOrder) -> f64 {
    f64::from_be_bytes(regs_to_bytes_8(regs, order))
}

/// Convert u32 to 2 registers.
#[inline]
pub fn u32_to_regs(value: u32, order: ByteOrder) -> [u16; 2] {
    bytes_4_to_regs(&value.to_be_bytes(), order)
}

/// Convert f32 to 2 registers.
#[inline]
pub fn f32_to_regs(value: f32, order: ByteOrder) -> [u16; 2] {
    bytes_4_to_regs(&value.to_be_bytes(), order)
}

/// Convert f64 to 4 registers.
#[inline]
pub fn f64_to_regs(value: f64, order: ByteOrder) -> [u16; 4] {
    bytes_8_to_regs(&value.to_be_bytes(), order)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MULTI_WORD_ORDERS: [ByteOrder; 4] = [
        ByteOrder::Natural,
        ByteOrder::WordSwap,
        ByteOrder::ByteSwap,
        ByteOrder::WordByteSwap,
    ];

    #[test]
    fn test_from_tag_valid() {
        assert_eq!(ByteOrder::from_tag(""), Some(ByteOrder::Natural));
        assert_eq!(ByteOrder::from_tag("natural"), Some(ByteOrder::Natural));
        assert_eq!(ByteOrder::from_tag("0-1-2-3"), Some(ByteOrder::Natural));
        assert_eq!(ByteOrder::from_tag("SWAP"), Some(ByteOrder::Swap));
        assert_eq!(ByteOrder::from_tag("1-0"), Some(ByteOrder::Swap));
        assert_eq!(ByteOrder::from_tag("word_swap"), Some(ByteOrder::WordSwap));
        assert_eq!(ByteOrder::from_tag("2-3-0-1"), Some(ByteOrder::WordSwap));
        assert_eq!(ByteOrder::from_tag("byte-swap"), Some(ByteOrder::ByteSwap));
        assert_eq!(
            ByteOrder::from_tag("1-0-3-2-5-4-7-6"),
            Some(ByteOrder::ByteSwap)
        );
        assert_eq!(
            ByteOrder::from_tag(" word-byte-swap "),
            Some(ByteOrder::WordByteSwap)
        );
        assert_eq!(
            ByteOrder::from_tag("7-6-5-4-3-2-1-0"),
            Some(ByteOrder::WordByteSwap)
        );
    }

    #[test]
    fn test_from_tag_invalid() {
        assert_eq!(ByteOrder::from_tag("CDAB"), None);
        assert_eq!(ByteOrder::from_tag("0-2-1-3"), None);
        assert_eq!(ByteOrder::from_tag("little"), None);
    }

    #[test]
    fn test_supports_width() {
        assert!(ByteOrder::Natural.supports_width(1));
        assert!(ByteOrder::Natural.supports_width(4));
        assert!(ByteOrder::Swap.supports_width(1));
        assert!(!ByteOrder::Swap.supports_width(2));
        assert!(!ByteOrder::WordSwap.supports_width(1));
        assert!(ByteOrder::WordByteSwap.supports_width(4));
    }

    #[test]
    fn test_default() {
        assert_eq!(ByteOrder::default(), ByteOrder::Natural);
    }

    #[test]
    fn test_reg_to_u16() {
        assert_eq!(reg_to_u16(0x1234, ByteOrder::Natural), 0x1234);
        assert_eq!(reg_to_u16(0x1234, ByteOrder::Swap), 0x3412);
        assert_eq!(u16_to_reg(0x3412, ByteOrder::Swap), 0x1234);
    }

    #[test]
    fn test_regs_to_bytes_4_all_orders() {
        let regs = [0x1234, 0x5678];

        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::Natural),
            [0x12, 0x34, 0x56, 0x78]
        );
        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::WordSwap),
            [0x56, 0x78, 0x12, 0x34]
        );
        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::ByteSwap),
            [0x34, 0x12, 0x78, 0x56]
        );
        assert_eq!(
            regs_to_bytes_4(&regs, ByteOrder::WordByteSwap),
            [0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_regs_to_bytes_8_all_orders() {
        let regs = [0x1234, 0x5678, 0x9ABC, 0xDEF0];

        assert_eq!(
            regs_to_bytes_8(&regs, ByteOrder::Natural),
            [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]
        );
        assert_eq!(
            regs_to_bytes_8(&regs, ByteOrder::WordSwap),
            [0xDE, 0xF0, 0x9A, 0xBC, 0x56, 0x78, 0x12, 0x34]
        );
        assert_eq!(
            regs_to_bytes_8(&regs, ByteOrder::ByteSwap),
            [0x34, 0x12, 0x78, 0x56, 0xBC, 0x9A, 0xF0, 0xDE]
        );
        assert_eq!(
            regs_to_bytes_8(&regs, ByteOrder::WordByteSwap),
            [0xF0, 0xDE, 0xBC, 0x9A, 0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn test_regs_to_f32() {
        // 25.0 in IEEE 754: 0x41C80000
        assert!((regs_to_f32(&[0x41C8, 0x0000], ByteOrder::Natural) - 25.0).abs() < f32::EPSILON);
        assert!((regs_to_f32(&[0x0000, 0x41C8], ByteOrder::WordSwap) - 25.0).abs() < f32::EPSILON);
        assert!((regs_to_f32(&[0xC841, 0x0000], ByteOrder::ByteSwap) - 25.0).abs() < f32::EPSILON);
        assert!(
            (regs_to_f32(&[0x0000, 0xC841], ByteOrder::WordByteSwap) - 25.0).abs() < f32::EPSILON
        );
    }

    #[test]
    fn test_regs_to_u32() {
        let regs = [0x1234, 0x5678];
        assert_eq!(regs_to_u32(&regs, ByteOrder::Natural), 0x12345678);
        assert_eq!(regs_to_u32(&regs, ByteOrder::WordByteSwap), 0x78563412);
    }

    #[test]
    fn test_f32_roundtrip_special_values() {
        for value in [0.0f32, -0.0, -273.15, 1.0e-6, f32::MAX] {
            for order in MULTI_WORD_ORDERS {
                let regs = f32_to_regs(value, order);
                assert_eq!(
                    regs_to_f32(&regs, order).to_bits(),
                    value.to_bits(),
                    "Roundtrip failed for {} / {:?}",
                    value,
                    order
                );
            }
        }
    }

    proptest! {
        #[test]
        fn prop_u32_roundtrip(value: u32) {
            for order in MULTI_WORD_ORDERS {
                prop_assert_eq!(regs_to_u32(&u32_to_regs(value, order), order), value);
            }
        }

        #[test]
        fn prop_f32_roundtrip(value in proptest::num::f32::NORMAL | proptest::num::f32::ZERO) {
            for order in MULTI_WORD_ORDERS {
                let decoded = regs_to_f32(&f32_to_regs(value, order), order);
                prop_assert_eq!(decoded.to_bits(), value.to_bits());
            }
        }

        #[test]
        fn prop_f64_roundtrip(value in proptest::num::f64::NORMAL) {
            for order in MULTI_WORD_ORDERS {
                let decoded = regs_to_f64(&f64_to_regs(value, order), order);
                prop_assert_eq!(decoded.to_bits(), value.to_bits());
            }
        }
    }
}
