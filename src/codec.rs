//! # Register Codec
//!
//! Conversion between raw register words and typed raw values, applying
//! the signal's byte-order permutation. Encoding is the exact inverse of
//! decoding.

use crate::bytes::{
    f32_to_regs, f64_to_regs, reg_to_u16, regs_to_f32, regs_to_f64, regs_to_u32, u16_to_reg,
    u32_to_regs, ByteOrder,
};
use crate::error::{MapError, MapResult};
use crate::value::{DataType, RawValue};

// ============================================================================
// Decoding Functions
// ============================================================================

/// Decode register words into a raw value.
///
/// `registers` must hold at least `data_type.register_count()` words;
/// extra words are ignored.
///
/// # Example
///
/// ```rust
/// use modbus_signal_map::{ByteOrder, DataType, RawValue};
/// use modbus_signal_map::codec::decode_registers;
///
/// let value = decode_registers(&[0x5678, 0x1234], DataType::Dword, ByteOrder::WordSwap).unwrap();
/// assert_eq!(value, RawValue::U32(0x12345678));
/// ```
pub fn decode_registers(
    registers: &[u16],
    data_type: DataType,
    byte_order: ByteOrder,
) -> MapResult<RawValue> {
    let needed = data_type.register_count() as usize;
    if registers.len() < needed {
        return Err(MapError::invalid_data(format!(
            "Not enough registers for {}: need {}, got {}",
            data_type,
            needed,
            registers.len()
        )));
    }

    let value = match data_type {
        DataType::U16 | DataType::Word => RawValue::U16(reg_to_u16(registers[0], byte_order)),
        DataType::S16 => RawValue::I16(reg_to_u16(registers[0], byte_order) as i16),
        DataType::Dword => {
            RawValue::U32(regs_to_u32(&[registers[0], registers[1]], byte_order))
        }
        DataType::Float => {
            RawValue::F32(regs_to_f32(&[registers[0], registers[1]], byte_order))
        }
        DataType::Double => {
            let regs = [registers[0], registers[1], registers[2], registers[3]];
            RawValue::F64(regs_to_f64(&regs, byte_order))
        }
    };
    Ok(value)
}

// ============================================================================
// Encoding Functions
// ============================================================================

/// Clamp a raw value to the range representable by `data_type`.
///
/// Prevents wrap-around when writing values that exceed the target
/// register's capacity (e.g., writing 70000 to a u16 register).
pub fn clamp_to_data_type(value: f64, data_type: DataType) -> f64 {
    let (min, max) = data_type.raw_range();
    value.clamp(min, max)
}

/// Encode a raw value into the register words `byte_order` expects.
///
/// Integral types are rounded to the nearest whole count and clamped to
/// their range. Non-finite values are rejected for integral types.
///
/// # Example
///
/// ```rust
/// use modbus_signal_map::{ByteOrder, DataType};
/// use modbus_signal_map::codec::encode_raw;
///
/// let registers = encode_raw(1234.6, DataType::U16, ByteOrder::Natural).unwrap();
/// assert_eq!(registers, vec![1235]);
/// ```
pub fn encode_raw(value: f64, data_type: DataType, byte_order: ByteOrder) -> MapResult<Vec<u16>> {
    if data_type.is_integral() && !value.is_finite() {
        return Err(MapError::invalid_data(format!(
            "Cannot encode {} as {}",
            value, data_type
        )));
    }

    let clamped = if data_type.is_integral() {
        clamp_to_data_type(value.round(), data_type)
    } else {
        clamp_to_data_type(value, data_type)
    };

    let registers = match data_type {
        DataType::U16 | DataType::Word => vec![u16_to_reg(clamped as u16, byte_order)],
        DataType::S16 => vec![u16_to_reg((clamped as i16) as u16, byte_order)],
        DataType::Dword => u32_to_regs(clamped as u32, byte_order).to_vec(),
        DataType::Float => f32_to_regs(clamped as f32, byte_order).to_vec(),
        DataType::Double => f64_to_regs(clamped, byte_order).to_vec(),
    };
    Ok(registers)
}

// ============================================================================
// Tests
// ============================================================================
