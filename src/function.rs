//! Modbus function codes handled by the read and write maps.

use std::fmt;

use crate::constants::{
    FC_READ_COILS, FC_READ_DISCRETE_INPUTS, FC_READ_HOLDING_REGISTERS, FC_READ_INPUT_REGISTERS,
    FC_WRITE_MULTIPLE_COILS, FC_WRITE_MULTIPLE_REGISTERS, FC_WRITE_SINGLE_COIL,
    FC_WRITE_SINGLE_REGISTER, MAX_READ_COILS, MAX_READ_REGISTERS,
};

/// The eight Modbus functions a signal can be bound to.
///
/// | Code | Function | Map |
/// |------|----------|-----|
/// | 0x01 | Read Coils | read |
/// | 0x02 | Read Discrete Inputs | read |
/// | 0x03 | Read Holding Registers | read |
/// | 0x04 | Read Input Registers | read |
/// | 0x05 | Write Single Coil | write |
/// | 0x06 | Write Single Register | write |
/// | 0x0F | Write Multiple Coils | write |
/// | 0x10 | Write Multiple Registers | write |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModbusFunction {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
}

impl ModbusFunction {
    /// All read functions, in the order the device polls them.
    pub const READS: [ModbusFunction; 4] = [
        Self::ReadDiscreteInputs,
        Self::ReadCoils,
        Self::ReadInputRegisters,
        Self::ReadHoldingRegisters,
    ];

    /// All write functions.
    pub const WRITES: [ModbusFunction; 4] = [
        Self::WriteSingleCoil,
        Self::WriteSingleRegister,
        Self::WriteMultipleCoils,
        Self::WriteMultipleRegisters,
    ];

    /// Parse a numeric function code.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            FC_READ_COILS => Some(Self::ReadCoils),
            FC_READ_DISCRETE_INPUTS => Some(Self::ReadDiscreteInputs),
            FC_READ_HOLDING_REGISTERS => Some(Self::ReadHoldingRegisters),
            FC_READ_INPUT_REGISTERS => Some(Self::ReadInputRegisters),
            FC_WRITE_SINGLE_COIL => Some(Self::WriteSingleCoil),
            FC_WRITE_SINGLE_REGISTER => Some(Self::WriteSingleRegister),
            FC_WRITE_MULTIPLE_COILS => Some(Self::WriteMultipleCoils),
            FC_WRITE_MULTIPLE_REGISTERS => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    /// Numeric function code.
    pub fn to_u8(self) -> u8 {
        match self {
            Self::ReadCoils => FC_READ_COILS,
            Self::ReadDiscreteInputs => FC_READ_DISCRETE_INPUTS,
            Self::ReadHoldingRegisters => FC_READ_HOLDING_REGISTERS,
            Self::ReadInputRegisters => FC_READ_INPUT_REGISTERS,
            Self::WriteSingleCoil => FC_WRITE_SINGLE_COIL,
            Self::WriteSingleRegister => FC_WRITE_SINGLE_REGISTER,
            Self::WriteMultipleCoils => FC_WRITE_MULTIPLE_COILS,
            Self::WriteMultipleRegisters => FC_WRITE_MULTIPLE_REGISTERS,
        }
    }

    #[inline]
    pub fn is_read(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::ReadHoldingRegisters
                | Self::ReadInputRegisters
        )
    }

    #[inline]
    pub fn is_write(self) -> bool {
        !self.is_read()
    }

    /// True for functions addressing single bits (coils, discrete inputs).
    #[inline]
    pub fn is_bit_access(self) -> bool {
        matches!(
            self,
            Self::ReadCoils
                | Self::ReadDiscreteInputs
                | Self::WriteSingleCoil
                | Self::WriteMultipleCoils
        )
    }

    /// Protocol limit for one read request of this function, `None` for writes.
    pub fn max_read_quantity(self) -> Option<u16> {
        match self {
            Self::ReadCoils | Self::ReadDiscreteInputs => Some(MAX_READ_COILS),
            Self::ReadHoldingRegisters | Self::ReadInputRegisters => Some(MAX_READ_REGISTERS),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadCoils => "ReadCoils",
            Self::ReadDiscreteInputs => "ReadInputs",
            Self::ReadHoldingRegisters => "ReadHoldingRegisters",
            Self::ReadInputRegisters => "ReadInputRegisters",
            Self::WriteSingleCoil => "WriteSingleCoil",
            Self::WriteSingleRegister => "WriteSingleRegister",
            Self::WriteMultipleCoils => "WriteMultipleCoils",
            Self::WriteMultipleRegisters => "WriteMultipleRegisters",
        }
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (FC{:02})", self.name(), self.to_u8())
    }
}
