//! Transport collaborator interface
//!
//! The maps never build PDUs or touch sockets. Everything below the
//! function-code level (framing, CRC, TCP/RTU/ASCII I/O, timeouts) lives
//! behind [`ModbusTransport`], which hosts implement for their link type.
//!
//! # Protocol Limits
//!
//! | Operation | Limit |
//! |-----------|-------|
//! | Read Coils (0x01) | 2000 coils |
//! | Read Discrete Inputs (0x02) | 2000 bits |
//! | Read Holding Registers (0x03) | 125 registers |
//! | Read Input Registers (0x04) | 125 registers |
//! | Write Multiple Coils (0x0F) | 1968 coils |
//! | Write Multiple Registers (0x10) | 123 registers |
//!
//! Chunk sizes above these limits are passed through unchanged; the
//! transport is expected to reject them.

use std::future::Future;

use crate::error::{MapError, MapResult};
use crate::function::ModbusFunction;

/// Modbus slave/unit identifier.
pub type SlaveId = u8;

/// Asynchronous Modbus link.
///
/// Addresses are absolute (the register shift has already been applied).
/// Bit reads return one `bool` per requested point.
pub trait ModbusTransport: Send {
    /// Open the link. Opening an already open link is a no-op.
    fn open(&mut self) -> impl Future<Output = MapResult<()>> + Send;

    /// Close the link.
    fn close(&mut self) -> impl Future<Output = MapResult<()>> + Send;

    fn is_open(&self) -> bool;

    /// True for links that must be released after every transaction
    /// (serial RTU/ASCII ports shared with other masters).
    fn close_after_transaction(&self) -> bool {
        false
    }

    /// Read coils (function code 0x01).
    fn read_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = MapResult<Vec<bool>>> + Send;

    /// Read discrete inputs (function code 0x02).
    fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = MapResult<Vec<bool>>> + Send;

    /// Read holding registers (function code 0x03).
    fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = MapResult<Vec<u16>>> + Send;

    /// Read input registers (function code 0x04).
    fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = MapResult<Vec<u16>>> + Send;

    /// Write single coil (function code 0x05).
    fn write_single_coil(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: bool,
    ) -> impl Future<Output = MapResult<()>> + Send;

    /// Write single register (function code 0x06).
    fn write_single_register(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        value: u16,
    ) -> impl Future<Output = MapResult<()>> + Send;

    /// Write multiple coils (function code 0x0F).
    fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> impl Future<Output = MapResult<()>> + Send;

    /// Write multiple registers (function code 0x10).
    fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> impl Future<Output = MapResult<()>> + Send;

    // ========================================================================
    // Function-code dispatch
    // ========================================================================

    /// Read `quantity` points with any read function, as register words.
    ///
    /// Bits are widened to `0`/`1`.
    fn read_points(
        &mut self,
        function: ModbusFunction,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> impl Future<Output = MapResult<Vec<u16>>> + Send
    where
        Self: Sized,
    {
        async move {
            match function {
                ModbusFunction::ReadCoils => {
                    let bits = self.read_coils(slave_id, address, quantity).await?;
                    Ok(bits_to_words(&bits))
                }
                ModbusFunction::ReadDiscreteInputs => {
                    let bits = self.read_discrete_inputs(slave_id, address, quantity).await?;
                    Ok(bits_to_words(&bits))
                }
                ModbusFunction::ReadHoldingRegisters => {
                    self.read_holding_registers(slave_id, address, quantity).await
                }
                ModbusFunction::ReadInputRegisters => {
                    self.read_input_registers(slave_id, address, quantity).await
                }
                other => Err(MapError::invalid_data(format!(
                    "{} is not a read function",
                    other
                ))),
            }
        }
    }

    /// Issue one write transaction with any write function.
    fn write_payload(
        &mut self,
        function: ModbusFunction,
        slave_id: SlaveId,
        address: u16,
        payload: &WritePayload,
    ) -> impl Future<Output = MapResult<()>> + Send
    where
        Self: Sized,
    {
        async move {
            match (function, payload) {
                (ModbusFunction::WriteSingleCoil, WritePayload::Coil(value)) => {
                    self.write_single_coil(slave_id, address, *value).await
                }
                (ModbusFunction::WriteMultipleCoils, WritePayload::Coil(value)) => {
                    self.write_multiple_coils(slave_id, address, &[*value]).await
                }
                (ModbusFunction::WriteSingleRegister, WritePayload::Registers(words))
                    if words.len() == 1 =>
                {
                    self.write_single_register(slave_id, address, words[0]).await
                }
                (ModbusFunction::WriteMultipleRegisters, WritePayload::Registers(words)) => {
                    self.write_multiple_registers(slave_id, address, words).await
                }
                (function, payload) => Err(MapError::invalid_data(format!(
                    "{} cannot carry {:?}",
                    function, payload
                ))),
            }
        }
    }
}

/// Encoded value of a write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePayload {
    Coil(bool),
    Registers(Vec<u16>),
}

#[inline]
fn bits_to_words(bits: &[bool]) -> Vec<u16> {
    bits.iter().map(|&bit| u16::from(bit)).collect()
}
