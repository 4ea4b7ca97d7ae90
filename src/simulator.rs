//! # Simulated Device
//!
//! In-memory Modbus slave implementing [`ModbusTransport`]. Used by the demo
//! binary and the test suites; hosts can use it to exercise a signal map
//! without hardware.
//!
//! Clones share the same register image and call log, so a handle kept by a
//! test observes every transaction issued through a `Link`.
//!
//! ## Fault injection
//!
//! - [`inject_faults`](SimulatedDevice::inject_faults) scripts the outcome
//!   of the next transactions (error, short read, success).
//! - [`fail_opens`](SimulatedDevice::fail_opens) makes the next `open`
//!   attempts fail.
//! - [`with_latency`](SimulatedDevice::with_latency) delays every
//!   transaction, which exposes interleaving between concurrent users.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::trace;

use crate::error::{MapError, MapResult};
use crate::transport::{ModbusTransport, SlaveId};

/// Scripted outcome of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Transaction succeeds.
    None,
    /// Transaction fails with a transport error.
    Error,
    /// Read returns one point fewer than requested.
    ShortRead,
}

/// One transaction observed by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    ReadCoils { address: u16, quantity: u16 },
    ReadDiscreteInputs { address: u16, quantity: u16 },
    ReadHoldingRegisters { address: u16, quantity: u16 },
    ReadInputRegisters { address: u16, quantity: u16 },
    WriteSingleCoil { address: u16, value: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { address: u16, values: Vec<bool> },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl TransportCall {
    #[inline]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil { .. }
                | Self::WriteSingleRegister { .. }
                | Self::WriteMultipleCoils { .. }
                | Self::WriteMultipleRegisters { .. }
        )
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    coils: BTreeMap<u16, bool>,
    discrete_inputs: BTreeMap<u16, bool>,
    holding_registers: BTreeMap<u16, u16>,
    input_registers: BTreeMap<u16, u16>,

    open: bool,
    open_count: usize,
    close_count: usize,
    close_requests: usize,
    failing_opens: usize,

    faults: VecDeque<Fault>,
    calls: Vec<TransportCall>,
    in_flight: usize,
    overlap_detected: bool,
}

/// Shared-state simulated slave.
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    state: Arc<Mutex<DeviceState>>,
    slave_id: SlaveId,
    latency: Duration,
    serial: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    /// Create a TCP-like device answering slave id 1.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DeviceState::default())),
            slave_id: 1,
            latency: Duration::ZERO,
            serial: false,
        }
    }

    pub fn with_slave_id(mut self, slave_id: SlaveId) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Behave like a serial port: closed after every transaction.
    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    // ========================================================================
    // Register image
    // ========================================================================

    pub fn set_coil(&self, address: u16, value: bool) {
        self.state().coils.insert(address, value);
    }

    pub fn set_discrete_input(&self, address: u16, value: bool) {
        self.state().discrete_inputs.insert(address, value);
    }

    pub fn set_holding_registers(&self, address: u16, values: &[u16]) {
        let mut state = self.state();
        for (offset, &value) in values.iter().enumerate() {
            state
                .holding_registers
                .insert(address.wrapping_add(offset as u16), value);
        }
    }

    pub fn set_input_registers(&self, address: u16, values: &[u16]) {
        let mut state = self.state();
        for (offset, &value) in values.iter().enumerate() {
            state
                .input_registers
                .insert(address.wrapping_add(offset as u16), value);
        }
    }

    pub fn coil(&self, address: u16) -> bool {
        self.state().coils.get(&address).copied().unwrap_or(false)
    }

    pub fn holding_register(&self, address: u16) -> u16 {
        self.state()
            .holding_registers
            .get(&address)
            .copied()
            .unwrap_or(0)
    }

    // ========================================================================
    // Fault injection and inspection
    // ========================================================================

    /// Script the outcome of the next transactions, in order.
    pub fn inject_faults(&self, faults: impl IntoIterator<Item = Fault>) {
        self.state().faults.extend(faults);
    }

    /// Make the next `count` open attempts fail.
    pub fn fail_opens(&self, count: usize) {
        self.state().failing_opens = count;
    }

    /// Every transaction attempted so far, failed ones included.
    pub fn calls(&self) -> Vec<TransportCall> {
        self.state().calls.clone()
    }

    pub fn write_calls(&self) -> Vec<TransportCall> {
        self.state()
            .calls
            .iter()
            .filter(|call| call.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn open_count(&self) -> usize {
        self.state().open_count
    }

    pub fn close_count(&self) -> usize {
        self.state().close_count
    }

    /// Every `close` call, including ones on a port that never opened.
    pub fn close_requests(&self) -> usize {
        self.state().close_requests
    }

    /// True once two transactions were ever in progress at the same time.
    pub fn overlap_detected(&self) -> bool {
        self.state().overlap_detected
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        // A panicked test thread must not hide the log from the others.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Transaction plumbing
    // ========================================================================

    /// Record the call and resolve its scripted fault.
    async fn begin(&self, slave_id: SlaveId, call: TransportCall) -> MapResult<Fault> {
        {
            let mut state = self.state();
            trace!(?call, "simulated transaction");
            state.calls.push(call);
            if state.in_flight > 0 {
                state.overlap_detected = true;
            }
            state.in_flight += 1;
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state();
        state.in_flight -= 1;
        if !state.open {
            return Err(MapError::transport("link is closed"));
        }
        if slave_id != self.slave_id {
            return Err(MapError::transport(format!(
                "no response from slave {}",
                slave_id
            )));
        }
        match state.faults.pop_front().unwrap_or(Fault::None) {
            Fault::Error => Err(MapError::transport("simulated timeout")),
            fault => Ok(fault),
        }
    }

    fn read_bits(
        bank: &BTreeMap<u16, bool>,
        address: u16,
        quantity: u16,
        fault: Fault,
    ) -> Vec<bool> {
        let quantity = returned_quantity(quantity, fault);
        (0..quantity)
            .map(|offset| {
                bank.get(&address.wrapping_add(offset))
                    .copied()
                    .unwrap_or(false)
            })
            .collect()
    }

    fn read_words(bank: &BTreeMap<u16, u16>, address: u16, quantity: u16, fault: Fault) -> Vec<u16> {
        let quantity = returned_quantity(quantity, fault);
        (0..quantity)
            .map(|offset| bank.get(&address.wrapping_add(offset)).copied().unwrap_or(0))
            .collect()
    }
}

#[inline]
fn returned_quantity(quantity: u16, fault: Fault) -> u16 {
    if fault == Fault::ShortRead {
        quantity.saturating_sub(1)
    } else {
        quantity
    }
}

impl ModbusTransport for SimulatedDevice {
    async fn open(&mut self) -> MapResult<()> {
        let mut state = self.state();
        if state.failing_opens > 0 {
            state.failing_opens -= 1;
            return Err(MapError::unavailable("simulated port busy"));
        }
        if !state.open {
            state.open = true;
            state.open_count += 1;
        }
        Ok(())
    }

    async fn close(&mut self) -> MapResult<()> {
        let mut state = self.state();
        state.close_requests += 1;
        if state.open {
            state.open = false;
            state.close_count += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state().open
    }

    fn close_after_transaction(&self) -> bool {
        self.serial
    }

    async fn read_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> MapResult<Vec<bool>> {
        let fault = self
            .begin(slave_id, TransportCall::ReadCoils { address, quantity })
            .await?;
        Ok(Self::read_bits(&self.state().coils, address, quantity, fault))
    }

    async fn read_discrete_inputs(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> MapResult<Vec<bool>> {
        let fault = self
            .begin(slave_id, TransportCall::ReadDiscreteInputs { address, quantity })
            .await?;
        Ok(Self::read_bits(&self.state().discrete_inputs, address, quantity, fault))
    }

    async fn read_holding_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> MapResult<Vec<u16>> {
        let fault = self
            .begin(slave_id, TransportCall::ReadHoldingRegisters { address, quantity })
            .await?;
        Ok(Self::read_words(&self.state().holding_registers, address, quantity, fault))
    }

    async fn read_input_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        quantity: u16,
    ) -> MapResult<Vec<u16>> {
        let fault = self
            .begin(slave_id, TransportCall::ReadInputRegisters { address, quantity })
            .await?;
        Ok(Self::read_words(&self.state().input_registers, address, quantity, fault))
    }

    async fn write_single_coil(&mut self, slave_id: SlaveId, address: u16, value: bool) -> MapResult<()> {
        self.begin(slave_id, TransportCall::WriteSingleCoil { address, value })
            .await?;
        self.set_coil(address, value);
        Ok(())
    }

    async fn write_single_register(&mut self, slave_id: SlaveId, address: u16, value: u16) -> MapResult<()> {
        self.begin(slave_id, TransportCall::WriteSingleRegister { address, value })
            .await?;
        self.set_holding_registers(address, &[value]);
        Ok(())
    }

    async fn write_multiple_coils(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[bool],
    ) -> MapResult<()> {
        let call = TransportCall::WriteMultipleCoils {
            address,
            values: values.to_vec(),
        };
        self.begin(slave_id, call).await?;
        for (offset, &value) in values.iter().enumerate() {
            self.set_coil(address.wrapping_add(offset as u16), value);
        }
        Ok(())
    }

    async fn write_multiple_registers(
        &mut self,
        slave_id: SlaveId,
        address: u16,
        values: &[u16],
    ) -> MapResult<()> {
        let call = TransportCall::WriteMultipleRegisters {
            address,
            values: values.to_vec(),
        };
        self.begin(slave_id, call).await?;
        self.set_holding_registers(address, values);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_link_rejects_transactions() {
        let mut device = SimulatedDevice::new();
        assert!(device.read_holding_registers(1, 0, 1).await.is_err());
        device.open().await.unwrap();
        assert!(device.read_holding_registers(1, 0, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_clones_share_image() {
        let mut device = SimulatedDevice::new();
        let observer = device.clone();
        device.open().await.unwrap();
        device.write_single_register(1, 40, 0xBEEF).await.unwrap();
        assert_eq!(observer.holding_register(40), 0xBEEF);
        assert_eq!(observer.write_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_faults_in_order() {
        let mut device = SimulatedDevice::new();
        device.set_input_registers(0, &[1, 2, 3]);
        device.open().await.unwrap();
        device.inject_faults([Fault::ShortRead, Fault::Error]);

        assert_eq!(device.read_input_registers(1, 0, 3).await.unwrap(), vec![1, 2]);
        assert!(device.read_input_registers(1, 0, 3).await.is_err());
        assert_eq!(device.read_input_registers(1, 0, 3).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(device.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_wrong_slave_id() {
        let mut device = SimulatedDevice::new().with_slave_id(7);
        device.open().await.unwrap();
        assert!(device.read_coils(1, 0, 1).await.is_err());
        assert!(device.read_coils(7, 0, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_opens() {
        let mut device = SimulatedDevice::new();
        device.fail_opens(2);
        assert!(device.open().await.is_err());
        assert!(device.open().await.is_err());
        assert!(device.open().await.is_ok());
        assert!(device.is_open());
        assert_eq!(device.open_count(), 1);
    }
}
