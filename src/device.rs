//! # Master Device
//!
//! Wires the eight maps of one Modbus device onto a single [`Link`]:
//!
//! | Map | Function |
//! |-----|----------|
//! | read | Discrete Inputs (0x02), Coils (0x01), Input Registers (0x04), Holding Registers (0x03) |
//! | write | Single Coil (0x05), Single Register (0x06), Multiple Coils (0x0F), Multiple Registers (0x10) |
//!
//! The host calls [`MasterDevice::poll`] once per cycle and submits writes
//! at any time through [`MasterDevice::submit`]. Both paths share the link
//! lock, so a write never lands in the middle of a poll.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use modbus_signal_map::{DeviceSettings, LiveValues, MasterDevice, SignalConfig};
//! use modbus_signal_map::simulator::SimulatedDevice;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> modbus_signal_map::MapResult<()> {
//! let plc = SimulatedDevice::new();
//! plc.set_holding_registers(100, &[1234]);
//!
//! let values = Arc::new(LiveValues::new());
//! let mut device = MasterDevice::new("plc", DeviceSettings::new(), plc, values.clone());
//! device.init(&[SignalConfig::new("counter", "mbFunctionNumber:3, reg:100")])?;
//!
//! device.poll().await?;
//! assert_eq!(values.get("counter"), Some(1234.0));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{MapError, MapResult};
use crate::function::ModbusFunction;
use crate::link::Link;
use crate::read_map::ReadMap;
use crate::settings::DeviceSettings;
use crate::signal::{parse_configs, SignalConfig};
use crate::sink::ValueSink;
use crate::transport::ModbusTransport;
use crate::write_map::{RequestHandle, WriteMap, WriteOutcome, WriteRequest, WriteSubmitter};

/// Result of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollReport {
    /// Values published across all read maps.
    pub published: usize,
    /// Read maps whose poll was aborted, with the reason.
    pub failures: Vec<(ModbusFunction, MapError)>,
    pub elapsed: Duration,
}

impl PollReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One Modbus slave with its read and write maps.
pub struct MasterDevice<T> {
    name: String,
    settings: DeviceSettings,
    link: Link<T>,
    sink: Arc<dyn ValueSink>,
    read_maps: Vec<ReadMap>,
    write_maps: Vec<Arc<WriteMap<T>>>,
    submitters: HashMap<ModbusFunction, WriteSubmitter>,
    writer_tasks: Vec<JoinHandle<()>>,
    last_poll: Arc<Mutex<Instant>>,
}

impl<T> std::fmt::Debug for MasterDevice<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterDevice")
            .field("name", &self.name)
            .field("link", &self.link)
            .field("read_maps", &self.read_maps.len())
            .field("write_maps", &self.write_maps.len())
            .finish()
    }
}

impl<T: ModbusTransport + 'static> MasterDevice<T> {
    /// Create a device whose link is keyed by `settings.link_id()` in the
    /// process-wide registry.
    pub fn new(
        name: impl Into<String>,
        settings: DeviceSettings,
        transport: T,
        sink: Arc<dyn ValueSink>,
    ) -> Self {
        let link = Link::new(settings.link_id(), transport);
        Self::with_link(name, settings, link, sink)
    }

    pub fn with_link(
        name: impl Into<String>,
        settings: DeviceSettings,
        link: Link<T>,
        sink: Arc<dyn ValueSink>,
    ) -> Self {
        Self {
            name: name.into(),
            settings,
            link,
            sink,
            read_maps: Vec::new(),
            write_maps: Vec::new(),
            submitters: HashMap::new(),
            writer_tasks: Vec::new(),
            last_poll: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn link(&self) -> &Link<T> {
        &self.link
    }

    pub fn read_maps(&self) -> &[ReadMap] {
        &self.read_maps
    }

    pub fn write_maps(&self) -> &[Arc<WriteMap<T>>] {
        &self.write_maps
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.read_maps.is_empty()
    }

    /// Build all eight maps from the host's signal configs.
    ///
    /// Malformed signals are logged and dropped. Returns the number of
    /// signals owned by some map. Running writers are stopped first.
    pub fn init(&mut self, configs: &[SignalConfig]) -> MapResult<usize> {
        self.stop_writers();

        let descriptors = parse_configs(configs);
        let mut mapped = 0;

        let mut read_maps = Vec::with_capacity(ModbusFunction::READS.len());
        for function in ModbusFunction::READS {
            let mut map = ReadMap::new(function, &self.settings)?;
            mapped += map.init_descriptors(&descriptors)?;
            read_maps.push(map);
        }

        let mut write_maps = Vec::with_capacity(ModbusFunction::WRITES.len());
        for function in ModbusFunction::WRITES {
            let mut map = WriteMap::new(function, &self.settings, self.link.clone())?;
            mapped += map.init_descriptors(&descriptors)?;
            write_maps.push(Arc::new(map));
        }

        self.read_maps = read_maps;
        self.write_maps = write_maps;

        info!(
            device = %self.name,
            link = self.link.id(),
            configured = configs.len(),
            mapped,
            "device initialized"
        );
        Ok(mapped)
    }

    /// Run one poll cycle over every read map.
    ///
    /// Fails only when the device is not initialized or the link cannot be
    /// opened; per-map failures are reported in the [`PollReport`].
    pub async fn poll(&mut self) -> MapResult<PollReport> {
        if !self.is_initialized() {
            return Err(MapError::NotInitialized);
        }
        let started = Instant::now();
        self.touch();

        let mut link = self.link.lock().await;
        if let Err(e) = link.ensure_open().await {
            warn!(device = %self.name, link = self.link.id(), error = %e, "link not opening");
            return Err(e);
        }

        let mut report = PollReport::default();
        for map in &mut self.read_maps {
            match map.read(&mut *link, self.sink.as_ref()).await {
                Ok(published) => report.published += published,
                Err(e) => {
                    warn!(device = %self.name, function = %map.function(), error = %e, "poll aborted");
                    report.failures.push((map.function(), e));
                }
            }
        }
        link.finish_transaction().await;

        report.elapsed = started.elapsed();
        debug!(
            device = %self.name,
            published = report.published,
            failures = report.failures.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "poll completed"
        );
        Ok(report)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Start the consumer loop of every write map that owns signals.
    pub fn spawn_writers(&mut self) -> MapResult<()> {
        if !self.is_initialized() {
            return Err(MapError::NotInitialized);
        }
        self.stop_writers();
        for map in self.write_maps.iter().filter(|map| !map.is_empty()) {
            let (submitter, task) = map.spawn()?;
            self.submitters.insert(map.function(), submitter);
            self.writer_tasks.push(task);
        }
        Ok(())
    }

    /// Stop accepting requests. Executions already spawned run to completion.
    pub fn stop_writers(&mut self) {
        self.submitters.clear();
        self.writer_tasks.clear();
    }

    fn owner(&self, signal: &str) -> MapResult<&Arc<WriteMap<T>>> {
        self.write_maps
            .iter()
            .find(|map| map.owns(signal))
            .ok_or_else(|| MapError::UnknownSignal(signal.to_string()))
    }

    /// Route a request to the write map owning its signal.
    pub fn submit(&self, request: WriteRequest) -> MapResult<RequestHandle> {
        let function = self.owner(&request.signal)?.function();
        let submitter = self
            .submitters
            .get(&function)
            .ok_or(MapError::NotInitialized)?;
        submitter.submit(request)
    }

    /// Execute a request on the caller's task, bypassing the write queue.
    pub async fn write(&self, request: WriteRequest) -> MapResult<WriteOutcome> {
        let map = self.owner(&request.signal)?;
        Ok(map.execute(request).await)
    }

    // ========================================================================
    // Idle watchdog
    // ========================================================================

    fn touch(&self) {
        *self.last_poll.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    /// Close the link when no poll ran within the idle timeout.
    ///
    /// Returns true when the link was closed.
    pub async fn close_if_idle(&self) -> bool {
        close_idle_link(&self.link, &self.last_poll, self.settings.idle_timeout()).await
    }

    /// Check for an idle link every poll interval until the device is dropped.
    pub fn spawn_idle_watchdog(&self) -> JoinHandle<()> {
        let link = self.link.clone();
        let last_poll = Arc::downgrade(&self.last_poll);
        let interval = self.settings.poll_interval();
        let timeout = self.settings.idle_timeout();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(last_poll) = last_poll.upgrade() else {
                    break;
                };
                close_idle_link(&link, &last_poll, timeout).await;
            }
        })
    }
}

async fn close_idle_link<T: ModbusTransport>(
    link: &Link<T>,
    last_poll: &Mutex<Instant>,
    timeout: Duration,
) -> bool {
    let idle = last_poll
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .elapsed();
    if idle < timeout {
        return false;
    }

    let mut guard = link.lock().await;
    if !guard.is_open() {
        return false;
    }
    info!(link = link.id(), idle_ms = idle.as_millis() as u64, "closing idle link");
    if let Err(e) = guard.close().await {
        warn!(link = link.id(), error = %e, "failed to close idle link");
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkRegistry;
    use crate::simulator::{Fault, SimulatedDevice, TransportCall};
    use crate::sink::LiveValues;
    use crate::write_map::WriteState;

    fn configs() -> Vec<SignalConfig> {
        vec![
            SignalConfig::new("run_cmd", "mbFunctionNumber:1, reg:0"),
            SignalConfig::new("door", "mbFunctionNumber:2, reg:0").discrete(true),
            SignalConfig::new("flow", "mbFunctionNumber:4, reg:0")
                .with_raw_band(0.0, 1000.0)
                .with_eu_band(0.0, 50.0),
            SignalConfig::new("level", "mbFunctionNumber:3, reg:10, type:float"),
            SignalConfig::new("level_sp", "mbFunctionNumber:16, reg:20, type:float")
                .with_eu_band(0.0, 10.0),
            SignalConfig::new("run", "mbFunctionNumber:5, reg:0"),
            SignalConfig::new("broken", "mbFunctionNumber:3, reg:x"),
        ]
    }

    fn device_with(
        plc: &SimulatedDevice,
        settings: DeviceSettings,
    ) -> (MasterDevice<SimulatedDevice>, Arc<LiveValues>) {
        let values = Arc::new(LiveValues::new());
        let link = Link::with_registry(settings.link_id(), plc.clone(), &LinkRegistry::new());
        let mut device = MasterDevice::with_link("plc", settings, link, values.clone());
        device.init(&configs()).unwrap();
        (device, values)
    }

    #[tokio::test]
    async fn test_poll_before_init() {
        let plc = SimulatedDevice::new();
        let link = Link::with_registry("a", plc, &LinkRegistry::new());
        let mut device = MasterDevice::with_link(
            "plc",
            DeviceSettings::new(),
            link,
            Arc::new(LiveValues::new()),
        );
        assert_eq!(device.poll().await, Err(MapError::NotInitialized));
        assert_eq!(device.spawn_writers(), Err(MapError::NotInitialized));
    }

    #[tokio::test]
    async fn test_init_counts_mapped_signals() {
        let plc = SimulatedDevice::new();
        let (device, _) = device_with(&plc, DeviceSettings::new());
        assert_eq!(device.read_maps().len(), 4);
        assert_eq!(device.write_maps().len(), 4);
        let read: usize = device.read_maps().iter().map(|m| m.signals().len()).sum();
        let write: usize = device.write_maps().iter().map(|m| m.len()).sum();
        assert_eq!(read, 4);
        assert_eq!(write, 2);
    }

    #[tokio::test]
    async fn test_poll_order_and_values() {
        let plc = SimulatedDevice::new();
        plc.set_coil(0, true);
        plc.set_discrete_input(0, true);
        plc.set_input_registers(0, &[500]);
        plc.set_holding_registers(10, &[0x41C8, 0x0000]);
        let (mut device, values) = device_with(&plc, DeviceSettings::new());

        let report = device.poll().await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.published, 4);
        assert_eq!(values.get("run_cmd"), Some(1.0));
        assert_eq!(values.get("door"), Some(0.0));
        assert_eq!(values.get("flow"), Some(25.0));
        assert_eq!(values.get("level"), Some(25.0));

        assert_eq!(
            plc.calls(),
            vec![
                TransportCall::ReadDiscreteInputs { address: 0, quantity: 1 },
                TransportCall::ReadCoils { address: 0, quantity: 1 },
                TransportCall::ReadInputRegisters { address: 0, quantity: 1 },
                TransportCall::ReadHoldingRegisters { address: 10, quantity: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_map_does_not_stop_others() {
        let plc = SimulatedDevice::new();
        plc.set_holding_registers(10, &[0x41C8, 0x0000]);
        let (mut device, values) = device_with(&plc, DeviceSettings::new());
        plc.inject_faults([Fault::None, Fault::Error]);

        let report = device.poll().await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, ModbusFunction::ReadCoils);
        assert_eq!(values.get("level"), Some(25.0));
        assert_eq!(values.get("run_cmd"), None);
    }

    #[tokio::test]
    async fn test_poll_link_unavailable() {
        let plc = SimulatedDevice::new();
        plc.fail_opens(1);
        let (mut device, _) = device_with(&plc, DeviceSettings::new());

        let err = device.poll().await.unwrap_err();
        assert!(matches!(err, MapError::TransportUnavailable { .. }));
        assert!(plc.calls().is_empty());
        assert!(device.poll().await.is_ok());
    }

    #[tokio::test]
    async fn test_serial_open_failure_releases_port() {
        let plc = SimulatedDevice::new().serial();
        plc.fail_opens(1);
        let settings = DeviceSettings::new().with_serial_port(crate::Protocol::Rtu, "COM8");
        let (mut device, _) = device_with(&plc, settings);

        assert!(device.poll().await.is_err());
        assert_eq!(plc.close_requests(), 1);
        assert_eq!(plc.open_count(), 0);

        device.poll().await.unwrap();
        assert_eq!(plc.open_count(), 1);
        assert_eq!(plc.close_count(), 1);
    }

    #[tokio::test]
    async fn test_serial_link_closed_after_poll() {
        let plc = SimulatedDevice::new().serial();
        let settings = DeviceSettings::new().with_serial_port(crate::Protocol::Rtu, "COM9");
        let (mut device, _) = device_with(&plc, settings);

        device.poll().await.unwrap();
        device.poll().await.unwrap();
        assert_eq!(plc.open_count(), 2);
        assert_eq!(plc.close_count(), 2);
    }

    #[tokio::test]
    async fn test_submit_routes_to_owner() {
        let plc = SimulatedDevice::new();
        let settings = DeviceSettings::new().with_write_backoff(Duration::from_millis(1));
        let (mut device, _) = device_with(&plc, settings);

        assert!(matches!(
            device.submit(WriteRequest::new("level_sp", 1.0)),
            Err(MapError::NotInitialized)
        ));
        device.spawn_writers().unwrap();

        let sp = device.submit(WriteRequest::new("level_sp", 2.5)).unwrap();
        let run = device.submit(WriteRequest::new("run", 1.0)).unwrap();
        assert_eq!(sp.finished().await, WriteState::Succeeded);
        assert_eq!(run.finished().await, WriteState::Succeeded);
        assert!(plc.coil(0));
        assert_eq!(plc.holding_register(20), 0x4020);

        assert_eq!(
            device.submit(WriteRequest::new("level", 1.0)).unwrap_err(),
            MapError::UnknownSignal("level".into())
        );
    }

    #[tokio::test]
    async fn test_direct_write() {
        let plc = SimulatedDevice::new();
        let (device, _) = device_with(&plc, DeviceSettings::new());
        let outcome = device.write(WriteRequest::new("level_sp", 20.0)).await.unwrap();
        assert!(matches!(outcome, WriteOutcome::Rejected(MapError::RangeRejected { .. })));
        assert!(plc.write_calls().is_empty());
    }

    #[tokio::test]
    async fn test_close_if_idle() {
        let plc = SimulatedDevice::new();
        let settings = DeviceSettings::new().with_idle_timeout(Duration::ZERO);
        let (mut device, _) = device_with(&plc, settings);

        assert!(!device.close_if_idle().await);
        device.poll().await.unwrap();
        assert!(device.close_if_idle().await);
        assert_eq!(plc.close_count(), 1);

        let plc = SimulatedDevice::new();
        let settings = DeviceSettings::new().with_idle_timeout(Duration::from_secs(60));
        let (mut device, _) = device_with(&plc, settings);
        device.poll().await.unwrap();
        assert!(!device.close_if_idle().await);
    }
}
