//! # Read Map
//!
//! Poll orchestrator for one read function. At init the map collects the
//! signals of its function, sorts them by register and plans the chunked
//! reads covering their span. Each poll then:
//!
//! 1. clears the raw value table,
//! 2. reads every chunk in increasing address order,
//! 3. decodes and scales each signal and publishes it to the sink.
//!
//! A failed chunk aborts the poll before anything is published, so the
//! sink keeps the values of the last complete cycle. A signal that fails to
//! decode or is out of band is skipped on its own.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::codec::decode_registers;
use crate::error::{MapError, MapResult};
use crate::function::ModbusFunction;
use crate::planner::{plan_chunks, shift_address, ReadChunk, RegisterSpan};
use crate::scaling::{invert_discrete, round_value};
use crate::settings::DeviceSettings;
use crate::signal::{parse_configs, sort_by_register, SignalConfig, SignalDescriptor};
use crate::sink::ValueSink;
use crate::transport::{ModbusTransport, SlaveId};
use crate::value::RawValue;

/// Absolute address → raw word for the current poll cycle.
pub type RawValueTable = BTreeMap<u16, u16>;

#[derive(Debug, Clone)]
struct ReadPlan {
    signals: Vec<SignalDescriptor>,
    span: Option<RegisterSpan>,
    chunks: Vec<ReadChunk>,
}

#[derive(Debug, Clone)]
enum MapState {
    Uninitialized,
    Ready(ReadPlan),
}

/// Read orchestrator for one of FC01..FC04.
#[derive(Debug, Clone)]
pub struct ReadMap {
    function: ModbusFunction,
    slave_id: SlaveId,
    max_chunk_size: u16,
    register_shift: i16,
    state: MapState,
    raw_values: RawValueTable,
}

impl ReadMap {
    pub fn new(function: ModbusFunction, settings: &DeviceSettings) -> MapResult<Self> {
        if !function.is_read() {
            return Err(MapError::invalid_data(format!(
                "{} cannot back a read map",
                function
            )));
        }
        Ok(Self {
            function,
            slave_id: settings.slave_id,
            max_chunk_size: chunk_limit(function, settings.max_read_registers),
            register_shift: settings.register_shift,
            state: MapState::Uninitialized,
            raw_values: RawValueTable::new(),
        })
    }

    #[inline]
    pub fn function(&self) -> ModbusFunction {
        self.function
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        matches!(self.state, MapState::Ready(_))
    }

    /// Signals owned by the map, sorted by register. Empty before init.
    pub fn signals(&self) -> &[SignalDescriptor] {
        match &self.state {
            MapState::Ready(plan) => &plan.signals,
            MapState::Uninitialized => &[],
        }
    }

    pub fn span(&self) -> Option<RegisterSpan> {
        match &self.state {
            MapState::Ready(plan) => plan.span,
            MapState::Uninitialized => None,
        }
    }

    pub fn chunks(&self) -> &[ReadChunk] {
        match &self.state {
            MapState::Ready(plan) => &plan.chunks,
            MapState::Uninitialized => &[],
        }
    }

    /// Raw words of the last successful or aborted poll.
    pub fn raw_values(&self) -> &RawValueTable {
        &self.raw_values
    }

    /// Parse `configs` and build the read plan.
    ///
    /// Returns the number of signals owned by the map.
    pub fn init(&mut self, configs: &[SignalConfig]) -> MapResult<usize> {
        self.init_descriptors(&parse_configs(configs))
    }

    /// Build the read plan from already parsed descriptors.
    pub fn init_descriptors(&mut self, descriptors: &[SignalDescriptor]) -> MapResult<usize> {
        let mut signals: Vec<SignalDescriptor> = descriptors
            .iter()
            .filter(|signal| signal.function == self.function)
            .filter(|signal| match self.addressable(signal) {
                Ok(()) => true,
                Err(e) => {
                    warn!(function = %self.function, error = %e, "dropping signal");
                    false
                }
            })
            .cloned()
            .collect();
        sort_by_register(&mut signals);

        let span = RegisterSpan::compute(&signals, self.register_shift)?;
        let chunks = span
            .map(|span| plan_chunks(&span, self.max_chunk_size))
            .unwrap_or_default();

        match &span {
            Some(span) => info!(
                function = %self.function,
                signals = signals.len(),
                start = span.start,
                points = span.number_of_points,
                chunks = chunks.len(),
                "read map initialized"
            ),
            None => debug!(function = %self.function, "read map has no signals"),
        }

        let count = signals.len();
        self.state = MapState::Ready(ReadPlan {
            signals,
            span,
            chunks,
        });
        Ok(count)
    }

    fn addressable(&self, signal: &SignalDescriptor) -> MapResult<()> {
        let address = shift_address(signal, self.register_shift)?;
        if address + u32::from(signal.width()) > u32::from(u16::MAX) + 1 {
            return Err(MapError::malformed(
                signal.name.as_str(),
                format!("{} at {} runs past register 65535", signal.data_type, address),
            ));
        }
        Ok(())
    }

    /// Run one poll cycle and publish the decoded values.
    ///
    /// Returns the number of values published. The caller holds the link.
    pub async fn read<T, S>(&mut self, transport: &mut T, sink: &S) -> MapResult<usize>
    where
        T: ModbusTransport,
        S: ValueSink + ?Sized,
    {
        let MapState::Ready(plan) = &self.state else {
            return Err(MapError::NotInitialized);
        };

        self.raw_values.clear();
        for chunk in &plan.chunks {
            let values = transport
                .read_points(self.function, self.slave_id, chunk.address, chunk.count)
                .await
                .map_err(|e| chunk_failure(chunk, e.to_string()))?;
            if values.len() < usize::from(chunk.count) {
                return Err(chunk_failure(
                    chunk,
                    format!("short response: {} of {} points", values.len(), chunk.count),
                ));
            }

            debug!(
                function = %self.function,
                address = chunk.address,
                count = chunk.count,
                "chunk read"
            );
            for (offset, value) in values.into_iter().take(usize::from(chunk.count)).enumerate() {
                self.raw_values
                    .insert(chunk.address.wrapping_add(offset as u16), value);
            }
        }

        let mut published = 0;
        for signal in &plan.signals {
            if !sink.is_channel_enabled(&signal.name) {
                debug!(signal = %signal.name, "channel switched off");
                continue;
            }
            match decode_signal(signal, self.function, self.register_shift, &self.raw_values) {
                Ok(value) => {
                    debug!(signal = %signal.name, register = signal.register, value, "value read");
                    sink.set_value(&signal.name, value);
                    published += 1;
                }
                Err(e) => {
                    warn!(signal = %signal.name, register = signal.register, error = %e, "value skipped");
                }
            }
        }
        Ok(published)
    }
}

fn chunk_failure(chunk: &ReadChunk, message: String) -> MapError {
    MapError::ChunkReadFailure {
        address: chunk.address,
        count: chunk.count,
        message,
    }
}

/// Configured chunk size, capped at the most points one request may carry.
fn chunk_limit(function: ModbusFunction, configured: u16) -> u16 {
    match function.max_read_quantity() {
        Some(max) if configured > max => {
            debug!(function = %function, configured, max, "chunk size capped");
            max
        }
        _ => configured,
    }
}

/// Decode one signal from the raw table into its published value.
fn decode_signal(
    signal: &SignalDescriptor,
    function: ModbusFunction,
    register_shift: i16,
    table: &RawValueTable,
) -> MapResult<f64> {
    let address = shift_address(signal, register_shift)? as u16;
    let words = (0..signal.width())
        .map(|offset| {
            let at = address.wrapping_add(offset);
            table
                .get(&at)
                .copied()
                .ok_or_else(|| MapError::invalid_data(format!("no data at address {}", at)))
        })
        .collect::<MapResult<Vec<u16>>>()?;

    let raw = if function.is_bit_access() {
        RawValue::Bool(words[0] != 0)
    } else {
        decode_registers(&words, signal.data_type, signal.byte_order)?
    };
    let raw = raw.as_f64();

    let value = if signal.is_discrete() {
        if signal.invert {
            invert_discrete(raw)
        } else {
            raw
        }
    } else {
        signal.scaling.to_eu(raw, signal.data_type)?
    };
    Ok(round_value(value))
}
