//! # Write Map
//!
//! Write orchestrator for one write function. Requests arrive through a
//! [`WriteSubmitter`]; the map's consumer loop spawns one task per request,
//! and every task competes for the same [`Link`].
//!
//! ## Request lifecycle
//!
//! ```text
//! Pending -> Encoding -> Writing -> Succeeded
//!                |          |----> Expired
//!                |----------------> Rejected
//! ```
//!
//! Encoding failures (unknown signal, value out of the EU band, codec
//! errors) reject the request before the link is touched. While writing,
//! the task retries until the write succeeds or the request expires:
//!
//! 1. request cancelled → `Expired`
//! 2. lock the link, open it if needed
//! 3. `use_by` passed or request cancelled → `Expired`, no transaction
//! 4. write; success → `Succeeded`
//! 5. failure → release the link, sleep the backoff, retry

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::codec::encode_raw;
use crate::constants::{DEFAULT_WRITE_TTL_MS, MAX_WRITE_REGISTERS};
use crate::error::{MapError, MapResult};
use crate::function::ModbusFunction;
use crate::link::Link;
use crate::planner::shift_address;
use crate::scaling::invert_discrete;
use crate::settings::DeviceSettings;
use crate::signal::{parse_configs, SignalConfig, SignalDescriptor};
use crate::transport::{ModbusTransport, SlaveId, WritePayload};

// ============================================================================
// Requests
// ============================================================================

/// Progress of a write request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteState {
    Pending,
    Encoding,
    Writing,
    Succeeded,
    Expired,
    Rejected,
}

impl WriteState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Expired | Self::Rejected)
    }
}

#[derive(Debug)]
struct RequestShared {
    live: AtomicBool,
    state: watch::Sender<WriteState>,
}

/// Submitter-side view of a request: cancel it or watch its progress.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    shared: Arc<RequestShared>,
}

impl RequestHandle {
    /// Withdraw the request. A write already on the wire still completes.
    pub fn cancel(&self) {
        self.shared.live.store(false, Ordering::SeqCst);
    }

    /// False once the request is cancelled or has been written.
    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WriteState {
        *self.shared.state.borrow()
    }

    /// Wait until the request reaches a terminal state.
    pub async fn finished(&self) -> WriteState {
        let mut state = self.shared.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if state.changed().await.is_err() {
                return *state.borrow();
            }
        }
    }

    fn set_state(&self, state: WriteState) {
        self.shared.state.send_replace(state);
    }
}

/// A host request to write one signal.
///
/// Every request carries a deadline. [`WriteRequest::new`] gives it
/// [`DEFAULT_WRITE_TTL_MS`]; hosts that track their own deadline use
/// [`WriteRequest::from_host`].
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub signal: String,
    /// Target value in engineering units (0/1 for coils).
    pub value: f64,
    pub submitted_at: DateTime<Utc>,
    /// Deadline after which the request is dropped.
    pub use_by: DateTime<Utc>,
    handle: RequestHandle,
}

impl WriteRequest {
    pub fn new(signal: impl Into<String>, value: f64) -> Self {
        let submitted_at = Utc::now();
        let use_by = submitted_at + chrono::Duration::milliseconds(DEFAULT_WRITE_TTL_MS);
        Self::build(signal.into(), value, submitted_at, use_by, true)
    }

    /// Build a request from the fields of a host live value.
    ///
    /// A raised `out_of_date_alarm` or a cleared `channel_link` yields a
    /// request that expires without touching the link.
    pub fn from_host(
        signal: impl Into<String>,
        value: f64,
        out_of_date_alarm: bool,
        use_by: DateTime<Utc>,
        channel_link: bool,
    ) -> Self {
        let live = channel_link && !out_of_date_alarm;
        Self::build(signal.into(), value, Utc::now(), use_by, live)
    }

    fn build(
        signal: String,
        value: f64,
        submitted_at: DateTime<Utc>,
        use_by: DateTime<Utc>,
        live: bool,
    ) -> Self {
        let (state, _) = watch::channel(WriteState::Pending);
        Self {
            signal,
            value,
            submitted_at,
            use_by,
            handle: RequestHandle {
                shared: Arc::new(RequestShared {
                    live: AtomicBool::new(live),
                    state,
                }),
            },
        }
    }

    pub fn with_use_by(mut self, use_by: DateTime<Utc>) -> Self {
        self.use_by = use_by;
        self
    }

    /// Expire the request `ttl` after submission.
    pub fn expires_after(mut self, ttl: chrono::Duration) -> Self {
        self.use_by = self.submitted_at + ttl;
        self
    }

    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.handle.is_live()
    }

    /// True when the request was cancelled or its deadline has passed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_live() || self.use_by <= now
    }

    fn mark_done(&self) {
        self.handle.shared.live.store(false, Ordering::SeqCst);
    }
}

/// Final result of executing a request.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Succeeded { attempts: u32 },
    Expired,
    Rejected(MapError),
}

impl WriteOutcome {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Number of attempts on success; `WriteExpired` or the rejection otherwise.
    pub fn into_result(self, signal: &str) -> MapResult<u32> {
        match self {
            Self::Succeeded { attempts } => Ok(attempts),
            Self::Expired => Err(MapError::WriteExpired {
                signal: signal.to_string(),
            }),
            Self::Rejected(e) => Err(e),
        }
    }
}

// ============================================================================
// Submitter
// ============================================================================

/// Sending half of a write map's request channel.
#[derive(Debug, Clone)]
pub struct WriteSubmitter {
    function: ModbusFunction,
    requests: mpsc::UnboundedSender<WriteRequest>,
}

impl WriteSubmitter {
    pub fn function(&self) -> ModbusFunction {
        self.function
    }

    /// Queue a request; returns a handle to cancel or await it.
    pub fn submit(&self, request: WriteRequest) -> MapResult<RequestHandle> {
        let handle = request.handle();
        self.requests
            .send(request)
            .map_err(|_| MapError::transport(format!("{} writer stopped", self.function)))?;
        Ok(handle)
    }
}

// ============================================================================
// Write Map
// ============================================================================

/// Write orchestrator for one of FC05, FC06, FC15, FC16.
pub struct WriteMap<T> {
    function: ModbusFunction,
    slave_id: SlaveId,
    register_shift: i16,
    backoff: Duration,
    link: Link<T>,
    signals: HashMap<String, SignalDescriptor>,
    initialized: bool,
}

impl<T> std::fmt::Debug for WriteMap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteMap")
            .field("function", &self.function)
            .field("link", &self.link)
            .field("signals", &self.signals.len())
            .finish()
    }
}

impl<T: ModbusTransport + 'static> WriteMap<T> {
    pub fn new(function: ModbusFunction, settings: &DeviceSettings, link: Link<T>) -> MapResult<Self> {
        if !function.is_write() {
            return Err(MapError::invalid_data(format!(
                "{} cannot back a write map",
                function
            )));
        }
        Ok(Self {
            function,
            slave_id: settings.slave_id,
            register_shift: settings.register_shift,
            backoff: settings.write_backoff(),
            link,
            signals: HashMap::new(),
            initialized: false,
        })
    }

    #[inline]
    pub fn function(&self) -> ModbusFunction {
        self.function
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.initialized
    }

    pub fn owns(&self, signal: &str) -> bool {
        self.signals.contains_key(signal)
    }

    pub fn signal(&self, name: &str) -> Option<&SignalDescriptor> {
        self.signals.get(name)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Parse `configs` and keep the signals of this map's function.
    pub fn init(&mut self, configs: &[SignalConfig]) -> MapResult<usize> {
        self.init_descriptors(&parse_configs(configs))
    }

    pub fn init_descriptors(&mut self, descriptors: &[SignalDescriptor]) -> MapResult<usize> {
        self.signals.clear();
        for signal in descriptors.iter().filter(|s| s.function == self.function) {
            if let Err(e) = self.accepts(signal) {
                warn!(function = %self.function, error = %e, "dropping signal");
                continue;
            }
            if self.signals.contains_key(&signal.name) {
                warn!(function = %self.function, signal = %signal.name, "duplicate signal name, keeping first");
                continue;
            }
            self.signals.insert(signal.name.clone(), signal.clone());
        }
        self.initialized = true;

        if !self.signals.is_empty() {
            info!(function = %self.function, signals = self.signals.len(), "write map initialized");
        }
        Ok(self.signals.len())
    }

    fn accepts(&self, signal: &SignalDescriptor) -> MapResult<()> {
        let address = shift_address(signal, self.register_shift)?;
        if self.function == ModbusFunction::WriteSingleRegister && signal.data_type.register_count() > 1 {
            return Err(MapError::malformed(
                signal.name.as_str(),
                format!("{} does not fit a single register write", signal.data_type),
            ));
        }
        if address + u32::from(signal.width()) > u32::from(u16::MAX) + 1 {
            return Err(MapError::malformed(
                signal.name.as_str(),
                format!("{} at {} runs past register 65535", signal.data_type, address),
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Request processing
    // ========================================================================

    /// Start the consumer loop and return the submitting half.
    pub fn spawn(self: &Arc<Self>) -> MapResult<(WriteSubmitter, JoinHandle<()>)> {
        if !self.initialized {
            return Err(MapError::NotInitialized);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(Arc::clone(self).run(rx));
        Ok((
            WriteSubmitter {
                function: self.function,
                requests: tx,
            },
            task,
        ))
    }

    /// Consume requests until every submitter is dropped, executing each
    /// request in its own task.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::UnboundedReceiver<WriteRequest>) {
        while let Some(request) = requests.recv().await {
            let map = Arc::clone(&self);
            tokio::spawn(async move {
                map.execute(request).await;
            });
        }
        debug!(function = %self.function, "write map stopped");
    }

    /// Encode and write one request, retrying until it succeeds or expires.
    pub async fn execute(&self, request: WriteRequest) -> WriteOutcome {
        let handle = request.handle();
        handle.set_state(WriteState::Encoding);

        let (address, payload) = match self.encode(&request) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(signal = %request.signal, value = request.value, error = %e, "write rejected");
                request.mark_done();
                handle.set_state(WriteState::Rejected);
                return WriteOutcome::Rejected(e);
            }
        };

        handle.set_state(WriteState::Writing);
        let mut attempts = 0u32;
        loop {
            if !request.is_live() {
                return self.expire(&request);
            }

            {
                let mut link = self.link.lock().await;
                let opened = link.ensure_open().await;
                if let Err(e) = &opened {
                    warn!(link = self.link.id(), error = %e, "link not opening");
                }

                if request.is_expired(Utc::now()) {
                    return self.expire(&request);
                }

                if opened.is_ok() {
                    attempts += 1;
                    let result = link
                        .write_payload(self.function, self.slave_id, address, &payload)
                        .await;
                    link.finish_transaction().await;

                    match result {
                        Ok(()) => {
                            request.mark_done();
                            handle.set_state(WriteState::Succeeded);
                            debug!(
                                signal = %request.signal,
                                address,
                                value = request.value,
                                attempts,
                                "value written"
                            );
                            return WriteOutcome::Succeeded { attempts };
                        }
                        Err(e) => {
                            warn!(signal = %request.signal, attempt = attempts, error = %e, "write failed");
                        }
                    }
                }
            }

            tokio::time::sleep(self.backoff).await;
        }
    }

    fn expire(&self, request: &WriteRequest) -> WriteOutcome {
        debug!(signal = %request.signal, "write request expired");
        request.mark_done();
        request.handle.set_state(WriteState::Expired);
        WriteOutcome::Expired
    }

    /// Resolve the target address and encode the value for the wire.
    fn encode(&self, request: &WriteRequest) -> MapResult<(u16, WritePayload)> {
        let signal = self
            .signals
            .get(&request.signal)
            .ok_or_else(|| MapError::UnknownSignal(request.signal.clone()))?;
        let address = shift_address(signal, self.register_shift)? as u16;

        if self.function.is_bit_access() {
            let mut state = request.value != 0.0;
            if signal.invert {
                state = !state;
            }
            return Ok((address, WritePayload::Coil(state)));
        }

        let value = if signal.is_discrete() && signal.invert {
            signal.scaling.check_eu(request.value)?;
            invert_discrete(request.value)
        } else {
            signal.scaling.to_raw(request.value)?
        };
        let words = encode_raw(value, signal.data_type, signal.byte_order)?;
        if words.len() > usize::from(MAX_WRITE_REGISTERS) {
            return Err(MapError::invalid_data(format!(
                "{} registers exceed the {} register write limit",
                words.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        Ok((address, WritePayload::Registers(words)))
    }
}
