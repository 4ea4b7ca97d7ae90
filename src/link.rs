//! # Shared Link
//!
//! A [`Link`] guards one physical connection. Poll cycles and write
//! executions both go through [`Link::lock`], so at most one Modbus
//! transaction is in flight per link at any time.
//!
//! Devices that share a physical serial port (several slaves on one
//! RS-485 bus) each own a transport but resolve the same port lock from
//! the [`LinkRegistry`], keyed by link id. The registry holds weak handles:
//! a port lock lives exactly as long as some `Link` references it. TCP
//! links are independent sockets and always get a lock of their own.
//!
//! Lock order is always port first, then transport.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tracing::{debug, warn};

use crate::error::{MapError, MapResult};
use crate::transport::ModbusTransport;

type PortLock = AsyncMutex<()>;

// ============================================================================
// Registry
// ============================================================================

/// Process-wide table of port locks keyed by link id.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    ports: Mutex<HashMap<String, Weak<PortLock>>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every device in the process.
    pub fn global() -> &'static LinkRegistry {
        static GLOBAL: OnceLock<LinkRegistry> = OnceLock::new();
        GLOBAL.get_or_init(LinkRegistry::new)
    }

    /// Resolve the port lock for `link_id`, creating it when no live link
    /// holds one.
    pub fn port_lock(&self, link_id: &str) -> Arc<PortLock> {
        let mut ports = self.ports.lock().unwrap_or_else(|p| p.into_inner());
        ports.retain(|_, port| port.strong_count() > 0);

        if let Some(port) = ports.get(link_id).and_then(Weak::upgrade) {
            return port;
        }

        let port = Arc::new(PortLock::new(()));
        ports.insert(link_id.to_string(), Arc::downgrade(&port));
        port
    }

    /// Number of link ids with at least one live `Link`.
    pub fn active_links(&self) -> usize {
        let ports = self.ports.lock().unwrap_or_else(|p| p.into_inner());
        ports.values().filter(|port| port.strong_count() > 0).count()
    }
}

// ============================================================================
// Link
// ============================================================================

/// Transport plus the port lock it must hold while transacting.
pub struct Link<T> {
    id: Arc<str>,
    port: Arc<PortLock>,
    transport: Arc<AsyncMutex<T>>,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            id: Arc::clone(&self.id),
            port: Arc::clone(&self.port),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T> std::fmt::Debug for Link<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("id", &self.id).finish()
    }
}

impl<T: ModbusTransport> Link<T> {
    /// Create a link registered in the process-wide registry.
    pub fn new(id: impl Into<String>, transport: T) -> Self {
        Self::with_registry(id, transport, LinkRegistry::global())
    }

    /// Serial transports take their port lock from `registry`.
    pub fn with_registry(id: impl Into<String>, transport: T, registry: &LinkRegistry) -> Self {
        let id: String = id.into();
        let port = if transport.close_after_transaction() {
            registry.port_lock(&id)
        } else {
            Arc::new(PortLock::new(()))
        };
        Self {
            id: id.into(),
            port,
            transport: Arc::new(AsyncMutex::new(transport)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for exclusive use of the link.
    pub async fn lock(&self) -> LinkGuard<'_, T> {
        let port = self.port.lock().await;
        let transport = self.transport.lock().await;
        LinkGuard {
            link_id: &self.id,
            transport,
            _port: port,
        }
    }

    /// True when both links serialize on the same port.
    pub fn shares_port_with<U>(&self, other: &Link<U>) -> bool {
        Arc::ptr_eq(&self.port, &other.port)
    }
}

/// Exclusive access to a link's transport.
pub struct LinkGuard<'a, T> {
    link_id: &'a str,
    transport: AsyncMutexGuard<'a, T>,
    _port: AsyncMutexGuard<'a, ()>,
}

impl<T: ModbusTransport> LinkGuard<'_, T> {
    /// Open the transport if it is not open yet.
    ///
    /// A serial transport that fails to open is closed again so the next
    /// attempt starts from a released port.
    pub async fn ensure_open(&mut self) -> MapResult<()> {
        if self.transport.is_open() {
            return Ok(());
        }
        debug!(link = self.link_id, "opening link");
        let Err(e) = self.transport.open().await else {
            return Ok(());
        };

        if self.transport.close_after_transaction() {
            if let Err(close) = self.transport.close().await {
                warn!(link = self.link_id, error = %close, "failed to close link");
            }
        }
        Err(match e {
            MapError::TransportUnavailable { .. } => e,
            other => MapError::unavailable(other.to_string()),
        })
    }

    /// Release serial links after a transaction so other masters can use
    /// the port.
    pub async fn finish_transaction(&mut self) {
        if !self.transport.close_after_transaction() || !self.transport.is_open() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            warn!(link = self.link_id, error = %e, "failed to close link");
        }
    }
}

impl<T> Deref for LinkGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.transport
    }
}

impl<T> DerefMut for LinkGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
