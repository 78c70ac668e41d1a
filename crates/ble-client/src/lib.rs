use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[cfg(feature = "ble")]
mod ble;
/// Scripted in-process transport for tests.
pub mod mock;

#[cfg(feature = "ble")]
pub use ble::{BleSession, BleTransport};
pub use mock::{MockEvent, MockSession, MockTransport};

/// Connection options shared by the transport backends.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long to scan for the controller before giving up.
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// Per-write timeout in milliseconds.
    pub write_timeout_ms: u64,
    /// Notifications buffered between the radio and the session owner.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            write_timeout_ms: 2_000,
            channel_capacity: 32,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid device address {0}")]
    InvalidAddress(String),
    #[error("no bluetooth adapter available")]
    NoAdapter,
    #[error("device {address} not found within {timeout_ms}ms")]
    DeviceNotFound { address: String, timeout_ms: u64 },
    #[error("characteristic {0} not exposed by device")]
    CharacteristicNotFound(Uuid),
    #[error("not subscribed to characteristic {0}")]
    NotSubscribed(Uuid),
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
    #[cfg(feature = "ble")]
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
    #[error("injected fault: {0}")]
    Injected(String),
}

/// Opens sessions to a device by address.
#[allow(async_fn_in_trait)]
pub trait Transport {
    type Session: Session;

    async fn open(&self, address: &str) -> Result<Self::Session, ClientError>;
}

/// A connected device. Notifications for a subscribed characteristic are
/// delivered through the returned channel until unsubscribe or close.
#[allow(async_fn_in_trait)]
pub trait Session {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ClientError>;

    async fn write_command(&mut self, characteristic: Uuid, bytes: &[u8])
        -> Result<(), ClientError>;

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), ClientError>;

    async fn close(self) -> Result<(), ClientError>;
}
