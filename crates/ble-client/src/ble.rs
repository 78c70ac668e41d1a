use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::{
    BDAddr, Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{ClientConfig, ClientError, Session, Transport};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// BLE backend on the host's first bluetooth adapter.
#[derive(Debug, Clone)]
pub struct BleTransport {
    config: ClientConfig,
}

impl BleTransport {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

impl Transport for BleTransport {
    type Session = BleSession;

    async fn open(&self, address: &str) -> Result<BleSession, ClientError> {
        let target = address
            .parse::<BDAddr>()
            .map_err(|_| ClientError::InvalidAddress(address.to_string()))?;

        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(ClientError::NoAdapter)?;

        adapter.start_scan(ScanFilter::default()).await?;
        let found = timeout(
            Duration::from_millis(self.config.scan_timeout_ms),
            find_peripheral(&adapter, target),
        )
        .await;
        if let Err(err) = adapter.stop_scan().await {
            warn!(error = %err, "stop scan failed");
        }
        let peripheral = match found {
            Ok(result) => result?,
            Err(_) => {
                return Err(ClientError::DeviceNotFound {
                    address: address.to_string(),
                    timeout_ms: self.config.scan_timeout_ms,
                })
            }
        };

        timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            peripheral.connect(),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            operation: "connect",
            timeout_ms: self.config.connect_timeout_ms,
        })??;
        peripheral.discover_services().await?;
        info!(%address, "ble session open");

        Ok(BleSession {
            peripheral,
            config: self.config.clone(),
            forwarders: HashMap::new(),
        })
    }
}

async fn find_peripheral(adapter: &Adapter, target: BDAddr) -> Result<Peripheral, ClientError> {
    loop {
        for peripheral in adapter.peripherals().await? {
            if peripheral.address() == target {
                return Ok(peripheral);
            }
        }
        sleep(SCAN_POLL_INTERVAL).await;
    }
}

pub struct BleSession {
    peripheral: Peripheral,
    config: ClientConfig,
    forwarders: HashMap<Uuid, JoinHandle<()>>,
}

impl BleSession {
    fn characteristic(&self, uuid: Uuid) -> Result<Characteristic, ClientError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|characteristic| characteristic.uuid == uuid)
            .ok_or(ClientError::CharacteristicNotFound(uuid))
    }
}

impl Session for BleSession {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ClientError> {
        let target = self.characteristic(characteristic)?;
        // stream first, so frames sent right after the subscribe are kept
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&target).await?;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != characteristic {
                    continue;
                }
                debug!(len = notification.value.len(), "notification");
                if tx.send(notification.value).await.is_err() {
                    break;
                }
            }
        });
        if let Some(previous) = self.forwarders.insert(characteristic, handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn write_command(
        &mut self,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), ClientError> {
        let target = self.characteristic(characteristic)?;
        let write_type = if target
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        timeout(
            Duration::from_millis(self.config.write_timeout_ms),
            self.peripheral.write(&target, bytes, write_type),
        )
        .await
        .map_err(|_| ClientError::Timeout {
            operation: "write",
            timeout_ms: self.config.write_timeout_ms,
        })??;
        Ok(())
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), ClientError> {
        let handle = self
            .forwarders
            .remove(&characteristic)
            .ok_or(ClientError::NotSubscribed(characteristic))?;
        handle.abort();
        let target = self.characteristic(characteristic)?;
        self.peripheral.unsubscribe(&target).await?;
        Ok(())
    }

    async fn close(mut self) -> Result<(), ClientError> {
        for (_, handle) in self.forwarders.drain() {
            handle.abort();
        }
        self.peripheral.disconnect().await?;
        info!("ble session closed");
        Ok(())
    }
}

impl Drop for BleSession {
    fn drop(&mut self) {
        for handle in self.forwarders.values() {
            handle.abort();
        }
    }
}
