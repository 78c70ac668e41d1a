use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{ClientConfig, ClientError, Session, Transport};

/// Lifecycle and write calls observed by a [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Open(String),
    Subscribe(Uuid),
    Write(Vec<u8>),
    Unsubscribe(Uuid),
    Close,
}

#[derive(Debug, Default)]
struct MockState {
    responses: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    on_subscribe: Vec<Vec<u8>>,
    events: Vec<MockEvent>,
    fail_open: bool,
    fail_write: Option<Vec<u8>>,
}

/// In-process transport that answers writes with scripted notification frames.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    channel_capacity: usize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_channel_capacity(ClientConfig::default().channel_capacity)
    }

    /// Frames beyond `capacity` that are not yet received are dropped, as a
    /// full radio buffer would.
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            channel_capacity: capacity.max(1),
        }
    }

    /// Frames notified after `command` is written.
    pub fn respond_to(self, command: &[u8], frames: Vec<Vec<u8>>) -> Self {
        self.lock().responses.insert(command.to_vec(), frames);
        self
    }

    /// Frames notified as soon as a subscription is made.
    pub fn notify_on_subscribe(self, frames: Vec<Vec<u8>>) -> Self {
        self.lock().on_subscribe = frames;
        self
    }

    pub fn fail_open(self) -> Self {
        self.lock().fail_open = true;
        self
    }

    pub fn fail_write(self, command: &[u8]) -> Self {
        self.lock().fail_write = Some(command.to_vec());
        self
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.lock().events.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|event| match event {
                MockEvent::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for MockTransport {
    type Session = MockSession;

    async fn open(&self, address: &str) -> Result<MockSession, ClientError> {
        let mut state = self.lock();
        state.events.push(MockEvent::Open(address.to_string()));
        if state.fail_open {
            return Err(ClientError::Injected(format!("open {address}")));
        }
        Ok(MockSession {
            transport: self.clone(),
            subscriptions: HashMap::new(),
        })
    }
}

#[derive(Debug)]
pub struct MockSession {
    transport: MockTransport,
    subscriptions: HashMap<Uuid, mpsc::Sender<Vec<u8>>>,
}

impl MockSession {
    fn deliver(&self, frames: &[Vec<u8>]) {
        for sender in self.subscriptions.values() {
            for frame in frames {
                if let Err(err) = sender.try_send(frame.clone()) {
                    warn!(error = %err, "mock notification dropped");
                }
            }
        }
    }
}

impl Session for MockSession {
    async fn subscribe(
        &mut self,
        characteristic: Uuid,
    ) -> Result<mpsc::Receiver<Vec<u8>>, ClientError> {
        let (tx, rx) = mpsc::channel(self.transport.channel_capacity);
        self.subscriptions.insert(characteristic, tx);
        let initial = {
            let mut state = self.transport.lock();
            state.events.push(MockEvent::Subscribe(characteristic));
            state.on_subscribe.clone()
        };
        self.deliver(&initial);
        Ok(rx)
    }

    async fn write_command(
        &mut self,
        _characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), ClientError> {
        let frames = {
            let mut state = self.transport.lock();
            state.events.push(MockEvent::Write(bytes.to_vec()));
            if state.fail_write.as_deref() == Some(bytes) {
                return Err(ClientError::Injected(format!("write {bytes:02X?}")));
            }
            state.responses.get(bytes).cloned().unwrap_or_default()
        };
        debug!(len = bytes.len(), responses = frames.len(), "mock write");
        self.deliver(&frames);
        Ok(())
    }

    async fn unsubscribe(&mut self, characteristic: Uuid) -> Result<(), ClientError> {
        self.transport
            .lock()
            .events
            .push(MockEvent::Unsubscribe(characteristic));
        self.subscriptions
            .remove(&characteristic)
            .map(|_| ())
            .ok_or(ClientError::NotSubscribed(characteristic))
    }

    async fn close(self) -> Result<(), ClientError> {
        self.transport.lock().events.push(MockEvent::Close);
        Ok(())
    }
}
