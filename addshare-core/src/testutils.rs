//! Test doubles shared by the engine crates.
//!
//! Only compiled with the `testutils` feature, which the engine crates
//! enable in their dev-dependencies.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    message::{Message, Source},
    transport::{Transport, TransportError},
};

/// A transport that records every send and always succeeds.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    sent: Arc<Mutex<Vec<(Source, Message)>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a snapshot of all `(destination, message)` pairs sent so far.
    pub fn sent(&self) -> Vec<(Source, Message)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&mut self, dest: Source, message: &Message) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push((dest, message.clone()));
        Ok(())
    }
}

/// A transport that funnels every send into one channel, letting a test act
/// as the network and route messages between in-process engines.
#[derive(Clone)]
pub struct FunnelTransport {
    tx: mpsc::UnboundedSender<(Source, Message)>,
}

impl FunnelTransport {
    /// Creates a funnel and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(Source, Message)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (FunnelTransport { tx }, rx)
    }
}

#[async_trait]
impl Transport for FunnelTransport {
    async fn send(&mut self, dest: Source, message: &Message) -> Result<(), TransportError> {
        self.tx
            .send((dest, message.clone()))
            .map_err(|_| TransportError::UnknownDestination(dest))
    }
}
