#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use broadcast_hub::{
    connection::{Connection, ConnectionId, TransportError},
    message::Message,
};

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    Healthy,
    /// Every send fails immediately.
    Failing,
    /// Every send hangs far longer than any test timeout.
    Stalled,
}

/// In-memory connection that records what the hub sent to it.
pub struct Recorder {
    id: ConnectionId,
    behaviour: Behaviour,
    received: Mutex<Vec<Message>>,
    closed: AtomicBool,
}

impl Recorder {
    pub fn healthy(id: &str) -> Arc<Self> {
        Self::with(id, Behaviour::Healthy)
    }

    pub fn failing(id: &str) -> Arc<Self> {
        Self::with(id, Behaviour::Failing)
    }

    pub fn stalled(id: &str) -> Arc<Self> {
        Self::with(id, Behaviour::Stalled)
    }

    pub fn with(id: &str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            behaviour,
            received: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn texts(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|message| message.text.clone())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for Recorder {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        match self.behaviour {
            Behaviour::Healthy => {
                self.received.lock().unwrap().push(message.clone());
                Ok(())
            }
            Behaviour::Failing => Err(TransportError::Closed),
            Behaviour::Stalled => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn ids(names: &[&str]) -> Vec<ConnectionId> {
    names.iter().map(|name| ConnectionId::from(*name)).collect()
}
