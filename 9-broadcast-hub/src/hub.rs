//! The hub: single owner of the membership registry and sole executor of
//! broadcast fan-out.
//!
//! Handlers never touch the [`Registry`] directly. They hold a cloned
//! [`HubHandle`] and push events into one bounded queue; the [`Hub`] worker
//! drains that queue and runs each event to completion before taking the
//! next. This makes registration, deregistration and publishing observe a
//! single total order, and every broadcast sees one consistent membership
//! snapshot.
//!
//! ```text
//! handler ─┐
//! handler ─┼─ HubEvent ─▶ [ mpsc queue ] ─▶ Hub::run ─▶ Registry
//! handler ─┘                                   │
//!                                              └─▶ send() to every member
//! ```

use std::{future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionId, TransportError},
    message::Message,
    registry::Registry,
};

/// Queue depth between handlers and the hub. One slot keeps producers in
/// near lock-step with the worker.
pub const DEFAULT_EVENT_CAPACITY: usize = 1;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Text of the advisory delivered to everyone when the hub shuts down.
pub const SHUTDOWN_NOTICE: &str = "server shutting down";

/// What the hub does with a member whose `send` failed during fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Deregister and close the member right after the failed broadcast.
    #[default]
    Evict,
    /// Keep the member; only its own read failure removes it.
    Retain,
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub event_capacity: usize,
    /// Upper bound for a single recipient's `send`. `None` waits forever.
    pub send_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            send_timeout: Some(DEFAULT_SEND_TIMEOUT),
            failure_policy: FailurePolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub is no longer running")]
    Stopped,
    #[error("hub dropped the reply")]
    NoReply,
}

/// One recipient that could not be reached during a broadcast.
#[derive(Debug)]
pub struct SendFailure {
    pub connection: ConnectionId,
    pub error: TransportError,
}

/// Outcome of one fan-out pass.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<ConnectionId>,
    pub failures: Vec<SendFailure>,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum HubEvent {
    Register(Arc<dyn Connection>),
    Deregister(Arc<dyn Connection>),
    Publish {
        message: Message,
        respond_to: Option<oneshot::Sender<BroadcastReport>>,
    },
    Members {
        respond_to: oneshot::Sender<Vec<ConnectionId>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Cloneable entry point into a running hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    pub async fn register(&self, connection: Arc<dyn Connection>) -> Result<(), HubError> {
        self.submit(HubEvent::Register(connection)).await
    }

    /// Removes `connection` from the membership. A no-op when it is absent
    /// or another connection has since registered under the same identity.
    pub async fn deregister(&self, connection: Arc<dyn Connection>) -> Result<(), HubError> {
        self.submit(HubEvent::Deregister(connection)).await
    }

    /// Queues `message` for fan-out and returns once the hub accepted it.
    pub async fn publish(&self, message: Message) -> Result<(), HubError> {
        self.submit(HubEvent::Publish {
            message,
            respond_to: None,
        })
        .await
    }

    /// Like [`publish`](Self::publish), but waits for the fan-out to finish.
    pub async fn broadcast(&self, message: Message) -> Result<BroadcastReport, HubError> {
        let (respond_to, reply) = oneshot::channel();
        self.submit(HubEvent::Publish {
            message,
            respond_to: Some(respond_to),
        })
        .await?;
        reply.await.map_err(|_| HubError::NoReply)
    }

    /// Identities currently registered, sorted.
    pub async fn members(&self) -> Result<Vec<ConnectionId>, HubError> {
        let (respond_to, reply) = oneshot::channel();
        self.submit(HubEvent::Members { respond_to }).await?;
        reply.await.map_err(|_| HubError::NoReply)
    }

    /// Notifies every member, closes all connections and stops the worker.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        let (respond_to, reply) = oneshot::channel();
        self.submit(HubEvent::Shutdown { respond_to }).await?;
        reply.await.map_err(|_| HubError::NoReply)
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.events.send(event).await.map_err(|_| HubError::Stopped)
    }
}

/// The worker owning the registry.
pub struct Hub {
    registry: Registry,
    events: mpsc::Receiver<HubEvent>,
    config: HubConfig,
}

impl Hub {
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.event_capacity.max(1));
        let hub = Self {
            registry: Registry::new(),
            events: rx,
            config,
        };
        (hub, HubHandle { events: tx })
    }

    /// Processes events until every handle is dropped or a shutdown arrives.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if !self.handle_event(event).await {
                break;
            }
        }
        debug!(members = self.registry.len(), "hub stopped");
    }

    async fn handle_event(&mut self, event: HubEvent) -> bool {
        match event {
            HubEvent::Register(connection) => {
                let id = connection.id().clone();
                if self.registry.register(connection).is_some() {
                    debug!(connection = %id, "replaced existing registration");
                } else {
                    debug!(connection = %id, members = self.registry.len(), "registered");
                }
            }
            HubEvent::Deregister(connection) => {
                let id = connection.id();
                if self.registry.deregister(&connection) {
                    debug!(connection = %id, members = self.registry.len(), "deregistered");
                } else {
                    debug!(connection = %id, "deregister ignored, not the registered handle");
                }
            }
            HubEvent::Publish {
                message,
                respond_to,
            } => {
                let report = self.fan_out(&message).await;
                self.apply_failure_policy(&report).await;
                if let Some(respond_to) = respond_to {
                    let _ = respond_to.send(report);
                }
            }
            HubEvent::Members { respond_to } => {
                let _ = respond_to.send(self.registry.ids());
            }
            HubEvent::Shutdown { respond_to } => {
                self.close_all().await;
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    async fn fan_out(&self, message: &Message) -> BroadcastReport {
        let targets = self.registry.snapshot();
        let limit = self.config.send_timeout;
        let attempts = targets.iter().map(|connection| async move {
            let outcome = bounded(limit, connection.send(message)).await;
            (connection.id().clone(), outcome)
        });

        let mut report = BroadcastReport::default();
        for (connection, outcome) in join_all(attempts).await {
            match outcome {
                Ok(()) => report.delivered.push(connection),
                Err(error) => {
                    warn!(connection = %connection, %error, "failed to deliver message");
                    report.failures.push(SendFailure { connection, error });
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            failed = report.failures.len(),
            "broadcast finished"
        );
        report
    }

    async fn apply_failure_policy(&mut self, report: &BroadcastReport) {
        if self.config.failure_policy == FailurePolicy::Retain {
            return;
        }

        for failure in &report.failures {
            let Some(connection) = self.registry.take(&failure.connection) else {
                continue;
            };

            debug!(connection = %failure.connection, "evicted after failed delivery");
            if let Err(error) = bounded(self.config.send_timeout, connection.close()).await {
                debug!(connection = %failure.connection, %error, "failed to close evicted connection");
            }
        }
    }

    async fn close_all(&mut self) {
        let notice = Message::new(None, SHUTDOWN_NOTICE);
        let report = self.fan_out(&notice).await;
        info!(
            notified = report.delivered.len(),
            "hub shutting down, closing all connections"
        );

        let connections = self.registry.drain();
        let limit = self.config.send_timeout;
        let closes = connections
            .iter()
            .map(|connection| bounded(limit, connection.close()));
        for (connection, result) in connections.iter().zip(join_all(closes).await) {
            if let Err(error) = result {
                debug!(connection = %connection.id(), %error, "failed to close connection");
            }
        }
    }
}

/// Runs one transport operation, giving up after `limit` when set.
async fn bounded<F>(limit: Option<Duration>, operation: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation)
            .await
            .map_err(|_| TransportError::TimedOut(limit))?,
        None => operation.await,
    }
}

/// Starts the one hub worker for this process.
pub fn spawn_hub(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
    let (hub, handle) = Hub::new(config);
    let task = tokio::spawn(hub.run());
    (handle, task)
}
