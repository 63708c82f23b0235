use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        ConnectInfo, State,
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionId, Inbound, TransportError},
    handler::serve_connection,
    hub::{HubConfig, HubHandle, spawn_hub},
    message::Message,
};

pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
}

impl Server {
    /// Wraps a bound listener and starts the hub worker. Must be called from
    /// within a Tokio runtime.
    pub fn new(listener: TcpListener, config: HubConfig) -> Self {
        let (hub, hub_task) = spawn_hub(config);
        Self {
            listener,
            hub,
            hub_task,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> HubHandle {
        self.hub.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Server {
            listener,
            hub,
            hub_task,
        } = self;

        let app = router(hub.clone());
        let signal = async move {
            shutdown.await;
            handle_shutdown(&hub).await;
        };

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .context("websocket server failed")?;

        if let Err(err) = hub_task.await {
            warn!(error = ?err, "hub worker panicked");
        }
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn handle_shutdown(hub: &HubHandle) {
    info!("server shutting down");
    if let Err(err) = hub.shutdown().await {
        warn!(error = %err, "hub did not shut down cleanly");
    }
}

pub fn router(hub: HubHandle) -> Router {
    Router::new()
        .route("/", get(upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(hub): State<HubHandle>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, peer, hub))
}

async fn serve_socket(socket: WebSocket, peer: SocketAddr, hub: HubHandle) {
    let (sink, stream) = socket.split();
    let connection = Arc::new(WsConnection::new(peer.into(), sink));

    info!(%peer, "client connected");
    if let Err(err) = serve_connection(connection, WsInbound::new(stream), hub).await {
        debug!(%peer, error = %err, "handler stopped before the connection closed");
    }
    info!(%peer, "client disconnected");
}

/// Write half of an upgraded socket.
pub struct WsConnection {
    id: ConnectionId,
    sink: Mutex<SplitSink<WebSocket, WsMessage>>,
}

impl WsConnection {
    pub fn new(id: ConnectionId, sink: SplitSink<WebSocket, WsMessage>) -> Self {
        Self {
            id,
            sink: Mutex::new(sink),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn send(&self, message: &Message) -> Result<(), TransportError> {
        let frame = WsMessage::Text(message.encode()?);
        self.sink.lock().await.send(frame).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await?;
        Ok(())
    }
}

/// Read half of an upgraded socket.
pub struct WsInbound {
    stream: SplitStream<WebSocket>,
}

impl WsInbound {
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl Inbound for WsInbound {
    async fn receive(&mut self) -> Result<Message, TransportError> {
        loop {
            let frame = match self.stream.next().await {
                Some(frame) => frame?,
                None => return Err(TransportError::Closed),
            };

            match frame {
                WsMessage::Text(text) => return Ok(Message::decode(&text)?),
                WsMessage::Binary(bytes) => return Ok(Message::decode_slice(&bytes)?),
                WsMessage::Close(_) => return Err(TransportError::Closed),
                WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            }
        }
    }
}
