//! TCP front end of the remote protocol.

use std::{collections::HashMap, io, net::SocketAddr};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::{
    codec::Framed,
    sync::CancellationToken,
};

use crate::event::{Event, EventBus};

use super::{
    codec::{CrlfLinesCodec, Inbound, MAX_LINE_LENGTH},
    commands::{CommandHandler, GREETING},
};

/// Accepts clients and runs one task per connection.
///
/// Lines of one connection are handled strictly in order. When a client
/// goes away its task reports back so the server can release the handle.
pub struct RemoteProtocolServer {
    listener: TcpListener,
    handler: CommandHandler,
    event_bus: Option<EventBus>,
}

impl RemoteProtocolServer {
    pub async fn bind(address: &str, handler: CommandHandler) -> Result<Self> {
        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to listen on {address}"))?;
        info!("Remote control listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            handler,
            event_bus: None,
        })
    }

    /// Publishes [`Event::ConnectionClosed`] when a client disconnects.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves clients until `cancel_token` fires, then waits for the
    /// connection tasks to finish.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<()> {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<SocketAddr>();
        let mut connections: HashMap<SocketAddr, JoinHandle<()>> = HashMap::new();

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("Remote control server cancelled");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    };
                    info!("New connection from {peer}");
                    let handle = tokio::spawn(serve_connection(
                        stream,
                        peer,
                        self.handler.clone(),
                        closed_tx.clone(),
                        cancel_token.child_token(),
                    ));
                    connections.insert(peer, handle);
                }
                Some(peer) = closed_rx.recv() => {
                    if connections.remove(&peer).is_some() {
                        info!("Closed connection from {peer}");
                    }
                    if let Some(event_bus) = &self.event_bus {
                        if event_bus.publish(Event::ConnectionClosed(peer)).is_err() {
                            debug!("No subscriber for ConnectionClosed({peer})");
                        }
                    }
                }
            }
        }

        for (peer, handle) in connections.drain() {
            if let Err(e) = handle.await {
                warn!("Connection task of {peer} failed: {e}");
            }
        }
        Ok(())
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: CommandHandler,
    closed: mpsc::UnboundedSender<SocketAddr>,
    cancel_token: CancellationToken,
) {
    let mut framed = Framed::new(stream, CrlfLinesCodec::new());

    tokio::select! {
        () = cancel_token.cancelled() => debug!("Connection {peer} cancelled"),
        result = converse(&mut framed, &handler) => {
            if let Err(e) = result {
                warn!("Connection {peer}: {e}");
            }
        }
    }

    if closed.send(peer).is_err() {
        debug!("Server gone before connection {peer} closed");
    }
}

async fn converse(
    framed: &mut Framed<TcpStream, CrlfLinesCodec>,
    handler: &CommandHandler,
) -> Result<(), io::Error> {
    framed.send(GREETING.to_string()).await?;

    while let Some(frame) = framed.next().await {
        match frame? {
            Inbound::Line(line) => {
                debug!("Received: {line}");
                for reply in handler.handle_line(&line).await {
                    framed.feed(reply).await?;
                }
            }
            Inbound::Overlong => {
                debug!("Dropping request longer than {MAX_LINE_LENGTH} bytes");
                framed
                    .feed(format!("ERROR: line exceeds {MAX_LINE_LENGTH} bytes"))
                    .await?;
            }
        }
        SinkExt::<String>::flush(framed).await?;
    }
    Ok(())
}
