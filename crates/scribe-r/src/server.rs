use futures::{SinkExt, StreamExt};
use scribe_engine::protocol::{HostEnvelope, HostRequest, HostResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

pub type Outbound = HostEnvelope<HostRequest>;
pub type Inbound = HostEnvelope<HostResponse>;

/// Websocket endpoint the host extension connects to.
///
/// Requests fan out to every connection (normally one); replies from all
/// connections funnel into a single receiver.
#[derive(Clone)]
pub struct RemoteServer {
    port: u16,
    command_tx: broadcast::Sender<Outbound>,
}

pub struct ServerHandle {
    pub local_addr: SocketAddr,
    pub command_tx: broadcast::Sender<Outbound>,
    pub response_rx: Arc<Mutex<mpsc::Receiver<Inbound>>>,
}

impl RemoteServer {
    pub fn new(port: u16) -> Self {
        let (command_tx, _) = broadcast::channel(100);
        Self { port, command_tx }
    }

    pub async fn start(&self) -> Result<ServerHandle, std::io::Error> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Remote host server listening on: {}", local_addr);

        let (response_tx, response_rx) = mpsc::channel(100);
        let command_tx = self.command_tx.clone();
        let server_cmd_tx = command_tx.clone();

        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                info!("Accepted TCP connection from: {}", peer);
                let cmd_rx = server_cmd_tx.subscribe();
                tokio::spawn(accept_connection(stream, cmd_rx, response_tx.clone()));
            }
            warn!("Server accept loop ended");
        });

        Ok(ServerHandle {
            local_addr,
            command_tx,
            response_rx: Arc::new(Mutex::new(response_rx)),
        })
    }
}

async fn accept_connection(
    stream: TcpStream,
    mut cmd_rx: broadcast::Receiver<Outbound>,
    resp_tx: mpsc::Sender<Inbound>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };

    info!("New WebSocket connection: established");
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let cmd = match cmd {
                    Ok(cmd) => cmd,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Connection lagged, {} requests dropped", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let json = match serde_json::to_string(&cmd) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode request #{}: {}", cmd.id, e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    error!("Failed to send message to WS: {}", e);
                    break;
                }
            }

            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Inbound>(&text) {
                            Ok(resp) => {
                                if let Err(e) = resp_tx.send(resp).await {
                                    error!("Failed to forward reply: {}", e);
                                    break;
                                }
                            }
                            Err(e) => {
                                error!("Failed to parse reply from host: {} | Text: {}", e, text);
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket closed");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
