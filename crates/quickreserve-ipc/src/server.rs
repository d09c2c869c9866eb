//! IPC server implementation

use quickreserve_api::{Command, Event, Request, Response};
use quickreserve_util::ClientId;
use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::{IpcError, IpcResult};

/// Message from client to server
#[derive(Debug)]
pub enum ServerMessage {
    Request {
        client_id: ClientId,
        request: Request,
    },
    ClientConnected {
        client_id: ClientId,
        uid: Option<u32>,
    },
    ClientDisconnected {
        client_id: ClientId,
    },
}

/// IPC Server
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    event_tx: broadcast::Sender<Event>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
    message_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ServerMessage>>>>,
}

struct ClientHandle {
    response_tx: mpsc::UnboundedSender<String>,
    subscribed: bool,
    /// Requests forwarded but not yet answered
    pending: usize,
    /// The client shut down its write side
    read_closed: bool,
}

impl ClientHandle {
    /// Nothing left to send once reads are done, no answers are owed,
    /// and no events were asked for.
    fn is_finished(&self) -> bool {
        self.read_closed && self.pending == 0 && !self.subscribed
    }
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        let (message_tx, message_rx) = mpsc::unbounded_channel();

        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            listener: None,
            clients: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            message_tx,
            message_rx: Arc::new(Mutex::new(Some(message_rx))),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Start listening
    pub async fn start(&mut self) -> IpcResult<()> {
        // A stale socket from a previous run blocks bind()
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;

        // Owner and group only
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;

        info!(path = %self.socket_path.display(), "IPC server listening");

        self.listener = Some(listener);

        Ok(())
    }

    /// Get receiver for server messages. Only the first caller gets it.
    pub async fn take_message_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerMessage>> {
        self.message_rx.lock().await.take()
    }

    /// Accept connections in a loop
    pub async fn run(&self) -> IpcResult<()> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let client_id = ClientId::new();
                    let uid = get_peer_uid(&stream);

                    info!(client_id = %client_id, uid = ?uid, "Client connected");

                    self.handle_client(stream, client_id, uid).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_client(&self, stream: UnixStream, client_id: ClientId, uid: Option<u32>) {
        let (read_half, write_half) = stream.into_split();
        let (response_tx, response_rx) = mpsc::unbounded_channel::<String>();

        self.clients.write().await.insert(
            client_id.clone(),
            ClientHandle {
                response_tx,
                subscribed: false,
                pending: 0,
                read_closed: false,
            },
        );

        let _ = self.message_tx.send(ServerMessage::ClientConnected {
            client_id: client_id.clone(),
            uid,
        });

        tokio::spawn(read_requests(
            BufReader::new(read_half),
            client_id.clone(),
            self.clients.clone(),
            self.message_tx.clone(),
        ));

        tokio::spawn(write_responses(
            write_half,
            response_rx,
            self.event_tx.subscribe(),
            client_id,
            self.clients.clone(),
            self.message_tx.clone(),
        ));
    }

    /// Send a response to a specific client
    pub async fn send_response(&self, client_id: &ClientId, response: Response) -> IpcResult<()> {
        let json = serde_json::to_string(&response)?;

        let clients = self.clients.read().await;
        if let Some(handle) = clients.get(client_id) {
            handle
                .response_tx
                .send(json)
                .map_err(|_| IpcError::ConnectionClosed)?;
        }

        Ok(())
    }

    /// Broadcast an event to all subscribed clients
    pub fn broadcast_event(&self, event: Event) {
        // No receivers just means nobody is connected
        let _ = self.event_tx.send(event);
    }

    /// Get connected client count
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn read_requests(
    mut reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    client_id: ClientId,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!(client_id = %client_id, "Client disconnected (EOF)");
                break;
            }
            Ok(_) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Request>(line) {
                    Ok(request) => {
                        let subscribed = match request.command {
                            Command::SubscribeEvents => Some(true),
                            Command::UnsubscribeEvents => Some(false),
                            _ => None,
                        };
                        if let Some(handle) = clients.write().await.get_mut(&client_id) {
                            handle.pending += 1;
                            if let Some(subscribed) = subscribed {
                                handle.subscribed = subscribed;
                            }
                        }

                        let _ = message_tx.send(ServerMessage::Request {
                            client_id: client_id.clone(),
                            request,
                        });
                    }
                    Err(e) => {
                        warn!(client_id = %client_id, error = %e, "Invalid request");
                    }
                }
            }
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Read error");
                break;
            }
        }
    }

    // Half-closed clients still get their answers and events. Once nothing
    // more is owed, dropping the handle closes the response channel and
    // ends the writer.
    let mut clients = clients.write().await;
    let finished = match clients.get_mut(&client_id) {
        Some(handle) => {
            handle.read_closed = true;
            handle.is_finished()
        }
        None => false,
    };
    if finished {
        clients.remove(&client_id);
    }
}

async fn write_responses(
    mut writer: OwnedWriteHalf,
    mut response_rx: mpsc::UnboundedReceiver<String>,
    mut event_rx: broadcast::Receiver<Event>,
    client_id: ClientId,
    clients: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
    message_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    loop {
        tokio::select! {
            response = response_rx.recv() => {
                let Some(mut msg) = response else {
                    break;
                };
                msg.push('\n');
                if let Err(e) = writer.write_all(msg.as_bytes()).await {
                    debug!(client_id = %client_id, error = %e, "Write error");
                    break;
                }
                if response_delivered(&clients, &client_id).await {
                    break;
                }
            }

            event = event_rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client_id = %client_id, skipped, "Client lagging, events dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let is_subscribed = clients
                    .read()
                    .await
                    .get(&client_id)
                    .map(|h| h.subscribed)
                    .unwrap_or(false);

                if is_subscribed && let Ok(mut msg) = serde_json::to_string(&event) {
                    msg.push('\n');
                    if let Err(e) = writer.write_all(msg.as_bytes()).await {
                        debug!(client_id = %client_id, error = %e, "Event write error");
                        break;
                    }
                }
            }
        }
    }

    let _ = message_tx.send(ServerMessage::ClientDisconnected {
        client_id: client_id.clone(),
    });

    clients.write().await.remove(&client_id);
}

/// Count one answered request. Returns true when the client is finished.
async fn response_delivered(
    clients: &RwLock<HashMap<ClientId, ClientHandle>>,
    client_id: &ClientId,
) -> bool {
    let mut clients = clients.write().await;
    match clients.get_mut(client_id) {
        Some(handle) => {
            handle.pending = handle.pending.saturating_sub(1);
            handle.is_finished()
        }
        None => true,
    }
}

/// Get peer UID from Unix socket
fn get_peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();

    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickreserve_api::{EventPayload, ResponsePayload};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_server_start() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();

        assert!(socket_path.exists());
    }

    #[tokio::test]
    async fn test_run_without_start_fails() {
        let dir = tempdir().unwrap();
        let server = IpcServer::new(dir.path().join("never.sock"));
        assert!(matches!(server.run().await, Err(IpcError::ServerError(_))));
    }

    #[tokio::test]
    async fn test_request_response_and_events() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("qr.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let mut messages = server.take_message_receiver().await.unwrap();
        assert!(server.take_message_receiver().await.is_none());

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });

        let mut client = crate::IpcClient::connect(&socket_path).await.unwrap();
        let pending = tokio::spawn(async move {
            let response = client.send(Command::Ping).await.unwrap();
            (client, response)
        });

        let client_id = match messages.recv().await.unwrap() {
            ServerMessage::ClientConnected { client_id, .. } => client_id,
            other => panic!("unexpected message: {:?}", other),
        };
        match messages.recv().await.unwrap() {
            ServerMessage::Request { request, .. } => {
                assert!(matches!(request.command, Command::Ping));
                server
                    .send_response(
                        &client_id,
                        Response::success(request.request_id, ResponsePayload::Pong),
                    )
                    .await
                    .unwrap();
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let (client, response) = pending.await.unwrap();
        assert_eq!(response.request_id, 1);

        // Subscribe, then an event reaches the stream
        let subscribing = tokio::spawn(client.subscribe());
        match messages.recv().await.unwrap() {
            ServerMessage::Request { request, .. } => {
                assert!(matches!(request.command, Command::SubscribeEvents));
                server
                    .send_response(
                        &client_id,
                        Response::success(
                            request.request_id,
                            ResponsePayload::Subscribed {
                                client_id: client_id.clone(),
                            },
                        ),
                    )
                    .await
                    .unwrap();
            }
            other => panic!("unexpected message: {:?}", other),
        }
        let mut events = subscribing.await.unwrap().unwrap();

        // The subscriber stays connected after its ack
        assert_eq!(server.client_count().await, 1);

        server.broadcast_event(Event::new(EventPayload::Shutdown));
        let event = events.next().await.unwrap();
        assert!(matches!(event.payload, EventPayload::Shutdown));
    }

    #[tokio::test]
    async fn test_half_closed_client_still_gets_response() {
        use tokio::io::AsyncReadExt;

        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("half.sock");

        let mut server = IpcServer::new(&socket_path);
        server.start().await.unwrap();
        let server = Arc::new(server);
        let mut messages = server.take_message_receiver().await.unwrap();

        let accept = server.clone();
        tokio::spawn(async move {
            let _ = accept.run().await;
        });

        // Send one request, then shut the write side like `nc -N` would
        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let mut line = serde_json::to_string(&Request::new(7, Command::Ping)).unwrap();
        line.push('\n');
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.shutdown().await.unwrap();

        let client_id = match messages.recv().await.unwrap() {
            ServerMessage::ClientConnected { client_id, .. } => client_id,
            other => panic!("unexpected message: {:?}", other),
        };
        let request = match messages.recv().await.unwrap() {
            ServerMessage::Request { request, .. } => request,
            other => panic!("unexpected message: {:?}", other),
        };
        server
            .send_response(
                &client_id,
                Response::success(request.request_id, ResponsePayload::Pong),
            )
            .await
            .unwrap();

        // The answer arrives, then the server closes the connection
        let mut received = String::new();
        stream.read_to_string(&mut received).await.unwrap();
        let response: Response = serde_json::from_str(received.trim()).unwrap();
        assert_eq!(response.request_id, 7);

        match messages.recv().await.unwrap() {
            ServerMessage::ClientDisconnected { client_id: gone } => assert_eq!(gone, client_id),
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(server.client_count().await, 0);
    }
}
