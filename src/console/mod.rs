//! Remote console: a TCP listener speaking length-prefixed text frames.
//!
//! Each accepted connection gets the welcome text, then runs its own
//! receive loop. Frames are handed to a [`ConsoleHandler`] in the order
//! they arrive on that connection.

use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::protocol::{read_frame, write_frame, FrameError, DISCONNECT, SHUTDOWN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a command came from. Only used to route the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote(ConnectionId),
}

#[async_trait]
pub trait ConsoleHandler: Send + Sync {
    /// Sent to every new connection before anything else.
    async fn welcome(&self) -> String;
    async fn on_command(&self, text: String, origin: Origin);
}

struct Connection {
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    token: CancellationToken,
}

struct Listening {
    token: CancellationToken,
    local_addr: SocketAddr,
}

#[derive(Default)]
struct Shared {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
}

impl Shared {
    async fn remove(&self, id: ConnectionId) {
        if let Some(conn) = self.connections.write().await.remove(&id) {
            conn.token.cancel();
            tracing::info!("Remote console client {} ({}) disconnected", id, conn.peer);
        }
    }

    async fn send(&self, id: ConnectionId, conn: &Connection, text: &str) -> bool {
        let result = {
            let mut writer = conn.writer.lock().await;
            write_frame(&mut *writer, text).await
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Write to remote console client {} failed: {}", id, e);
                self.remove(id).await;
                false
            }
        }
    }
}

pub struct RemoteConsoleServer {
    bind_addr: String,
    handler: Weak<dyn ConsoleHandler>,
    shared: Arc<Shared>,
    listening: Mutex<Option<Listening>>,
}

impl RemoteConsoleServer {
    pub fn new(ip: &str, port: u16, handler: Weak<dyn ConsoleHandler>) -> Self {
        Self {
            bind_addr: format!("{}:{}", ip, port),
            handler,
            shared: Arc::new(Shared::default()),
            listening: Mutex::new(None),
        }
    }

    /// Start accepting. `Ok(false)` if already running.
    pub async fn start(&self) -> anyhow::Result<bool> {
        let mut listening = self.listening.lock().await;
        if listening.is_some() {
            return Ok(false);
        }

        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind remote console on {}: {}", self.bind_addr, e))?;
        let local_addr = listener.local_addr()?;
        let token = CancellationToken::new();

        tokio::spawn(accept_loop(
            listener,
            token.clone(),
            self.shared.clone(),
            self.handler.clone(),
        ));

        tracing::info!("Remote console listening on {}", local_addr);
        *listening = Some(Listening { token, local_addr });
        Ok(true)
    }

    /// Send the shutdown notice, close every connection and stop accepting.
    /// `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(listening) = self.listening.lock().await.take() else {
            return false;
        };

        self.broadcast(SHUTDOWN).await;
        listening.token.cancel();

        let drained: Vec<(ConnectionId, Arc<Connection>)> =
            self.shared.connections.write().await.drain().collect();
        for (id, conn) in drained {
            conn.token.cancel();
            if let Err(e) = conn.writer.lock().await.shutdown().await {
                tracing::debug!("Closing remote console client {}: {}", id, e);
            }
        }
        tracing::info!("Remote console stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.listening.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.lock().await.as_ref().map(|l| l.local_addr)
    }

    pub async fn status_line(&self) -> String {
        if self.is_running().await {
            "[MCA] Status: Server running".to_string()
        } else {
            "[MCA] Status: No server running".to_string()
        }
    }

    /// One frame to every open connection. A connection whose write fails is
    /// dropped; the rest still get the text.
    pub async fn broadcast(&self, text: &str) {
        let targets: Vec<(ConnectionId, Arc<Connection>)> = self
            .shared
            .connections
            .read()
            .await
            .iter()
            .map(|(id, conn)| (*id, conn.clone()))
            .collect();

        for (id, conn) in targets {
            self.shared.send(id, &conn, text).await;
        }
    }

    /// `false` when the connection is gone or the write failed.
    pub async fn send_to(&self, id: ConnectionId, text: &str) -> bool {
        let conn = self.shared.connections.read().await.get(&id).cloned();
        match conn {
            Some(conn) => self.shared.send(id, &conn, text).await,
            None => false,
        }
    }

    pub async fn clients(&self) -> Vec<(ConnectionId, SocketAddr)> {
        let mut clients: Vec<_> = self
            .shared
            .connections
            .read()
            .await
            .iter()
            .map(|(id, conn)| (*id, conn.peer))
            .collect();
        clients.sort();
        clients
    }
}

async fn accept_loop(
    listener: TcpListener,
    token: CancellationToken,
    shared: Arc<Shared>,
    handler: Weak<dyn ConsoleHandler>,
) {
    loop {
        let accepted = tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("Remote console accept failed: {}", e);
                continue;
            }
        };

        let id = ConnectionId(shared.next_id.fetch_add(1, Ordering::Relaxed));
        tokio::spawn(serve_connection(
            id,
            stream,
            peer,
            token.child_token(),
            shared.clone(),
            handler.clone(),
        ));
    }
    tracing::debug!("Remote console accept loop stopped");
}

async fn serve_connection(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    token: CancellationToken,
    shared: Arc<Shared>,
    handler: Weak<dyn ConsoleHandler>,
) {
    let Some(h) = handler.upgrade() else { return };
    let (reader, mut writer) = stream.into_split();

    // welcome 먼저, 그 다음 broadcast 대상에 등록
    let welcome = h.welcome().await;
    drop(h);
    if let Err(e) = write_frame(&mut writer, &welcome).await {
        tracing::warn!("Failed to greet {}: {}", peer, e);
        return;
    }

    if token.is_cancelled() {
        return;
    }
    let conn = Arc::new(Connection {
        peer,
        writer: Mutex::new(writer),
        token: token.clone(),
    });
    shared.connections.write().await.insert(id, conn);
    tracing::info!("Remote console client {} connected from {}", id, peer);

    receive_loop(id, reader, token, shared, handler).await;
}

async fn receive_loop(
    id: ConnectionId,
    mut reader: OwnedReadHalf,
    token: CancellationToken,
    shared: Arc<Shared>,
    handler: Weak<dyn ConsoleHandler>,
) {
    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => return,
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(text) if text == DISCONNECT => break,
            Ok(text) => {
                tracing::debug!("Frame from {}: {}", id, text);
                let Some(h) = handler.upgrade() else { break };
                h.on_command(text, Origin::Remote(id)).await;
            }
            Err(FrameError::Closed) => break,
            Err(e) => {
                tracing::warn!("Dropping remote console client {}: {}", id, e);
                break;
            }
        }
    }
    shared.remove(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        commands: std::sync::Mutex<Vec<(String, Origin)>>,
    }

    #[async_trait]
    impl ConsoleHandler for Recorder {
        async fn welcome(&self) -> String {
            "Welcome to MCA!\nThere is currently no minecraft server running".to_string()
        }

        async fn on_command(&self, text: String, origin: Origin) {
            self.commands.lock().unwrap().push((text, origin));
        }
    }

    async fn start_server() -> (Arc<Recorder>, RemoteConsoleServer, SocketAddr) {
        let recorder = Arc::new(Recorder::default());
        let handler: Arc<dyn ConsoleHandler> = recorder.clone();
        let server = RemoteConsoleServer::new("127.0.0.1", 0, Arc::downgrade(&handler));
        assert!(server.start().await.unwrap());
        let addr = server.local_addr().await.unwrap();
        (recorder, server, addr)
    }

    async fn connect(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let welcome = read_frame(&mut stream).await.unwrap();
        assert!(welcome.starts_with("Welcome to MCA!\n"));
        stream
    }

    async fn wait_for_clients(server: &RemoteConsoleServer, n: usize) {
        for _ in 0..100 {
            if server.clients().await.len() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {} clients, have {}", n, server.clients().await.len());
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let (_rec, server, _addr) = start_server().await;
        assert!(!server.start().await.unwrap());
        assert!(server.is_running().await);
        assert_eq!(server.status_line().await, "[MCA] Status: Server running");

        assert!(server.stop().await);
        assert!(!server.stop().await);
        assert_eq!(server.status_line().await, "[MCA] Status: No server running");
    }

    #[tokio::test]
    async fn test_frames_in_order_with_origin() {
        let (rec, server, addr) = start_server().await;
        let mut stream = connect(addr).await;
        wait_for_clients(&server, 1).await;

        for cmd in ["status", "backup dir", "update"] {
            write_frame(&mut stream, cmd).await.unwrap();
        }
        write_frame(&mut stream, DISCONNECT).await.unwrap();
        wait_for_clients(&server, 0).await;

        let commands = rec.commands.lock().unwrap().clone();
        let texts: Vec<&str> = commands.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(texts, vec!["status", "backup dir", "update"]);
        assert!(commands.iter().all(|(_, o)| matches!(o, Origin::Remote(_))));
    }

    #[tokio::test]
    async fn test_broadcast_survives_disconnect() {
        let (_rec, server, addr) = start_server().await;
        let mut a = connect(addr).await;
        let b = connect(addr).await;
        let mut c = connect(addr).await;
        wait_for_clients(&server, 3).await;

        drop(b);
        for i in 0..5 {
            server.broadcast(&format!("line {}", i)).await;
        }

        for stream in [&mut a, &mut c] {
            for i in 0..5 {
                assert_eq!(read_frame(stream).await.unwrap(), format!("line {}", i));
            }
        }
        wait_for_clients(&server, 2).await;
    }

    #[tokio::test]
    async fn test_send_to_and_stop() {
        let (_rec, server, addr) = start_server().await;
        let mut a = connect(addr).await;
        let mut b = connect(addr).await;
        wait_for_clients(&server, 2).await;

        let clients = server.clients().await;
        assert!(server.send_to(clients[1].0, "only b").await);
        assert!(!server.send_to(ConnectionId(999), "nobody").await);
        assert_eq!(read_frame(&mut b).await.unwrap(), "only b");

        server.stop().await;
        assert_eq!(read_frame(&mut a).await.unwrap(), SHUTDOWN);
        assert_eq!(read_frame(&mut b).await.unwrap(), SHUTDOWN);
        assert!(server.clients().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_drops_only_that_connection() {
        let (_rec, server, addr) = start_server().await;
        let mut good = connect(addr).await;
        let mut bad = connect(addr).await;
        wait_for_clients(&server, 2).await;

        bad.write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();
        wait_for_clients(&server, 1).await;

        server.broadcast("still here").await;
        assert_eq!(read_frame(&mut good).await.unwrap(), "still here");
    }
}
