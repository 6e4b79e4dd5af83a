use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tungstenite::{Message, WebSocket};

use crate::Result;

use super::RequestHandler;

/// How often idle threads check whether the server is shutting down.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Websocket server for the control protocol. Every connection is served by
/// its own thread; requests on one connection are answered in order.
pub struct ControlServer {
    local_addr: SocketAddr,
    stopped: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl ControlServer {
    /// Binds the listening socket and starts accepting connections.
    pub fn start(address: &str, port: u16, handler: Arc<RequestHandler>) -> Result<Self> {
        let listener = TcpListener::bind((address, port))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "control server listening");

        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let acceptor = thread::Builder::new()
            .name("control-accept".into())
            .spawn(move || accept_loop(listener, handler, flag))?;

        Ok(Self {
            local_addr,
            stopped,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Closes the listener and every open connection, then joins all threads.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.join().is_err() {
                tracing::error!("control server thread panicked");
            }
            tracing::info!(local_addr = %self.local_addr, "control server shut down");
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ControlServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlServer")
            .field("local_addr", &self.local_addr)
            .finish()
    }
}

fn accept_loop(listener: TcpListener, handler: Arc<RequestHandler>, stopped: Arc<AtomicBool>) {
    let mut connections: Vec<JoinHandle<()>> = Vec::new();

    while !stopped.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let handler = Arc::clone(&handler);
                let flag = Arc::clone(&stopped);
                let spawned = thread::Builder::new()
                    .name(format!("control-{peer}"))
                    .spawn(move || serve_connection(stream, peer, &handler, &flag));
                match spawned {
                    Ok(connection) => connections.push(connection),
                    Err(error) => tracing::error!(%peer, %error, "failed to spawn connection thread"),
                }
            }
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(error) => {
                tracing::error!(%error, "failed to accept control connection");
                thread::sleep(POLL_INTERVAL);
            }
        }
        connections.retain(|connection| !connection.is_finished());
    }

    for connection in connections {
        let _ = connection.join();
    }
}

fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    handler: &RequestHandler,
    stopped: &AtomicBool,
) {
    let mut websocket = match handshake(stream) {
        Ok(websocket) => websocket,
        Err(error) => {
            tracing::info!(%peer, %error, "connection closed during handshake");
            return;
        }
    };
    tracing::info!(%peer, "accepted control connection");

    while !stopped.load(Ordering::SeqCst) {
        match websocket.read() {
            Ok(Message::Text(request)) => {
                let response = handler.handle(request.as_str());
                if let Err(error) = websocket.send(Message::Text(response.into())) {
                    tracing::info!(%peer, %error, "connection closed");
                    return;
                }
            }
            Ok(Message::Binary(_)) => {
                tracing::warn!(%peer, "received binary data instead of JSON, closing connection");
                let _ = websocket.close(None);
                let _ = websocket.flush();
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(error)) if is_timeout(&error) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                tracing::info!(%peer, "connection closed by peer");
                return;
            }
            Err(error) => {
                tracing::info!(%peer, %error, "connection closed");
                return;
            }
        }
    }

    let _ = websocket.close(None);
    let _ = websocket.flush();
}

fn handshake(stream: TcpStream) -> io::Result<WebSocket<TcpStream>> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    let websocket = tungstenite::accept(stream)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    websocket.get_ref().set_read_timeout(Some(POLL_INTERVAL))?;
    Ok(websocket)
}

fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
