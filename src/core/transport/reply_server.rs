//! Mock GCS controller listening on TCP
//!
//! Received commands are compared with a FIFO queue of command/answer pairs,
//! then with a list of static pairs. A command counts as received once a
//! byte below 0x20 arrives. Unmatched queries are answered with the recorded
//! error text so clients do not run into their reply timeout.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct ServerState {
    queue: VecDeque<(String, String)>,
    statics: Vec<(String, String)>,
    rotate: bool,
    delay_ms: u64,
    error: Option<String>,
}

impl ServerState {
    fn set_error(&mut self, message: String) {
        tracing::error!("ReplyServer: {}", message);
        if self.error.is_none() {
            self.error = Some(message);
        }
    }

    fn from_queue(&mut self, rcv: &str) -> Option<String> {
        let (cmd, _) = self.queue.front()?;
        if cmd != rcv {
            return None;
        }
        let item = self.queue.pop_front()?;
        let answer = item.1.clone();
        if self.rotate {
            self.queue.push_back(item);
        }
        Some(answer)
    }

    fn from_static(&self, rcv: &str) -> Option<String> {
        self.statics
            .iter()
            .find(|(cmd, _)| cmd == rcv)
            .map(|(_, answer)| answer.clone())
    }
}

/// Mock controller; shut down when dropped
pub struct ReplyServer {
    addr: SocketAddr,
    state: Arc<Mutex<ServerState>>,
    cancel: CancellationToken,
}

fn with_eol(cmd: &str) -> String {
    match cmd.chars().last() {
        Some(c) if (c as u32) < 32 => cmd.to_string(),
        _ => format!("{cmd}\n"),
    }
}

impl ReplyServer {
    /// Listen on `addr`, e.g. `"127.0.0.1:0"` for any free port
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(ServerState::default()));
        let cancel = CancellationToken::new();

        tracing::debug!("ReplyServer: listening on {}", addr);
        tokio::spawn(accept_loop(listener, Arc::clone(&state), cancel.clone()));

        Ok(Self {
            addr,
            state,
            cancel,
        })
    }

    /// Address the server listens on
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Append a command/answer pair to the queue. A missing line feed on
    /// `cmd` is added.
    pub fn queue(&self, cmd: &str, answer: &str) {
        let mut state = self.state.lock();
        state.queue.push_back((with_eol(cmd), answer.to_string()));
        tracing::debug!("ReplyServer.queue: {:?} -> {:?} ({})", cmd, answer, state.queue.len());
    }

    /// Add a pair that is answered whenever it is received
    pub fn add_static(&self, cmd: &str, answer: &str) {
        self.state
            .lock()
            .statics
            .push((with_eol(cmd), answer.to_string()));
    }

    /// Keep answered queue items, moving them to the end of the queue
    pub fn set_rotate(&self, rotate: bool) {
        self.state.lock().rotate = rotate;
    }

    /// Delay before each answer line in milliseconds
    pub fn set_delay(&self, delay_ms: u64) {
        self.state.lock().delay_ms = delay_ms;
    }

    /// Drop all queued and static pairs
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.queue.clear();
        state.statics.clear();
    }

    /// First recorded mismatch, if any, and reset it
    pub fn take_error(&self) -> Option<String> {
        self.state.lock().error.take()
    }

    /// Ok if every queued command was received and nothing unexpected came in
    pub fn check(&self) -> Result<(), String> {
        let state = self.state.lock();
        if let Some(error) = &state.error {
            return Err(error.clone());
        }
        if !state.rotate && !state.queue.is_empty() {
            let pending: Vec<String> = state
                .queue
                .iter()
                .map(|(cmd, answer)| format!("{cmd:?} -> {answer:?}"))
                .collect();
            return Err(format!("queue is not empty: {}", pending.join(", ")));
        }
        Ok(())
    }

    /// Stop accepting and close all client connections
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for ReplyServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<ServerState>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!("ReplyServer: client {}", peer);
                    tokio::spawn(handle_client(stream, Arc::clone(&state), cancel.clone()));
                }
                Err(e) => {
                    tracing::warn!("ReplyServer: accept failed: {}", e);
                    break;
                }
            },
        }
    }
    tracing::debug!("ReplyServer: shutting down");
}

async fn handle_client(mut stream: TcpStream, state: Arc<Mutex<ServerState>>, cancel: CancellationToken) {
    let mut rcvbuf = String::new();
    let mut buffer = [0u8; 1024];
    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            read = stream.read(&mut buffer) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        for &byte in &buffer[..n] {
            rcvbuf.push(char::from(byte));
            if byte < 32 {
                let rcv = std::mem::take(&mut rcvbuf);
                if answer(&mut stream, &state, &rcv).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn answer(
    stream: &mut TcpStream,
    state: &Arc<Mutex<ServerState>>,
    rcv: &str,
) -> std::io::Result<()> {
    tracing::debug!("ReplyServer.receive: {:?}", rcv);
    let (reply, delay_ms) = {
        let mut state = state.lock();
        let reply = match state.from_queue(rcv).or_else(|| state.from_static(rcv)) {
            Some(reply) => reply,
            None => {
                let message = match state.queue.front() {
                    Some((cmd, _)) => format!("expected {cmd:?} but received {rcv:?}"),
                    None => format!("queue is empty but received {rcv:?}"),
                };
                state.set_error(message);
                if !rcv.contains('?') {
                    return Ok(());
                }
                format!("{}\n", state.error.clone().unwrap_or_default())
            }
        };
        (reply, state.delay_ms)
    };

    for line in reply.split_inclusive('\n') {
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        stream.write_all(line.as_bytes()).await?;
    }
    Ok(())
}
