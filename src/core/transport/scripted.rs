//! In-memory gateway driven by a script of expected commands and answers

use super::{Gateway, TransportError, TransportStats, TransportType, DEFAULT_TIMEOUT_MS};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Default)]
struct ScriptState {
    /// Reply chunks waiting to be read, one chunk per `read` call
    pending: VecDeque<Bytes>,
    /// Answers for commands in the order they are expected
    expected: VecDeque<(String, Vec<Bytes>)>,
    /// Answers for commands that may arrive at any time
    rules: Vec<(String, Vec<Bytes>)>,
    /// Everything written so far
    sent: Vec<String>,
    connected: bool,
    stats: TransportStats,
}

impl ScriptState {
    fn answer(&mut self, line: &str) {
        if let Some((cmd, _)) = self.expected.front() {
            if cmd == line {
                if let Some((_, chunks)) = self.expected.pop_front() {
                    self.pending.extend(chunks);
                }
                return;
            }
        }
        if let Some((_, chunks)) = self.rules.iter().find(|(cmd, _)| cmd == line) {
            self.pending.extend(chunks.iter().cloned());
        }
    }
}

/// Handle to inspect and extend the script of a [`ScriptedGateway`] after
/// the gateway has been handed over to a message layer.
#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    /// Queue a reply chunk that is returned on the next read
    pub fn push_reply(&self, chunk: impl Into<Bytes>) {
        self.state.lock().pending.push_back(chunk.into());
    }

    /// Expect `cmd` next and answer it with `answer`
    pub fn expect(&self, cmd: &str, answer: &str) {
        self.expect_chunks(cmd, &[answer]);
    }

    /// Expect `cmd` next and answer it with `chunks`, one chunk per read
    pub fn expect_chunks(&self, cmd: &str, chunks: &[&str]) {
        let chunks = chunks
            .iter()
            .map(|c| Bytes::copy_from_slice(c.as_bytes()))
            .collect();
        self.state
            .lock()
            .expected
            .push_back((cmd.to_string(), chunks));
    }

    /// Always answer `cmd` with `answer`
    pub fn on(&self, cmd: &str, answer: &str) {
        self.state.lock().rules.push((
            cmd.to_string(),
            vec![Bytes::copy_from_slice(answer.as_bytes())],
        ));
    }

    /// Lines written so far, without their line feed
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    /// Number of expected commands not sent yet
    pub fn unmet(&self) -> usize {
        self.state.lock().expected.len()
    }
}

/// In-memory gateway
///
/// Every line written is recorded and matched first against the ordered
/// expectations, then against the static rules. Matching answers are queued
/// as reply chunks; each `read` returns one chunk or nothing.
pub struct ScriptedGateway {
    state: Arc<Mutex<ScriptState>>,
    timeout_ms: u64,
}

impl ScriptedGateway {
    /// Create a connected gateway and the handle to drive it
    pub fn new() -> (Self, ScriptHandle) {
        let state = Arc::new(Mutex::new(ScriptState {
            connected: true,
            ..ScriptState::default()
        }));
        let handle = ScriptHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                state,
                timeout_ms: DEFAULT_TIMEOUT_MS,
            },
            handle,
        )
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connected = true;
        state.pending.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn connection_id(&self) -> i32 {
        if self.is_connected() {
            0
        } else {
            super::NO_CONNECTION
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.stats.bytes_sent += data.len() as u64;
        state.stats.packets_sent += 1;

        let text = String::from_utf8_lossy(data);
        for line in text.split_terminator('\n') {
            state.sent.push(line.to_string());
            state.answer(line);
        }
        Ok(())
    }

    async fn read(&mut self) -> Result<Bytes, TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let chunk = state.pending.pop_front().unwrap_or_default();
        if !chunk.is_empty() {
            state.stats.bytes_received += chunk.len() as u64;
            state.stats.packets_received += 1;
        }
        Ok(chunk)
    }

    async fn flush(&mut self) -> Result<(), TransportError> {
        self.state.lock().pending.clear();
        Ok(())
    }

    fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    fn set_timeout(&mut self, timeout_ms: u64) {
        self.timeout_ms = timeout_ms;
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Scripted
    }

    fn connection_info(&self) -> String {
        "scripted".to_string()
    }

    fn stats(&self) -> TransportStats {
        self.state.lock().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_expectations_in_order() {
        let (mut gateway, script) = ScriptedGateway::new();
        script.expect("POS? 1", "1=0.5\n");
        script.on("ERR?", "0\n");

        gateway.send(b"ERR?\n").await.unwrap();
        assert_eq!(&gateway.read().await.unwrap()[..], b"0\n");

        gateway.send(b"POS? 1\n").await.unwrap();
        assert_eq!(&gateway.read().await.unwrap()[..], b"1=0.5\n");
        assert!(gateway.read().await.unwrap().is_empty());
        assert_eq!(script.sent(), vec!["ERR?", "POS? 1"]);
        assert_eq!(script.unmet(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_gets_no_answer() {
        let (mut gateway, script) = ScriptedGateway::new();
        script.expect("POS? 1", "1=0.5\n");
        gateway.send(b"POS? 2\n").await.unwrap();
        assert!(gateway.read().await.unwrap().is_empty());
        assert_eq!(script.unmet(), 1);
    }

    #[tokio::test]
    async fn test_closed_gateway() {
        let (mut gateway, _script) = ScriptedGateway::new();
        gateway.close().await.unwrap();
        assert!(matches!(
            gateway.send(b"*IDN?\n").await,
            Err(TransportError::NotConnected)
        ));
        assert_eq!(gateway.connection_id(), super::super::NO_CONNECTION);
    }
}
