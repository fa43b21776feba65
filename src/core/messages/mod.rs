//! GCS message layer
//!
//! Sends command lines over a [`Gateway`], collects replies until the EOL
//! rule says they are complete and optionally checks the controller's error
//! state after each command. Only one command is in flight per connection:
//! the gateway sits behind an async mutex, and a running bulk transfer holds
//! that mutex until its last row has been read.

mod bulk;

pub use bulk::{BufState, GcsData};

use crate::config::SessionConfig;
use crate::core::command::Dialect;
use crate::core::eol;
use crate::core::error::{codes, GcsError};
use crate::core::logger::CommLog;
use crate::core::transport::{open_gateway, Gateway, TransportError, TransportStats};
use bulk::BulkBuffer;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Gateway shared between the caller and the bulk reader
pub type SharedGateway = Arc<Mutex<Box<dyn Gateway>>>;

/// Marker line that ends a data header
pub const HEADER_END: &str = "# END_HEADER";

/// Pause between two empty reads
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// When a reply counts as received
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadUntil {
    /// A complete GCS answer
    Eol,
    /// At least one line feed, used for streamed rows
    Line,
    /// The header terminator, or a complete answer that is not a header
    Header,
}

impl ReadUntil {
    fn done(self, rcvbuf: &str) -> bool {
        match self {
            Self::Eol => eol::is_complete(rcvbuf),
            Self::Line => rcvbuf.contains('\n') || eol::is_complete(rcvbuf),
            Self::Header => {
                find_header_end(rcvbuf).is_some()
                    || (eol::is_complete(rcvbuf) && !last_line(rcvbuf).starts_with('#'))
            }
        }
    }
}

fn last_line(text: &str) -> &str {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.rsplit('\n').next().unwrap_or(text)
}

/// Byte offset just past the header terminator line, and whether data rows
/// follow it (the terminator line ends in space + line feed)
fn find_header_end(rcvbuf: &str) -> Option<(usize, bool)> {
    let start = rcvbuf.to_ascii_uppercase().find(HEADER_END)?;
    let lf = start + rcvbuf[start..].find('\n')?;
    Some((lf + 1, rcvbuf[..lf].ends_with(' ')))
}

/// Write `msg`, adding the line feed if it is missing. Single characters
/// such as `#5` are sent as they are.
async fn send_line(gateway: &mut dyn Gateway, log: &CommLog, msg: &str) -> Result<(), GcsError> {
    let mut tosend = msg.to_string();
    if tosend.len() > 1 && !tosend.ends_with('\n') {
        tosend.push('\n');
    }
    tracing::debug!("GcsMessages.send: {:?}", tosend);
    gateway.send(tosend.as_bytes()).await?;
    log.log_tx(&tosend);
    Ok(())
}

/// Send a data command and read its header. Returns the answer with the
/// offset behind `# END_HEADER` and whether rows follow.
async fn read_header(
    gateway: &mut dyn Gateway,
    log: &CommLog,
    cmd: &str,
) -> Result<(String, usize, bool), GcsError> {
    send_line(gateway, log, cmd).await?;
    let answer = read_reply(gateway, log, ReadUntil::Header).await?;
    if let Some((split, data_follows)) = find_header_end(&answer) {
        return Ok((answer, split, data_follows));
    }

    send_line(gateway, log, "ERR?\n").await?;
    let code = parse_error_code(&read_reply(gateway, log, ReadUntil::Eol).await?)?;
    let code = if code == codes::NO_ERROR {
        codes::PI_UNEXPECTED_RESPONSE
    } else {
        code
    };
    Err(GcsError::from_code(
        code,
        format!("no {HEADER_END:?} in answer to {:?}: {:?}", cmd.trim(), answer),
    ))
}

/// Poll the gateway until `until` is satisfied. Every chunk received
/// restarts the timeout.
pub(crate) async fn read_reply(
    gateway: &mut dyn Gateway,
    log: &CommLog,
    until: ReadUntil,
) -> Result<String, GcsError> {
    let timeout = Duration::from_millis(gateway.timeout());
    let mut rcvbuf = String::new();
    let mut deadline = Instant::now() + timeout;
    loop {
        let received = gateway.read().await?;
        if received.is_empty() {
            if Instant::now() > deadline {
                return Err(GcsError::Timeout(format!(
                    "no complete answer within {} ms, received {:?}",
                    timeout.as_millis(),
                    rcvbuf
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }
        rcvbuf.extend(received.iter().map(|&b| char::from(b)));
        deadline = Instant::now() + timeout;
        if until.done(&rcvbuf) {
            break;
        }
    }
    tracing::trace!("GcsMessages.read: {:?}", rcvbuf);
    log.log_rx(&rcvbuf);
    if until == ReadUntil::Eol {
        eol::check_no_inner_eol(&rcvbuf)?;
    }
    Ok(rcvbuf)
}

/// Parse the answer to `ERR?`
fn parse_error_code(answer: &str) -> Result<i32, GcsError> {
    answer.trim().parse().map_err(|_| {
        GcsError::UnexpectedResponse(format!("invalid answer on \"ERR?\": {answer:?}"))
    })
}

/// Read the controller's error code, sending `ERR?` first unless it was
/// already written together with the command
pub(crate) async fn query_error(
    gateway: &mut dyn Gateway,
    log: &CommLog,
    send: bool,
    context: &str,
) -> Result<(), GcsError> {
    if send {
        send_line(gateway, log, "ERR?\n").await?;
    }
    let answer = read_reply(gateway, log, ReadUntil::Eol).await?;
    match parse_error_code(&answer)? {
        codes::NO_ERROR => Ok(()),
        code => {
            tracing::debug!("GcsMessages: {:?} raised error {}", context, code);
            Err(GcsError::from_code(code, context))
        }
    }
}

/// Message layer of one controller connection
pub struct GcsMessages {
    gateway: SharedGateway,
    log: Arc<CommLog>,
    errcheck: bool,
    embederr: bool,
    dialect: Dialect,
    /// Copy of the gateway timeout, readable while a bulk transfer holds it
    timeout_ms: u64,
    bulk: BulkBuffer,
}

impl GcsMessages {
    /// Wrap a connected gateway with default settings
    pub fn new(gateway: Box<dyn Gateway>) -> Self {
        let timeout_ms = gateway.timeout();
        Self {
            gateway: Arc::new(Mutex::new(gateway)),
            log: Arc::new(CommLog::new()),
            errcheck: true,
            embederr: false,
            dialect: Dialect::default(),
            timeout_ms,
            bulk: BulkBuffer::new(),
        }
    }

    /// Wrap a connected gateway and apply `config`
    pub fn with_config(mut gateway: Box<dyn Gateway>, config: &SessionConfig) -> Result<Self, GcsError> {
        gateway.set_timeout(config.timeout_ms);
        let mut messages = Self::new(gateway);
        messages.errcheck = config.errcheck;
        messages.embederr = config.embederr;
        messages.dialect = config.dialect;
        messages.log.set_timestamps(config.log_timestamps);
        messages
            .set_logfile(config.logfile.as_deref())
            .map_err(|e| GcsError::from(TransportError::IoError(e)))?;
        Ok(messages)
    }

    /// Open the connection described in `config`
    pub async fn open(config: &SessionConfig) -> Result<Self, GcsError> {
        let transport = config
            .transport
            .clone()
            .ok_or_else(|| GcsError::NotConnected("no connection configured".to_string()))?;
        let gateway = open_gateway(transport).await?;
        Self::with_config(gateway, config)
    }

    /// Lock the gateway. While a bulk transfer owns it, its rows are taken
    /// from the channel so the reader can never block on a full channel.
    async fn acquire(&mut self) -> OwnedMutexGuard<Box<dyn Gateway>> {
        let lock = Arc::clone(&self.gateway).lock_owned();
        tokio::pin!(lock);
        loop {
            let Some(rx) = self.bulk.receiver() else {
                return lock.await;
            };
            let event = tokio::select! {
                guard = &mut lock => return guard,
                event = rx.recv() => event,
            };
            self.bulk.apply(event);
        }
    }

    /// Send `cmd` without reading an answer
    pub async fn send(&mut self, cmd: &str) -> Result<(), GcsError> {
        let embed = self.errcheck && self.embederr;
        let mut tosend = cmd.to_string();
        if embed {
            if tosend.len() > 1 && !tosend.ends_with('\n') {
                tosend.push('\n');
            }
            tosend.push_str("ERR?\n");
        }

        let mut gateway = self.acquire().await;
        send_line(&mut **gateway, &self.log, &tosend).await?;
        if self.errcheck {
            query_error(&mut **gateway, &self.log, !embed, cmd.trim()).await?;
        }
        Ok(())
    }

    /// Send `cmd` and return its complete answer
    pub async fn read(&mut self, cmd: &str) -> Result<String, GcsError> {
        let mut gateway = self.acquire().await;
        send_line(&mut **gateway, &self.log, cmd).await?;
        let answer = read_reply(&mut **gateway, &self.log, ReadUntil::Eol).await?;
        if self.errcheck {
            query_error(&mut **gateway, &self.log, true, cmd.trim()).await?;
        }
        Ok(answer)
    }

    /// Send `cmd`, return the data header and start reading the rows that
    /// follow in the background. Poll [`Self::bufstate`] for progress; the
    /// next command waits until the transfer has ended.
    pub async fn read_gcsdata(&mut self, cmd: &str, gcsdata: GcsData) -> Result<String, GcsError> {
        let mut gateway = self.acquire().await;
        self.bulk.reset(gcsdata);

        let (answer, split, data_follows) = match read_header(&mut **gateway, &self.log, cmd).await {
            Ok(header) => header,
            Err(e) => {
                self.bulk = BulkBuffer::new();
                return Err(e);
            }
        };

        let (header, rows) = answer.split_at(split);
        if data_follows {
            self.bulk
                .start(gateway, Arc::clone(&self.log), self.errcheck, rows.to_string());
        } else {
            tracing::debug!("GcsMessages: header announces no data");
            self.bulk.finish_empty();
        }
        Ok(header.to_string())
    }

    /// Progress of the current bulk transfer. Raises the first error the
    /// reader ran into, and `Timeout` while no row arrived for longer than
    /// the timeout.
    pub fn bufstate(&mut self) -> Result<BufState, GcsError> {
        self.bulk.state(Duration::from_millis(self.timeout_ms))
    }

    /// Values received so far, one vector per column
    pub fn bufdata(&mut self) -> Result<&[Vec<f64>], GcsError> {
        let data = self.bulk.data()?;
        tracing::trace!("GcsMessages.bufdata: {} columns", data.len());
        Ok(data)
    }

    /// Number of rows received so far
    pub fn bufindex(&mut self) -> usize {
        self.bulk.index()
    }

    /// Abandon a running bulk transfer. Rows received so far stay in
    /// [`Self::bufdata`]; unread input is discarded.
    pub async fn cancel_bulk(&mut self) -> Result<(), GcsError> {
        if !self.bulk.is_running() {
            return Ok(());
        }
        tracing::info!("GcsMessages: bulk transfer cancelled after {} rows", self.bulk.index());
        self.bulk.abort().await;
        let mut gateway = self.acquire().await;
        gateway.flush().await?;
        Ok(())
    }

    /// Reply timeout in milliseconds
    pub fn timeout(&self) -> u64 {
        self.timeout_ms
    }

    /// Set the reply timeout; waits for a running bulk transfer
    pub async fn set_timeout(&mut self, timeout_ms: u64) {
        let mut gateway = self.acquire().await;
        gateway.set_timeout(timeout_ms);
        self.timeout_ms = timeout_ms;
        tracing::debug!("GcsMessages.timeout: {} ms", timeout_ms);
    }

    /// Check the error state after each command
    pub fn errcheck(&self) -> bool {
        self.errcheck
    }

    /// Enable or disable the error check
    pub fn set_errcheck(&mut self, errcheck: bool) {
        self.errcheck = errcheck;
    }

    /// Send `ERR?` in the same write as the command
    pub fn embederr(&self) -> bool {
        self.embederr
    }

    /// Enable or disable the embedded error query
    pub fn set_embederr(&mut self, embederr: bool) {
        self.embederr = embederr;
    }

    /// Protocol dialect of the controller
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Set the protocol dialect
    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    /// Start logging to `path`, or stop with `None`
    pub fn set_logfile(&mut self, path: Option<&Path>) -> std::io::Result<()> {
        match path {
            Some(path) => self.log.start(path),
            None => {
                self.log.stop();
                Ok(())
            }
        }
    }

    /// Current communication log file
    pub fn logfile(&self) -> Option<PathBuf> {
        self.log.path()
    }

    /// Connection id, waits for a running bulk transfer
    pub async fn connection_id(&mut self) -> i32 {
        self.acquire().await.connection_id()
    }

    /// Check if connected, waits for a running bulk transfer
    pub async fn is_connected(&mut self) -> bool {
        self.acquire().await.is_connected()
    }

    /// Gateway statistics
    pub async fn stats(&mut self) -> TransportStats {
        self.acquire().await.stats()
    }

    /// Abandon any bulk transfer and close the connection
    pub async fn close(&mut self) -> Result<(), GcsError> {
        self.bulk.abort().await;
        let mut gateway = self.acquire().await;
        gateway.close().await?;
        self.log.flush();
        tracing::info!("GcsMessages: connection closed");
        Ok(())
    }
}

impl Drop for GcsMessages {
    fn drop(&mut self) {
        self.bulk.signal_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse::{one_item_dict, Key, KeyConv, Value, ValueConv};
    use crate::core::transport::{MockGateway, ScriptHandle, ScriptedGateway};

    fn scripted() -> (GcsMessages, ScriptHandle) {
        let (gateway, script) = ScriptedGateway::new();
        script.on("ERR?", "0\n");
        (GcsMessages::new(Box::new(gateway)), script)
    }

    async fn wait_ready(messages: &mut GcsMessages) -> Result<BufState, GcsError> {
        loop {
            match messages.bufstate()? {
                BufState::Ready => return Ok(BufState::Ready),
                _ => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
    }

    #[test]
    fn test_find_header_end() {
        let answer = "# DIM = 2\n# end_header \n1 2 \n";
        let (split, data) = find_header_end(answer).unwrap();
        assert_eq!(&answer[..split], "# DIM = 2\n# end_header \n");
        assert!(data);
        assert_eq!(find_header_end("# END_HEADER\n"), Some((13, false)));
        assert_eq!(find_header_end("# END_HEADER"), None);
        assert_eq!(find_header_end("# DIM = 2\n"), None);
    }

    #[test]
    fn test_header_stop_rule() {
        assert!(!ReadUntil::Header.done("# DIM = 2\n"));
        assert!(ReadUntil::Header.done("# DIM = 2\n# END_HEADER \n"));
        assert!(ReadUntil::Header.done("-1004\n"));
        assert!(!ReadUntil::Line.done("1.0 2."));
        assert!(ReadUntil::Line.done("1.0 2.0 \n3."));
    }

    #[tokio::test]
    async fn test_read_single_answer() {
        let (mut messages, script) = scripted();
        script.expect("ACC? 1", "1 = 5.0\n");

        let answer = messages.read("ACC? 1").await.unwrap();
        assert_eq!(answer, "1 = 5.0\n");
        assert_eq!(script.sent(), vec!["ACC? 1", "ERR?"]);

        let parsed = one_item_dict(
            "1 = 5.0 \n",
            Some(&[Key::from("1")]),
            KeyConv::Str,
            &[ValueConv::Float],
        )
        .unwrap();
        assert_eq!(parsed[&Key::from("1")].value(), Some(&Value::Float(5.0)));
    }

    #[tokio::test]
    async fn test_multi_line_answer_in_chunks() {
        let (mut messages, script) = scripted();
        messages.set_errcheck(false);
        script.expect_chunks("POS?", &["1=1.0 \n2=", "2.0 \n", "3=3.0\n"]);

        let answer = messages.read("POS?").await.unwrap();
        assert_eq!(answer, "1=1.0 \n2=2.0 \n3=3.0\n");
        assert_eq!(script.sent(), vec!["POS?"]);
    }

    #[tokio::test]
    async fn test_inner_eol_is_rejected() {
        let (mut messages, script) = scripted();
        messages.set_errcheck(false);
        script.expect_chunks("POS?", &["1=1.0\n2=2.0\n"]);
        assert!(matches!(
            messages.read("POS?").await,
            Err(GcsError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_send_raises_device_error() {
        let (gateway, script) = ScriptedGateway::new();
        script.expect("MOV 1 2.0", "");
        script.expect("ERR?", "10\n");
        let mut messages = GcsMessages::new(Box::new(gateway));

        let err = messages.send("MOV 1 2.0").await.unwrap_err();
        assert_eq!(err.code(), Some(10));
        assert!(err.to_string().contains("MOV 1 2.0"));
        assert_eq!(script.sent(), vec!["MOV 1 2.0", "ERR?"]);
    }

    #[tokio::test]
    async fn test_invalid_error_answer() {
        let (gateway, script) = ScriptedGateway::new();
        script.on("ERR?", "hello\n");
        let mut messages = GcsMessages::new(Box::new(gateway));
        assert!(matches!(
            messages.send("SVO 1 1").await,
            Err(GcsError::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_embedded_error_query() {
        let (gateway, script) = ScriptedGateway::new();
        script.on("ERR?", "0\n");
        let mut messages = GcsMessages::new(Box::new(gateway));
        messages.set_embederr(true);

        messages.send("MOV 1 2").await.unwrap();
        assert_eq!(script.sent(), vec!["MOV 1 2", "ERR?"]);

        messages.set_errcheck(false);
        messages.send("MOV 1 3").await.unwrap();
        assert_eq!(script.sent(), vec!["MOV 1 2", "ERR?", "MOV 1 3"]);
    }

    #[tokio::test]
    async fn test_single_character_command_has_no_line_feed() {
        let (mut messages, _script) = scripted();
        messages.set_errcheck(false);
        let gateway = Arc::clone(&messages.gateway);

        messages.send("\x18").await.unwrap();
        assert_eq!(gateway.lock().await.stats().bytes_sent, 1);
    }

    #[tokio::test]
    async fn test_single_character_command_with_embedded_error_query() {
        let (gateway, script) = ScriptedGateway::new();
        script.on("\x18ERR?", "0\n");
        let mut messages = GcsMessages::new(Box::new(gateway));
        messages.set_embederr(true);
        let gateway = Arc::clone(&messages.gateway);

        messages.send("\x18").await.unwrap();
        assert_eq!(script.sent(), vec!["\x18ERR?"]);
        assert_eq!(gateway.lock().await.stats().bytes_sent, 6);
    }

    #[tokio::test]
    async fn test_read_times_out() {
        let (gateway, _script) = ScriptedGateway::new();
        let mut messages = GcsMessages::new(Box::new(gateway));
        messages.set_timeout(50).await;

        let started = std::time::Instant::now();
        let err = messages.read("POS?").await.unwrap_err();
        assert!(err.is_timeout());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let mut gateway = MockGateway::new();
        gateway.expect_timeout().return_const(7000u64);
        gateway
            .expect_send()
            .returning(|_| Err(TransportError::SendError("cable unplugged".into())));
        let mut messages = GcsMessages::new(Box::new(gateway));

        let err = messages.send("SVO 1 1").await.unwrap_err();
        assert!(matches!(err, GcsError::SendError(_)));
    }

    #[tokio::test]
    async fn test_bulk_read() {
        let (mut messages, script) = scripted();
        script.expect_chunks(
            "DRR? 1 3 1",
            &[
                "# DIM = 2\n# NDATA = 3\n# END_HEADER \n",
                "1.0 2.0 \n",
                "3.0 4.0 \n",
                "5.0 6.0\n",
            ],
        );

        let header = messages
            .read_gcsdata("DRR? 1 3 1", GcsData::Rows(3))
            .await
            .unwrap();
        assert_eq!(header, "# DIM = 2\n# NDATA = 3\n# END_HEADER \n");

        assert_eq!(wait_ready(&mut messages).await.unwrap(), BufState::Ready);
        assert_eq!(
            messages.bufdata().unwrap(),
            &[vec![1.0, 3.0, 5.0], vec![2.0, 4.0, 6.0]]
        );
        assert_eq!(messages.bufindex(), 3);
        assert_eq!(messages.bufstate().unwrap(), BufState::Ready);
        assert_eq!(messages.bufstate().unwrap(), BufState::Ready);
        assert_eq!(script.sent(), vec!["DRR? 1 3 1", "ERR?"]);
    }

    #[tokio::test]
    async fn test_bulk_rows_in_header_chunk() {
        let (mut messages, script) = scripted();
        script.expect_chunks("DRR?", &["# END_HEADER \n1 2 \n3 4\n"]);

        let header = messages.read_gcsdata("DRR?", GcsData::Unknown).await.unwrap();
        assert_eq!(header, "# END_HEADER \n");
        wait_ready(&mut messages).await.unwrap();
        assert_eq!(messages.bufdata().unwrap(), &[vec![1.0, 3.0], vec![2.0, 4.0]]);
    }

    #[tokio::test]
    async fn test_row_count_boundaries() {
        for (rows, expected) in [(2, "few"), (3, "ok"), (4, "many")] {
            let (mut messages, script) = scripted();
            let mut chunks = vec!["# END_HEADER \n".to_string()];
            for i in 1..=rows {
                let eol = if i == rows { "\n" } else { " \n" };
                chunks.push(format!("{i}.0{eol}"));
            }
            let chunks: Vec<&str> = chunks.iter().map(String::as_str).collect();
            script.expect_chunks("DRR?", &chunks);

            messages.read_gcsdata("DRR?", GcsData::Rows(3)).await.unwrap();
            let state = wait_ready(&mut messages).await;
            match expected {
                "few" => assert!(matches!(state, Err(GcsError::TooFewData(_)))),
                "many" => assert!(matches!(state, Err(GcsError::TooManyData(_)))),
                _ => assert_eq!(state.unwrap(), BufState::Ready),
            }
        }
    }

    #[tokio::test]
    async fn test_column_mismatch_is_sticky() {
        let (mut messages, script) = scripted();
        script.expect_chunks("DRR?", &["# END_HEADER \n1 2 \n3 \n5 6\n"]);

        messages.read_gcsdata("DRR?", GcsData::Unknown).await.unwrap();
        let first = wait_ready(&mut messages).await.unwrap_err();
        assert!(matches!(first, GcsError::UnexpectedResponse(_)));
        assert_eq!(messages.bufstate().unwrap_err(), first);
        assert_eq!(messages.bufdata().unwrap_err(), first);
    }

    #[tokio::test]
    async fn test_header_without_data() {
        let (mut messages, script) = scripted();
        script.expect("DRR? 9", "# NDATA = 0\n# END_HEADER\n");

        messages.read_gcsdata("DRR? 9", GcsData::Unknown).await.unwrap();
        assert_eq!(messages.bufstate().unwrap(), BufState::Ready);
        assert!(messages.bufdata().unwrap().is_empty());
        assert_eq!(script.sent(), vec!["DRR? 9"]);
    }

    #[tokio::test]
    async fn test_missing_header_queries_error() {
        let (gateway, script) = ScriptedGateway::new();
        script.expect("DRR? 1", "-1004\n");
        script.expect("ERR?", "15\n");
        let mut messages = GcsMessages::new(Box::new(gateway));
        let err = messages.read_gcsdata("DRR? 1", GcsData::Unknown).await.unwrap_err();
        assert_eq!(err.code(), Some(15));

        script.expect("DRR? 1", "garbage\n");
        script.expect("ERR?", "0\n");
        let err = messages.read_gcsdata("DRR? 1", GcsData::Unknown).await.unwrap_err();
        assert!(matches!(err, GcsError::UnexpectedResponse(_)));
        assert_eq!(messages.bufstate().unwrap(), BufState::NotReady);
    }

    #[tokio::test]
    async fn test_next_command_waits_for_bulk() {
        let (mut messages, script) = scripted();
        script.expect_chunks("DRR?", &["# END_HEADER \n", "1 \n", "2 \n", "3\n"]);
        script.expect("POS? 1", "1=0\n");

        messages.read_gcsdata("DRR?", GcsData::Rows(3)).await.unwrap();
        assert_eq!(messages.read("POS? 1").await.unwrap(), "1=0\n");
        assert_eq!(messages.bufstate().unwrap(), BufState::Ready);
        assert_eq!(messages.bufdata().unwrap(), &[vec![1.0, 2.0, 3.0]]);
        assert_eq!(script.sent(), vec!["DRR?", "ERR?", "POS? 1", "ERR?"]);
    }

    #[tokio::test]
    async fn test_stalled_bulk_read() {
        let (mut messages, script) = scripted();
        messages.set_timeout(30).await;
        script.expect_chunks("DRR?", &["# END_HEADER \n", "1 \n"]);

        messages.read_gcsdata("DRR?", GcsData::Rows(10)).await.unwrap();
        let err = loop {
            match messages.bufstate() {
                Ok(_) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(e) => break e,
            }
        };
        assert!(err.is_timeout() || matches!(err, GcsError::GcsDataRead(_)));
        assert_eq!(messages.bufindex(), 1);
    }

    #[tokio::test]
    async fn test_failed_header_leaves_buffer_not_ready() {
        let (mut messages, script) = scripted();
        messages.set_timeout(30).await;

        let err = messages
            .read_gcsdata("DRR? 1 3 1", GcsData::Rows(3))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(messages.bufstate().unwrap(), BufState::NotReady);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(messages.bufstate().unwrap(), BufState::NotReady);
        assert_eq!(messages.bufindex(), 0);
        assert_eq!(script.sent(), vec!["DRR? 1 3 1"]);
    }

    #[tokio::test]
    async fn test_bulk_trailing_error_is_sticky() {
        let (gateway, script) = ScriptedGateway::new();
        script.expect_chunks("DRR? 1 2 1", &["# END_HEADER \n", "1.0 2.0 \n", "3.0 4.0\n"]);
        script.expect("ERR?", "57\n");
        let mut messages = GcsMessages::new(Box::new(gateway));

        messages
            .read_gcsdata("DRR? 1 2 1", GcsData::Rows(2))
            .await
            .unwrap();
        let err = wait_ready(&mut messages).await.unwrap_err();
        assert_eq!(err.code(), Some(57));
        assert_eq!(messages.bufstate().unwrap_err().code(), Some(57));
        assert_eq!(messages.bufindex(), 2);
        assert_eq!(script.sent(), vec!["DRR? 1 2 1", "ERR?"]);
    }

    #[tokio::test]
    async fn test_bulk_without_errcheck_skips_error_query() {
        let (mut messages, script) = scripted();
        messages.set_errcheck(false);
        script.expect_chunks("DRR? 1 2 1", &["# END_HEADER \n", "1.0 2.0 \n", "3.0 4.0\n"]);

        messages
            .read_gcsdata("DRR? 1 2 1", GcsData::Rows(2))
            .await
            .unwrap();
        assert_eq!(wait_ready(&mut messages).await.unwrap(), BufState::Ready);
        assert_eq!(messages.bufdata().unwrap(), &[vec![1.0, 3.0], vec![2.0, 4.0]]);
        assert_eq!(script.sent(), vec!["DRR? 1 2 1"]);
    }

    #[tokio::test]
    async fn test_cancel_bulk() {
        let (mut messages, script) = scripted();
        script.expect_chunks("DRR?", &["# END_HEADER \n", "1 \n"]);
        script.expect("POS? 1", "1=0\n");

        messages.read_gcsdata("DRR?", GcsData::Unknown).await.unwrap();
        while messages.bufindex() < 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        messages.cancel_bulk().await.unwrap();
        assert_eq!(messages.bufstate().unwrap(), BufState::NotReady);
        assert_eq!(messages.bufdata().unwrap(), &[vec![1.0]]);
        assert_eq!(messages.read("POS? 1").await.unwrap(), "1=0\n");
    }

    #[tokio::test]
    async fn test_logfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comm.log");
        let (mut messages, script) = scripted();
        script.expect("POS? 1", "1=0.5\n");

        messages.set_logfile(Some(&path)).unwrap();
        assert_eq!(messages.logfile().as_deref(), Some(path.as_path()));
        messages.read("POS? 1").await.unwrap();
        messages.set_logfile(None).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "POS? 1\n  1=0.5\nERR?\n  0\n");
    }

    #[tokio::test]
    async fn test_close() {
        let (mut messages, _script) = scripted();
        assert!(messages.is_connected().await);
        assert_eq!(messages.connection_id().await, 0);
        messages.close().await.unwrap();
        assert!(!messages.is_connected().await);
        assert!(matches!(
            messages.send("SVO 1 1").await,
            Err(GcsError::NotConnected(_))
        ));
    }
}
