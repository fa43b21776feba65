//! Typed GCS commands
//!
//! A small set of commands built on [`GcsMessages`]: each formats its line
//! with [`CommandBuilder`], sends or reads it and converts the answer with
//! the parse helpers.

use super::command::{CommandBuilder, Dialect, DEFAULT_FLOAT_DIGITS};
use super::error::GcsError;
use super::messages::{BufState, GcsData, GcsMessages};
use super::parse::{gcs_header, one_item_dict, supported_commands, Key, KeyConv, Value, ValueConv};
use crate::config::SessionConfig;
use indexmap::IndexMap;
use std::time::{Duration, Instant};

/// Error raised by the controller when motion was stopped by `STP`
const STOPPED_BY_COMMAND: i32 = 10;

/// Command façade for one controller
pub struct GcsCommands {
    messages: GcsMessages,
    float_digits: usize,
    device_name: Option<String>,
}

fn keys(axes: &[&str]) -> Vec<Key> {
    axes.iter().map(|axis| Key::from(*axis)).collect()
}

/// Convert every entry of a one item answer with `convert`
fn typed<T>(
    answer: &str,
    axes: &[&str],
    valueconv: ValueConv,
    convert: impl Fn(&Value) -> Option<T>,
) -> Result<IndexMap<Key, T>, GcsError> {
    let items = keys(axes);
    let items = (!items.is_empty()).then_some(items.as_slice());
    one_item_dict(answer, items, KeyConv::Str, &[valueconv])?
        .into_iter()
        .map(|(key, entry)| {
            let value = entry.value().and_then(&convert).ok_or_else(|| {
                GcsError::Conversion(format!("unexpected value for {key}: {entry:?}"))
            })?;
            Ok((key, value))
        })
        .collect()
}

impl GcsCommands {
    /// Wrap a message layer
    pub fn new(messages: GcsMessages) -> Self {
        Self {
            messages,
            float_digits: DEFAULT_FLOAT_DIGITS,
            device_name: None,
        }
    }

    /// Open the connection described in `config`
    pub async fn open(config: &SessionConfig) -> Result<Self, GcsError> {
        let messages = GcsMessages::open(config).await?;
        Ok(Self::new(messages).float_digits(config.float_digits))
    }

    /// Significant digits for float arguments
    #[must_use]
    pub fn float_digits(mut self, digits: usize) -> Self {
        self.float_digits = digits;
        self
    }

    /// Underlying message layer
    pub fn messages(&mut self) -> &mut GcsMessages {
        &mut self.messages
    }

    /// Release the message layer
    pub fn into_messages(self) -> GcsMessages {
        self.messages
    }

    /// Device name from the last `*IDN?` answer
    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    fn cmd(&self, mnemonic: &str) -> CommandBuilder {
        CommandBuilder::new(mnemonic).float_digits(self.float_digits)
    }

    /// `*IDN?`: identification string. The device name found in it selects
    /// the protocol dialect.
    pub async fn qidn(&mut self) -> Result<String, GcsError> {
        let answer = self.messages.read("*IDN?").await?;
        if let Some(name) = answer.split(',').nth(1).map(str::trim) {
            let dialect = Dialect::from_device_name(name);
            tracing::debug!("GcsCommands: device {} speaks {}", name, dialect);
            self.messages.set_dialect(dialect);
            self.device_name = Some(name.to_string());
        }
        Ok(answer)
    }

    /// `ERR?`: current error code, read without the automatic error check
    pub async fn qerr(&mut self) -> Result<i32, GcsError> {
        let errcheck = self.messages.errcheck();
        self.messages.set_errcheck(false);
        let answer = self.messages.read("ERR?").await;
        self.messages.set_errcheck(errcheck);
        let answer = answer?;
        answer
            .trim()
            .parse()
            .map_err(|_| GcsError::UnexpectedResponse(format!("invalid answer on \"ERR?\": {answer:?}")))
    }

    /// `POS?`: current positions of `axes`, all axes if empty
    pub async fn qpos(&mut self, axes: &[&str]) -> Result<IndexMap<Key, f64>, GcsError> {
        let cmd = self.cmd("POS?").args(axes.iter().copied()).build();
        let answer = self.messages.read(&cmd).await?;
        typed(&answer, axes, ValueConv::Float, Value::as_f64)
    }

    /// `MOV`: move `axes` to absolute `targets`
    pub async fn mov(&mut self, axes: &[&str], targets: &[f64]) -> Result<(), GcsError> {
        let cmd = self.cmd("MOV").pairs(axes, targets)?.build();
        self.messages.send(&cmd).await
    }

    /// `MVR`: move `axes` relative by `distances`
    pub async fn mvr(&mut self, axes: &[&str], distances: &[f64]) -> Result<(), GcsError> {
        let cmd = self.cmd("MVR").pairs(axes, distances)?.build();
        self.messages.send(&cmd).await
    }

    /// `SVO`: switch servo control of `axes`
    pub async fn svo(&mut self, axes: &[&str], states: &[bool]) -> Result<(), GcsError> {
        let cmd = self.cmd("SVO").pairs(axes, states)?.build();
        self.messages.send(&cmd).await
    }

    /// `SVO?`: servo states of `axes`, all axes if empty
    pub async fn qsvo(&mut self, axes: &[&str]) -> Result<IndexMap<Key, bool>, GcsError> {
        let cmd = self.cmd("SVO?").args(axes.iter().copied()).build();
        let answer = self.messages.read(&cmd).await?;
        typed(&answer, axes, ValueConv::Bool, Value::as_bool)
    }

    /// `FRF?`: referencing result of `axes`, all axes if empty. GCS 1
    /// controllers do not accept `ERR?` here, so the error check is
    /// suspended for this query.
    pub async fn qfrf(&mut self, axes: &[&str]) -> Result<IndexMap<Key, bool>, GcsError> {
        let cmd = self.cmd("FRF?").args(axes.iter().copied()).build();
        let errcheck = self.messages.errcheck();
        if !self.messages.dialect().errcheck_while_referencing() {
            self.messages.set_errcheck(false);
        }
        let answer = self.messages.read(&cmd).await;
        self.messages.set_errcheck(errcheck);
        typed(&answer?, axes, ValueConv::Bool, Value::as_bool)
    }

    /// Poll `FRF?` until all `axes` are referenced
    pub async fn wait_on_referencing(
        &mut self,
        axes: &[&str],
        timeout: Duration,
        poll: Duration,
    ) -> Result<(), GcsError> {
        let started = Instant::now();
        while !self.qfrf(axes).await?.values().all(|referenced| *referenced) {
            if started.elapsed() > timeout {
                self.stp(true).await?;
                return Err(GcsError::Timeout(format!(
                    "referencing not finished after {:.1} s",
                    timeout.as_secs_f64()
                )));
            }
            tokio::time::sleep(poll).await;
        }
        Ok(())
    }

    /// `STP`: stop all axes. The controller answers with error 10, which
    /// is ignored if `noraise` is set.
    pub async fn stp(&mut self, noraise: bool) -> Result<(), GcsError> {
        match self.messages.send("STP").await {
            Err(e) if noraise && e.code() == Some(STOPPED_BY_COMMAND) => Ok(()),
            result => result,
        }
    }

    /// `HLP?`: help text
    pub async fn qhlp(&mut self) -> Result<String, GcsError> {
        self.messages.read("HLP?").await
    }

    /// Command mnemonics listed by `HLP?`
    pub async fn supported(&mut self) -> Result<Vec<String>, GcsError> {
        let answer = self.qhlp().await?;
        Ok(supported_commands(&answer, true))
    }

    /// `DRR?`: start reading `numvalues` rows of recorded data from
    /// `tables`, beginning at `offset`. Returns the parsed data header; the
    /// rows arrive in the background, see [`Self::wait_for_bulk`].
    pub async fn qdrr(
        &mut self,
        tables: &[i32],
        offset: u32,
        numvalues: u32,
    ) -> Result<IndexMap<String, Value>, GcsError> {
        if tables.is_empty() {
            return Err(GcsError::ParameterType("no record table given".to_string()));
        }
        let cmd = self
            .cmd("DRR?")
            .arg(i64::from(offset))
            .arg(i64::from(numvalues))
            .args(tables.iter().copied())
            .build();
        let rows = usize::try_from(numvalues)
            .map_err(|e| GcsError::ParameterType(format!("numvalues: {e}")))?;
        let header = self.messages.read_gcsdata(&cmd, GcsData::Rows(rows)).await?;
        Ok(gcs_header(&header))
    }

    /// Poll the bulk buffer every `poll` until it is complete and return
    /// its columns
    pub async fn wait_for_bulk(&mut self, poll: Duration) -> Result<Vec<Vec<f64>>, GcsError> {
        loop {
            match self.messages.bufstate()? {
                BufState::Ready => break,
                BufState::Partial(progress) => {
                    tracing::trace!("GcsCommands: {:.0} % of GCS data read", progress * 100.0);
                }
                BufState::NotReady => {}
            }
            tokio::time::sleep(poll).await;
        }
        Ok(self.messages.bufdata()?.to_vec())
    }
}
