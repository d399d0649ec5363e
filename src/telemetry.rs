//! Decoding of the simulator's side-channel info string.
//!
//! The simulator reports one line per step made of `key=value` tokens
//! separated by whitespace, e.g. `tx_rate=10.0 reward_0=1.0 delay=0.02`.
//! Keys of the form `reward_<index>` carry per-agent rewards; every other
//! key is a common field shared by all agents of the step.

use crate::error::{EnvError, Result};
use std::collections::BTreeMap;
use tracing::warn;

pub const REWARD_PREFIX: &str = "reward_";

/// Expected shape of a telemetry line. Only used to flag unknown keys;
/// values are never dropped because of it.
#[derive(Debug, Clone)]
pub struct TelemetrySchema {
    common_fields: Vec<String>,
    reward_prefix: String,
}

impl TelemetrySchema {
    pub fn new<I, S>(common_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            common_fields: common_fields.into_iter().map(Into::into).collect(),
            reward_prefix: REWARD_PREFIX.to_string(),
        }
    }

    pub fn common_fields(&self) -> &[String] {
        &self.common_fields
    }

    pub fn is_known(&self, key: &str) -> bool {
        self.common_fields.iter().any(|f| f == key)
    }

    /// `reward_<digits>` -> agent index. Anything else (including a bare
    /// `reward` or `reward_x`) is not a reward key. A reward key whose
    /// index does not fit a `usize` is malformed.
    pub fn reward_index(&self, key: &str) -> Result<Option<usize>> {
        let Some(digits) = key.strip_prefix(self.reward_prefix.as_str()) else {
            return Ok(None);
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        digits.parse::<usize>().map(Some).map_err(|_| EnvError::Parse {
            token: key.to_string(),
            reason: "agent index out of range".to_string(),
        })
    }
}

impl Default for TelemetrySchema {
    fn default() -> Self {
        Self::new(["tx_rate", "delay", "loss_rate", "throughput"])
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryRecord {
    common: BTreeMap<String, f64>,
    rewards: BTreeMap<usize, f64>,
}

impl TelemetryRecord {
    pub fn common_fields(&self) -> &BTreeMap<String, f64> {
        &self.common
    }

    pub fn agent_rewards(&self) -> &BTreeMap<usize, f64> {
        &self.rewards
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.common.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.common.is_empty() && self.rewards.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryParser {
    schema: TelemetrySchema,
    debug: bool,
}

impl TelemetryParser {
    pub fn new(schema: TelemetrySchema, debug: bool) -> Self {
        Self { schema, debug }
    }

    pub fn schema(&self) -> &TelemetrySchema {
        &self.schema
    }

    pub fn parse(&self, raw: &str) -> Result<TelemetryRecord> {
        let mut record = TelemetryRecord::default();

        for token in raw.split_whitespace() {
            let (key, value) = split_token(token)?;

            // Duplicate keys: last one wins
            if let Some(index) = self.schema.reward_index(key)? {
                record.rewards.insert(index, value);
                continue;
            }

            if self.debug && !self.schema.is_known(key) {
                warn!("Unknown telemetry key {:?} (value {})", key, value);
            }
            record.common.insert(key.to_string(), value);
        }

        Ok(record)
    }
}

/// Parse with the default schema and no unknown-key reporting.
pub fn parse(raw: &str) -> Result<TelemetryRecord> {
    TelemetryParser::default().parse(raw)
}

fn split_token(token: &str) -> Result<(&str, f64)> {
    let malformed = |reason: &str| EnvError::Parse {
        token: token.to_string(),
        reason: reason.to_string(),
    };

    let (key, value) = token.split_once('=').ok_or_else(|| malformed("missing '='"))?;
    if key.is_empty() {
        return Err(malformed("empty key"));
    }
    let value: f64 = value
        .parse()
        .map_err(|_| malformed("value is not a number"))?;

    Ok((key, value))
}
