//! Mirror configuration.

use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use solana_commitment_config::CommitmentConfig;
use solana_pubkey::Pubkey;

use crate::{
    error::{ErrorInfo, MirrorError},
    subscription::SupervisorConfig,
};

pub const DEFAULT_PROGRAM_ID: &str = "G6EoTTTgpkNBtVXo96EQp2m6uwwVh2Kt6YidjkmQqoha";

/// How update channels are built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelMode {
    Polling {
        #[serde(default = "default_polling_frequency_ms")]
        frequency_ms: u64,
    },
    #[default]
    Websocket,
    Logs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Exchange program id, base58.
    #[serde(default = "default_program_id")]
    pub program_id: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    /// One of `processed`, `confirmed`, `finalized`.
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default)]
    pub channel: ChannelMode,
    /// Resubscribe after this much silence. Unset disables stall detection.
    #[serde(default)]
    pub resub_timeout_ms: Option<u64>,
    #[serde(default = "default_stall_check_interval_ms")]
    pub stall_check_interval_ms: u64,
}

fn default_program_id() -> String {
    DEFAULT_PROGRAM_ID.to_string()
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8899".to_string()
}

fn default_ws_url() -> String {
    "ws://127.0.0.1:8900".to_string()
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

fn default_polling_frequency_ms() -> u64 {
    1_000
}

fn default_stall_check_interval_ms() -> u64 {
    1_000
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            program_id: default_program_id(),
            rpc_url: default_rpc_url(),
            ws_url: default_ws_url(),
            commitment: default_commitment(),
            channel: ChannelMode::default(),
            resub_timeout_ms: None,
            stall_check_interval_ms: default_stall_check_interval_ms(),
        }
    }
}

impl MirrorConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, MirrorError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| MirrorError::InvalidConfig(format!("malformed config: {err}").into()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn program_id(&self) -> Result<Pubkey, MirrorError> {
        Pubkey::from_str(&self.program_id)
            .map_err(|err| MirrorError::InvalidConfig(format!("program_id {}: {err}", self.program_id).into()))
    }

    pub fn commitment(&self) -> Result<CommitmentConfig, MirrorError> {
        match self.commitment.as_str() {
            "processed" => Ok(CommitmentConfig::processed()),
            "confirmed" => Ok(CommitmentConfig::confirmed()),
            "finalized" => Ok(CommitmentConfig::finalized()),
            other => Err(MirrorError::InvalidConfig(format!("unknown commitment {other}").into())),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            resub_timeout: self.resub_timeout_ms.map(Duration::from_millis),
            check_interval: Duration::from_millis(self.stall_check_interval_ms),
        }
    }

    pub fn validate(&self) -> Result<(), MirrorError> {
        self.program_id()?;
        self.commitment()?;

        if self.rpc_url.is_empty() {
            return Err(MirrorError::InvalidConfig(ErrorInfo::StaticStr("rpc_url is empty")));
        }
        if !matches!(self.channel, ChannelMode::Polling { .. }) && self.ws_url.is_empty() {
            return Err(MirrorError::InvalidConfig(ErrorInfo::StaticStr(
                "ws_url is required for websocket and logs channels",
            )));
        }
        if let ChannelMode::Polling { frequency_ms: 0 } = self.channel {
            return Err(MirrorError::InvalidConfig(ErrorInfo::StaticStr("polling frequency must be non-zero")));
        }
        if self.resub_timeout_ms == Some(0) {
            return Err(MirrorError::InvalidConfig(ErrorInfo::StaticStr("resub_timeout_ms must be non-zero")));
        }
        if self.stall_check_interval_ms == 0 {
            return Err(MirrorError::InvalidConfig(ErrorInfo::StaticStr(
                "stall_check_interval_ms must be non-zero",
            )));
        }

        Ok(())
    }
}
