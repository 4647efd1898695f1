// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, bail, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    cfg::enums::YesNo,
    client::transport::parse_target_address,
    models::common::MAX_DATA_SEGMENT_LENGTH,
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Where the session goes: portal, IQN and logical unit.
    pub target: TargetConfig,
    /// Identity and authentication presented during Login.
    #[serde(default)]
    pub login: LoginConfig,
    /// Implementation/runtime parameters that live outside the iSCSI protocol.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TargetConfig {
    #[serde(rename = "TargetName")]
    /// Target IQN.
    pub target_name: String,

    #[serde(rename = "TargetAddress")]
    /// `host`, `host:port`, `[v6]` or `[v6]:port`.
    pub target_address: String,

    #[serde(rename = "LUN", default = "default_lun")]
    /// Decimal or `0x` hex LUN number, or `enc<N>` for a pre-encoded value.
    pub lun: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct LoginConfig {
    #[serde(rename = "InitiatorName", default)]
    /// Initiator IQN; derived from the local address when absent.
    pub initiator_name: Option<String>,

    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(tag = "AuthMethod")]
/// Authentication configuration exposed through the Login AuthMethod key.
pub enum AuthConfig {
    #[default]
    #[serde(rename = "None")]
    None,
    #[serde(rename = "CHAP")]
    Chap(ChapConfig),
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// CHAP credentials used during challenge-response authentication.
pub struct ChapConfig {
    /// Username advertised via CHAP_N.
    pub username: String,
    /// Shared secret used to generate CHAP_R.
    pub secret: String,
    #[serde(default)]
    /// Name the target must present when authenticating back.
    pub target_username: Option<String>,
    #[serde(default)]
    /// Secret the target must prove when authenticating back.
    pub target_secret: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Runtime-only settings that do not map to RFC keys.
pub struct RuntimeConfig {
    #[serde(rename = "TimeoutMs", default = "default_timeout", with = "serde_millis")]
    /// Read timeout while a response is outstanding; also bounds connect.
    pub timeout: Duration,

    #[serde(rename = "WriteSplit", default = "default_write_split")]
    /// Upper bound for one outbound data segment.
    pub write_split: u32,

    #[serde(rename = "LoginRetries", default = "default_retries")]
    /// Login attempts after a transport drop before `attach` gives up.
    pub login_retries: u32,

    #[serde(rename = "SenseRetries", default = "default_retries")]
    /// Resubmissions of a command that completed with sense data.
    pub sense_retries: u32,

    #[serde(rename = "HostIPStack", default = "default_yes")]
    /// Run a dedicated I/O task; `No` drives the engine on the caller task.
    pub host_ip_stack: YesNo,

    #[serde(rename = "DumpMalformedPackets", default = "default_no")]
    /// Hex-dump PDUs that fail validation.
    pub dump_malformed_packets: YesNo,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            write_split: default_write_split(),
            login_retries: default_retries(),
            sense_retries: default_retries(),
            host_ip_stack: default_yes(),
            dump_malformed_packets: default_no(),
        }
    }
}

fn default_lun() -> String {
    "0".to_string()
}

fn default_timeout() -> Duration {
    Duration::from_millis(10_000)
}

fn default_write_split() -> u32 {
    MAX_DATA_SEGMENT_LENGTH
}

fn default_retries() -> u32 {
    10
}

fn default_yes() -> YesNo {
    YesNo::Yes
}

fn default_no() -> YesNo {
    YesNo::No
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        self.target.target_name = self.target.target_name.trim().to_string();
        self.target.target_address = self.target.target_address.trim().to_string();

        ensure!(!self.target.target_name.is_empty(), "TargetName must not be empty");
        parse_target_address(&self.target.target_address)
            .with_context(|| format!("bad TargetAddress {:?}", self.target.target_address))?;
        self.encoded_lun()?;

        if let Some(name) = &self.login.initiator_name {
            ensure!(!name.trim().is_empty(), "InitiatorName must not be blank");
        }
        if let AuthConfig::Chap(chap) = &self.login.auth {
            ensure!(!chap.username.is_empty(), "CHAP username must not be empty");
            ensure!(
                chap.target_username.is_some() == chap.target_secret.is_some(),
                "target CHAP needs both target_username and target_secret"
            );
        }

        ensure!(
            (1..=MAX_DATA_SEGMENT_LENGTH).contains(&self.runtime.write_split),
            "WriteSplit must be within 1..={MAX_DATA_SEGMENT_LENGTH}"
        );
        ensure!(!self.runtime.timeout.is_zero(), "TimeoutMs must be > 0");

        Ok(())
    }

    /// The 64-bit LUN field as sent in the BHS.
    ///
    /// Plain numbers up to 255 use peripheral device addressing, up to 16383
    /// flat space addressing; `enc<N>` passes `N` through untouched.
    pub fn encoded_lun(&self) -> Result<u64> {
        let raw = self.target.lun.trim();
        if let Some(enc) = raw.strip_prefix("enc") {
            return parse_u64_auto(enc)
                .with_context(|| format!("failed to convert LUN {raw:?} to integer"));
        }
        let lun = parse_u64_auto(raw)
            .with_context(|| format!("failed to convert LUN {raw:?} to integer"))?;
        match lun {
            0..=255 => Ok(lun << 48),
            256..=16383 => Ok((lun << 48) | (1 << 62)),
            _ => bail!("LUN number {lun} out of range (0-16383)"),
        }
    }

    /// `iscsi://<address>/<target>/<lun>`
    pub fn compose_location(&self) -> String {
        format!("iscsi://{}", self.compose_name())
    }

    /// `<address>/<target>/<lun>`
    pub fn compose_name(&self) -> String {
        format!(
            "{}/{}/{}",
            self.target.target_address, self.target.target_name, self.target.lun
        )
    }

    pub fn chap(&self) -> Option<&ChapConfig> {
        match &self.login.auth {
            AuthConfig::None => None,
            AuthConfig::Chap(c) => Some(c),
        }
    }
}

fn parse_u64_auto(s: &str) -> Result<u64> {
    let s = s.trim();
    Ok(match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16)?,
        None => s.parse::<u64>()?,
    })
}

/// Serde helpers for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
