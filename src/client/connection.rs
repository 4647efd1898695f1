// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zerocopy::IntoBytes;

use crate::{
    cfg::config::Config,
    client::transport::Transport,
    error::{IscsiError, Result},
    models::{
        command::common::ScsiCommandResponseFlags,
        common::{BasicHeaderSegment, MAX_DATA_SEGMENT_LENGTH, RESERVED_TAG, ResponseHeader},
        login::status::StatusClass,
        nop::{request::NopOutRequestBuilder, response::NopInResponse},
        opcode::Opcode,
        pdu::InboundPdu,
        serial::{serial_greater, serial_less},
        validate::validate_pdu,
    },
    utils::{ISID_BASE, auto_initiator_name, dump_packet, isid_with_port},
};

/// Lifecycle of the session as seen by the initiator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Free,
    InLogin,
    Normal,
    InLogout,
}

/// Task tag and sequence-number bookkeeping (RFC 7143 § 4.2.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceState {
    pub itt: u32,
    pub cmd_sn: u32,
    pub exp_cmd_sn: u32,
    pub max_cmd_sn: u32,
    pub exp_stat_sn: u32,
    /// Set until the first Login Response seeds `exp_stat_sn`.
    pub first_recv_pdu: bool,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::login_start()
    }
}

impl SequenceState {
    /// Values every login starts from.
    pub const fn login_start() -> Self {
        Self {
            itt: 1,
            cmd_sn: 1,
            exp_cmd_sn: 0,
            max_cmd_sn: 1,
            exp_stat_sn: 0,
            first_recv_pdu: true,
        }
    }

    /// Hands out the next task tag, skipping the reserved value.
    pub fn new_itt(&mut self) -> u32 {
        let itt = self.itt;
        self.itt = self.itt.wrapping_add(1);
        if self.itt == RESERVED_TAG {
            self.itt = 0;
        }
        itt
    }

    /// Returns the CmdSN for a new non-immediate PDU and advances it.
    pub fn next_cmd_sn(&mut self) -> u32 {
        let sn = self.cmd_sn;
        self.cmd_sn = self.cmd_sn.wrapping_add(1);
        sn
    }

    /// Moves ExpCmdSN/MaxCmdSN forward; stale values are ignored.
    pub fn update_window(&mut self, hdr: &ResponseHeader) {
        let max = hdr.max_cmd_sn.get();
        let exp = hdr.exp_cmd_sn.get();
        if serial_less(self.max_cmd_sn, max) {
            self.max_cmd_sn = max;
        }
        if serial_less(self.exp_cmd_sn, exp) {
            self.exp_cmd_sn = exp;
        }
    }

    /// Whether a PDU numbered `cmd_sn` may go out now.
    #[inline]
    pub fn window_open(&self, cmd_sn: u32) -> bool {
        !serial_greater(cmd_sn, self.max_cmd_sn)
    }

    /// Checks StatSN against ExpStatSN and advances it.
    ///
    /// Data-In without status and non-success Login Responses carry no
    /// meaningful StatSN. R2T and target-initiated NOP-In do not consume one.
    pub fn acknowledge(&mut self, hdr: &ResponseHeader) -> Result<()> {
        if self.first_recv_pdu {
            return Ok(());
        }
        let opcode = hdr.opcode();
        match opcode {
            Some(Opcode::ScsiDataIn)
                if hdr.flags & ScsiCommandResponseFlags::S.bits() == 0 =>
            {
                return Ok(());
            },
            Some(Opcode::LoginResp)
                if StatusClass::from(hdr.opcode_specific[0]) != StatusClass::Success =>
            {
                return Ok(());
            },
            _ => {},
        }

        let stat_sn = hdr.stat_sn.get();
        if stat_sn != self.exp_stat_sn {
            return Err(IscsiError::parse(format!(
                "StatSN {stat_sn} while expecting {}",
                self.exp_stat_sn
            )));
        }
        let unsolicited_nop = opcode == Some(Opcode::NopIn) && hdr.itt() == RESERVED_TAG;
        if opcode != Some(Opcode::ReadyToTransfer) && !unsolicited_nop {
            self.exp_stat_sn = self.exp_stat_sn.wrapping_add(1);
        }
        Ok(())
    }
}

/// Per-session connection state: the socket plus everything negotiated or
/// numbered on it.
#[derive(Debug)]
pub struct Connection {
    pub(crate) transport: Transport,
    cfg: Arc<Config>,
    pub seq: SequenceState,
    pub state: SessionState,
    /// Current portal; replaced by login redirects.
    pub target_address: String,
    pub initiator_name: String,
    auto_initiator_name: bool,
    pub isid: u64,
    /// Encoded LUN placed into every SCSI Command.
    pub lun: u64,
    /// Largest data segment we may send, narrowed during login.
    pub send_len: u32,
    /// Largest data segment we accept.
    pub recv_len: u32,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(cfg: Arc<Config>, cancel: CancellationToken) -> Result<Self> {
        let lun = cfg
            .encoded_lun()
            .map_err(|e| IscsiError::MalformedValue(e.to_string()))?;
        let configured_name = cfg.login.initiator_name.clone();
        Ok(Self {
            transport: Transport::new(),
            seq: SequenceState::login_start(),
            state: SessionState::Free,
            target_address: cfg.target.target_address.clone(),
            auto_initiator_name: configured_name.is_none(),
            initiator_name: configured_name.unwrap_or_default(),
            isid: ISID_BASE,
            lun,
            send_len: MAX_DATA_SEGMENT_LENGTH.min(cfg.runtime.write_split),
            recv_len: MAX_DATA_SEGMENT_LENGTH,
            cfg,
            cancel,
        })
    }

    #[inline]
    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.cfg.runtime.timeout
    }

    #[inline]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Resolves the current portal and connects to it.
    pub async fn open(&mut self) -> Result<()> {
        let local = self
            .transport
            .open(&self.target_address, self.cfg.runtime.timeout, &self.cancel)
            .await?;
        self.on_connected(local);
        Ok(())
    }

    /// Reconnects to the portal resolved by the last [`Connection::open`].
    pub async fn reconnect(&mut self) -> Result<()> {
        let local = self
            .transport
            .connect(self.cfg.runtime.timeout, &self.cancel)
            .await?;
        self.on_connected(local);
        Ok(())
    }

    fn on_connected(&mut self, local: SocketAddr) {
        self.isid = isid_with_port(self.isid, local.port());
        if self.auto_initiator_name {
            self.initiator_name = auto_initiator_name(local.ip());
        }
        info!(
            "iSCSI: connect from initiator {} with source port {}",
            self.initiator_name,
            local.port()
        );
    }

    pub fn close(&mut self) {
        if self.transport.close() {
            info!(
                "iSCSI: disconnect from initiator {} with source port {}",
                self.initiator_name,
                self.isid & 0xffff
            );
        }
    }

    /// Writes one PDU, reconnecting first if the socket was closed.
    pub async fn send_pdu_blocking(&mut self, pdu: &[u8]) -> Result<()> {
        if !self.transport.is_connected() {
            self.reconnect().await?;
        }
        self.transport
            .blocking_write(pdu, self.cfg.runtime.timeout, &self.cancel)
            .await
    }

    /// Reads PDUs until one answers `itt`.
    ///
    /// Malformed or out-of-sequence PDUs are dumped and skipped, target
    /// pings are answered on the spot. Gives up after `LoginRetries` PDUs.
    pub async fn recv_pdu_blocking(&mut self, itt: u32) -> Result<InboundPdu> {
        for _ in 0..self.cfg.runtime.login_retries.max(1) {
            let pdu = self
                .transport
                .blocking_read(self.cfg.runtime.timeout, self.recv_len as usize, &self.cancel)
                .await?;
            let hdr = &pdu.header;

            if let Err(e) = validate_pdu(hdr) {
                self.dump_response(&pdu, &e);
                continue;
            }
            self.seq.update_window(hdr);
            if let Err(e) = self.seq.acknowledge(hdr) {
                self.dump_response(&pdu, &e);
                continue;
            }

            if itt != RESERVED_TAG && hdr.itt() == itt {
                return Ok(pdu);
            }
            if let Some(reply) = self.ping_reply(&pdu) {
                if let Err(e) = self.send_pdu_blocking(&reply).await {
                    warn!("failed to answer NOP-In ping: {e}");
                }
            }
        }
        Err(IscsiError::parse(format!("no response for ITT {itt:#x}")))
    }

    /// NOP-Out answering a target ping; CmdSN is carried but not consumed.
    pub fn ping_reply(&self, pdu: &InboundPdu) -> Option<Bytes> {
        let ping = NopInResponse::from_bhs_bytes(&pdu.bhs)
            .ok()
            .filter(|nop| nop.is_ping())?;
        let hdr = NopOutRequestBuilder::reply_to_ping(
            ping.lun.get(),
            ping.target_transfer_tag.get(),
        )
        .cmd_sn(self.seq.cmd_sn)
        .exp_stat_sn(self.seq.exp_stat_sn)
        .header;
        Some(Bytes::copy_from_slice(hdr.as_bytes()))
    }

    pub(crate) fn dump_response(&self, pdu: &InboundPdu, reason: &IscsiError) {
        if self.cfg.runtime.dump_malformed_packets.as_bool() {
            dump_packet(
                &self.cfg.target.target_name,
                false,
                &reason.to_string(),
                &pdu.segments(),
            );
        }
    }

    pub(crate) fn dump_request(&self, segments: &[&[u8]], reason: &str) {
        if self.cfg.runtime.dump_malformed_packets.as_bool() {
            dump_packet(&self.cfg.target.target_name, true, reason, segments);
        }
    }
}
