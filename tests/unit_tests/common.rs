// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scripted loopback target used by the login and engine tests.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, ensure};
use iscsi_initiator_rs::{
    cfg::config::{AuthConfig, Config, LoginConfig, RuntimeConfig, TargetConfig},
    models::{
        command::response::ScsiCommandResponse,
        common::{HEADER_LEN, RESERVED_TAG, encode_data_length, pad_len},
        data::response::ScsiDataIn,
        login::{common::RawLoginFlags, response::LoginResponse},
        logout::response::LogoutResponse,
        nop::response::NopInResponse,
        opcode::RawBhsOpcode,
        text::codec::get_key_value,
    },
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use zerocopy::IntoBytes;

pub const TARGET_NAME: &str = "iqn.2004-04.com.example:storage.disk1";

pub const OP_SCSI_CMD: u8 = 0x01;
pub const OP_LOGIN_REQ: u8 = 0x03;
pub const OP_LOGOUT_REQ: u8 = 0x06;
pub const OP_NOP_OUT: u8 = 0x00;

/// Config pointing at `addr` with a short timeout.
pub fn test_config(addr: &str) -> Config {
    Config {
        target: TargetConfig {
            target_name: TARGET_NAME.to_string(),
            target_address: addr.to_string(),
            lun: "0".to_string(),
        },
        login: LoginConfig {
            initiator_name: Some("iqn.2009-08.org.example:test".to_string()),
            auth: AuthConfig::None,
        },
        runtime: RuntimeConfig {
            timeout: Duration::from_millis(2000),
            login_retries: 3,
            ..Default::default()
        },
    }
}

pub fn arc(cfg: Config) -> Arc<Config> {
    Arc::new(cfg)
}

pub async fn listen() -> Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();
    Ok((listener, addr))
}

/// One PDU as seen by the target.
#[derive(Debug, Clone)]
pub struct Pdu {
    pub bhs: [u8; HEADER_LEN],
    pub data: Vec<u8>,
}

impl Pdu {
    pub fn opcode(&self) -> u8 {
        self.bhs[0] & 0x3f
    }

    pub fn immediate(&self) -> bool {
        self.bhs[0] & 0x40 != 0
    }

    fn word(&self, at: usize) -> u32 {
        u32::from_be_bytes([
            self.bhs[at],
            self.bhs[at + 1],
            self.bhs[at + 2],
            self.bhs[at + 3],
        ])
    }

    pub fn itt(&self) -> u32 {
        self.word(16)
    }

    pub fn ttt(&self) -> u32 {
        self.word(20)
    }

    pub fn cmd_sn(&self) -> u32 {
        self.word(24)
    }

    pub fn exp_stat_sn(&self) -> u32 {
        self.word(28)
    }

    /// ExpectedDataTransferLength of a SCSI Command.
    pub fn edtl(&self) -> u32 {
        self.word(20)
    }

    pub fn csg(&self) -> u8 {
        (self.bhs[1] >> 2) & 0x3
    }

    pub fn nsg(&self) -> u8 {
        self.bhs[1] & 0x3
    }

    pub fn transit(&self) -> bool {
        self.bhs[1] & 0x80 != 0
    }

    pub fn key(&self, key: &str) -> Option<String> {
        get_key_value(&self.data, key).ok().map(str::to_string)
    }
}

/// Target side of one TCP connection.
pub struct FakeTarget {
    pub stream: TcpStream,
    pub stat_sn: u32,
    pub exp_cmd_sn: u32,
    /// Added to ExpCmdSN - 1 to form MaxCmdSN.
    pub window: u32,
    /// Login requests seen in the Security stage.
    pub security_rounds: u32,
}

impl FakeTarget {
    pub async fn accept(listener: &TcpListener) -> Result<Self> {
        let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
            .await
            .context("no connection from the initiator")??;
        Ok(Self {
            stream,
            stat_sn: 0x100,
            exp_cmd_sn: 1,
            window: 32,
            security_rounds: 0,
        })
    }

    pub fn max_cmd_sn(&self) -> u32 {
        self.exp_cmd_sn.wrapping_add(self.window).wrapping_sub(1)
    }

    pub async fn recv(&mut self) -> Result<Pdu> {
        let mut bhs = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut bhs).await?;
        let ahs = bhs[4] as usize * 4;
        let len = u32::from_be_bytes([0, bhs[5], bhs[6], bhs[7]]) as usize;
        let mut body = vec![0u8; ahs + len + pad_len(len)];
        self.stream.read_exact(&mut body).await?;
        let data = body[ahs..ahs + len].to_vec();
        Ok(Pdu { bhs, data })
    }

    /// Receives the next PDU, answering NOP-Out pings on the way.
    pub async fn recv_op(&mut self, opcode: u8) -> Result<Pdu> {
        loop {
            let pdu = self.recv().await?;
            if pdu.opcode() == opcode {
                return Ok(pdu);
            }
            ensure!(
                pdu.opcode() == OP_NOP_OUT,
                "expected opcode {opcode:#04x}, got {:#04x}",
                pdu.opcode()
            );
        }
    }

    /// Ensures nothing arrives for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) -> Result<()> {
        let mut probe = [0u8; 1];
        match timeout(wait, self.stream.peek(&mut probe)).await {
            Err(_) => Ok(()),
            Ok(Ok(0)) => anyhow::bail!("initiator closed the connection"),
            Ok(res) => anyhow::bail!("unexpected traffic: {res:?}"),
        }
    }

    pub async fn send(&mut self, bhs: &[u8], data: &[u8]) -> Result<()> {
        let mut wire = bhs.to_vec();
        wire[5..8].copy_from_slice(&encode_data_length(data.len() as u32));
        wire.extend_from_slice(data);
        wire.resize(wire.len() + pad_len(data.len()), 0);
        self.stream.write_all(&wire).await?;
        Ok(())
    }

    fn next_stat_sn(&mut self) -> u32 {
        let sn = self.stat_sn;
        self.stat_sn = self.stat_sn.wrapping_add(1);
        sn
    }

    /// Answers `req` with a Login Response.
    pub async fn login_reply(
        &mut self,
        req: &Pdu,
        flags: u8,
        class: u8,
        detail: u8,
        text: &[u8],
    ) -> Result<()> {
        let mut isid = [0u8; 6];
        isid.copy_from_slice(&req.bhs[8..14]);
        let rsp = LoginResponse {
            opcode: RawBhsOpcode::from_raw(0x23),
            flags: RawLoginFlags::from_raw(flags),
            isid,
            initiator_task_tag: req.itt().into(),
            stat_sn: self.next_stat_sn().into(),
            exp_cmd_sn: self.exp_cmd_sn.into(),
            max_cmd_sn: self.max_cmd_sn().into(),
            status_class: class,
            status_detail: detail,
            ..Default::default()
        };
        self.send(rsp.as_bytes(), text).await
    }

    /// Reads a Login Request, checking its stage.
    pub async fn login_request(&mut self, csg: u8) -> Result<Pdu> {
        let req = self.recv_op(OP_LOGIN_REQ).await?;
        ensure!(req.immediate(), "login request without the I bit");
        ensure!(req.csg() == csg, "login in stage {} instead of {csg}", req.csg());
        if csg == 0 {
            self.security_rounds += 1;
        }
        Ok(req)
    }

    /// The Operational round trip that ends every login.
    pub async fn login_operational(&mut self) -> Result<Pdu> {
        let req = self.login_request(1).await?;
        ensure!(req.transit() && req.nsg() == 3, "operational request must ask for FFP");
        ensure!(req.key("ImmediateData").as_deref() == Some("Yes"));
        self.login_reply(
            &req,
            0x87,
            0,
            0,
            b"MaxRecvDataSegmentLength=8192\0MaxBurstLength=262144\0FirstBurstLength=65536\0",
        )
        .await?;
        Ok(req)
    }

    /// Login without authentication: one Security and one Operational round.
    /// Returns the Operational request.
    pub async fn login_plain(&mut self) -> Result<Pdu> {
        let req = self.login_request(0).await?;
        ensure!(req.key("AuthMethod").as_deref() == Some("None"));
        ensure!(req.key("TargetName").as_deref() == Some(TARGET_NAME));
        ensure!(req.transit() && req.nsg() == 1);
        self.login_reply(&req, 0x81, 0, 0, b"AuthMethod=None\0TargetPortalGroupTag=1\0")
            .await?;
        self.login_operational().await
    }

    /// SCSI Response with the given status and optional sense bytes.
    pub async fn scsi_response(&mut self, req: &Pdu, status: u8, sense: &[u8]) -> Result<()> {
        self.exp_cmd_sn = req.cmd_sn().wrapping_add(1);
        let rsp = ScsiCommandResponse {
            opcode: RawBhsOpcode::from_raw(0x21),
            flags: 0x80,
            status,
            initiator_task_tag: req.itt().into(),
            stat_sn: self.next_stat_sn().into(),
            exp_cmd_sn: self.exp_cmd_sn.into(),
            max_cmd_sn: self.max_cmd_sn().into(),
            ..Default::default()
        };
        let mut data = Vec::new();
        if !sense.is_empty() {
            data.extend_from_slice(&(sense.len() as u16).to_be_bytes());
            data.extend_from_slice(sense);
        }
        self.send(rsp.as_bytes(), &data).await
    }

    /// One Data-In carrying the whole payload and status GOOD.
    pub async fn data_in_final(&mut self, req: &Pdu, payload: &[u8]) -> Result<()> {
        self.exp_cmd_sn = req.cmd_sn().wrapping_add(1);
        let din = ScsiDataIn {
            opcode: RawBhsOpcode::from_raw(0x25),
            flags: 0x81,
            status_or_rsvd: 0,
            initiator_task_tag: req.itt().into(),
            target_transfer_tag: RESERVED_TAG.into(),
            stat_sn_or_rsvd: self.next_stat_sn().into(),
            exp_cmd_sn: self.exp_cmd_sn.into(),
            max_cmd_sn: self.max_cmd_sn().into(),
            ..Default::default()
        };
        self.send(din.as_bytes(), payload).await
    }

    /// Data-In without status; StatSN is not consumed.
    pub async fn data_in_partial(&mut self, req: &Pdu, offset: u32, payload: &[u8]) -> Result<()> {
        let din = ScsiDataIn {
            opcode: RawBhsOpcode::from_raw(0x25),
            flags: 0x00,
            initiator_task_tag: req.itt().into(),
            target_transfer_tag: RESERVED_TAG.into(),
            exp_cmd_sn: self.exp_cmd_sn.into(),
            max_cmd_sn: self.max_cmd_sn().into(),
            buffer_offset: offset.into(),
            ..Default::default()
        };
        self.send(din.as_bytes(), payload).await
    }

    /// Unsolicited NOP-In announcing the current window. `ttt` other than
    /// the reserved tag asks for a ping reply.
    pub async fn nop_in(&mut self, ttt: u32) -> Result<()> {
        let nop = NopInResponse {
            opcode: RawBhsOpcode::from_raw(0x20),
            flags: 0x80,
            initiator_task_tag: RESERVED_TAG.into(),
            target_transfer_tag: ttt.into(),
            stat_sn: self.stat_sn.into(),
            exp_cmd_sn: self.exp_cmd_sn.into(),
            max_cmd_sn: self.max_cmd_sn().into(),
            ..Default::default()
        };
        self.send(nop.as_bytes(), &[]).await
    }

    /// Reads the Logout Request and confirms it.
    pub async fn logout(&mut self) -> Result<Pdu> {
        let req = self.recv_op(OP_LOGOUT_REQ).await?;
        self.exp_cmd_sn = req.cmd_sn().wrapping_add(1);
        let rsp = LogoutResponse {
            opcode: RawBhsOpcode::from_raw(0x26),
            flags: 0x80,
            initiator_task_tag: req.itt().into(),
            stat_sn: self.next_stat_sn().into(),
            exp_cmd_sn: self.exp_cmd_sn.into(),
            max_cmd_sn: self.max_cmd_sn().into(),
            ..Default::default()
        };
        self.send(rsp.as_bytes(), &[]).await?;
        Ok(req)
    }
}
