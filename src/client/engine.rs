// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The session's I/O engine.
//!
//! One [`Engine`] owns the socket, the sequence numbers, the command table
//! and the transmit list. It runs either as a dedicated task fed through a
//! channel ([`Engine::run`]) or is driven step by step by the submitting
//! task ([`Engine::turn`]).

use std::{collections::VecDeque, sync::Arc, time::Duration};

use tokio::{
    io::{Interest, Ready},
    sync::mpsc,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zerocopy::IntoBytes;

use crate::{
    cfg::config::Config,
    client::{
        command::{Command, OutboundPdu, PendingCommand},
        command_table::CommandTable,
        connection::{Connection, SessionState},
        transport::Transport,
    },
    error::{IscsiError, Result},
    models::{
        command::{
            common::ScsiCommandResponseFlags, request::ScsiCommandRequestBuilder,
            response::ScsiCommandResponse,
        },
        common::{BasicHeaderSegment, RESERVED_TAG},
        data::{response::ScsiDataIn, sense_data::SenseData},
        opcode::Opcode,
        pdu::{InboundPdu, PduBuilder, ReceiveBuffer},
        validate::validate_pdu,
    },
    state_machine::{login::common::perform_login, logout_states::perform_logout},
};

/// Consecutive logins without a completed command after which the target is
/// assumed dead.
pub const MAX_LOGINS_WITHOUT_IO: u32 = 3;

enum IoEvent {
    Ready(Ready),
    Timeout,
    Error(IscsiError),
}

enum Wake {
    Command(Command),
    Io(IoEvent),
}

async fn wait_io(transport: &Transport, interest: Interest, budget: Option<Duration>) -> IoEvent {
    let ready = transport.ready(interest);
    let res = match budget {
        Some(d) => match timeout(d, ready).await {
            Ok(r) => r,
            Err(_) => return IoEvent::Timeout,
        },
        None => ready.await,
    };
    match res {
        Ok(r) => IoEvent::Ready(r),
        Err(e) => IoEvent::Error(e),
    }
}

#[derive(Debug)]
pub struct Engine {
    pub conn: Connection,
    table: CommandTable,
    tx_queue: VecDeque<OutboundPdu>,
    tx_current: Option<OutboundPdu>,
    rx: ReceiveBuffer,
    /// Commands waiting to be prepared: fallback-mode submissions and
    /// sense retries.
    pub(crate) inbox: VecDeque<Command>,
    logins_since_io: u32,
    try_reconnect: bool,
}

impl Engine {
    pub fn new(cfg: Arc<Config>, cancel: CancellationToken) -> Result<Self> {
        let conn = Connection::new(cfg, cancel)?;
        Ok(Self {
            rx: ReceiveBuffer::new(conn.recv_len as usize),
            conn,
            table: CommandTable::new(),
            tx_queue: VecDeque::new(),
            tx_current: None,
            inbox: VecDeque::new(),
            logins_since_io: 0,
            try_reconnect: false,
        })
    }

    #[inline]
    pub fn cfg(&self) -> &Config {
        self.conn.cfg()
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.conn.state
    }

    #[inline]
    pub fn logins_since_io(&self) -> u32 {
        self.logins_since_io
    }

    /// Commands that have been sent and still wait for a response.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.table.len()
    }

    /// Commands prepared but not yet fully sent.
    #[inline]
    pub fn queued(&self) -> usize {
        self.tx_queue.len() + usize::from(self.tx_current.is_some())
    }

    /// Lets the next command submitted while disconnected trigger one
    /// reconnect attempt.
    pub fn allow_reconnect(&mut self) {
        self.try_reconnect = true;
    }

    fn has_outstanding(&self) -> bool {
        !self.table.is_empty() || self.tx_current.is_some() || !self.tx_queue.is_empty()
    }

    /// Only an outstanding response bounds the wait; a command held back by
    /// a closed window waits for the target to reopen it.
    fn wait_budget(&self) -> Option<Duration> {
        (!self.table.is_empty()).then(|| self.conn.timeout())
    }

    fn interest(&self) -> Interest {
        match self.tx_current {
            Some(_) => Interest::READABLE.add(Interest::WRITABLE),
            None => Interest::READABLE,
        }
    }

    /// Dedicated I/O task body. Returns once `commands` is closed or the
    /// session is cancelled; everything still pending then fails with
    /// [`IscsiError::SessionClosed`].
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let cancel = self.conn.cancel_token().clone();
        loop {
            self.drain_inbox().await;

            let budget = self.wait_budget();
            let interest = self.interest();
            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Wake::Command(cmd),
                    None => break,
                },
                ev = wait_io(&self.conn.transport, interest, budget) => Wake::Io(ev),
            };

            match wake {
                Wake::Command(cmd) => {
                    self.dispatch(cmd).await;
                    while let Ok(cmd) = commands.try_recv() {
                        self.dispatch(cmd).await;
                    }
                },
                Wake::Io(ev) => self.on_io(ev).await,
            }
        }

        commands.close();
        while let Ok(cmd) = commands.try_recv() {
            self.inbox.push_back(cmd);
        }
        self.shutdown();
    }

    /// One step of the fallback mode: prepares queued commands, then waits
    /// for and handles one round of socket readiness.
    pub async fn turn(&mut self) {
        self.drain_inbox().await;
        if !self.has_outstanding() {
            return;
        }
        let ev = wait_io(&self.conn.transport, self.interest(), self.wait_budget()).await;
        self.on_io(ev).await;
    }

    /// Fails every pending and queued command and drops the socket.
    pub fn shutdown(&mut self) {
        for cmd in self.reset() {
            cmd.finish(Err(IscsiError::SessionClosed));
        }
        for cmd in self.inbox.drain(..) {
            cmd.fail(IscsiError::SessionClosed);
        }
        self.conn.close();
        self.conn.state = SessionState::Free;
    }

    async fn drain_inbox(&mut self) {
        while let Some(cmd) = self.inbox.pop_front() {
            self.dispatch(cmd).await;
        }
    }

    async fn dispatch(&mut self, cmd: Command) {
        match cmd {
            Command::Scsi(cmd) => {
                if !self.conn.is_connected() && self.try_reconnect {
                    self.try_reconnect = false;
                    self.reattach().await;
                }
                if !self.conn.is_connected() {
                    cmd.finish(Err(IscsiError::ConnectionRefused));
                } else if let Err(e) = self.prepare(cmd) {
                    warn!("iSCSI: failed to send command: {e}");
                    self.reattach().await;
                }
            },
            Command::Exec(exec) => {
                let res = (exec.func)(self).await;
                let _ = exec.done.send(res);
            },
        }
    }

    async fn on_io(&mut self, ev: IoEvent) {
        match ev {
            IoEvent::Timeout => {
                if self.has_outstanding() {
                    warn!(
                        "iSCSI: no response from target {} within {:?}, reconnecting",
                        self.cfg().target.target_name,
                        self.conn.timeout()
                    );
                    self.reattach().await;
                }
            },
            IoEvent::Error(e) => {
                warn!("iSCSI: socket error: {e}");
                self.reattach().await;
            },
            IoEvent::Ready(ready) => {
                if ready.is_readable() || ready.is_read_closed() {
                    match self.recv_async() {
                        Ok(()) => {},
                        Err(e @ (IscsiError::BrokenPipe | IscsiError::ProtocolParse(_))) => {
                            warn!("iSCSI: receive failed: {e}");
                            self.reattach().await;
                            return;
                        },
                        Err(e) => warn!("iSCSI: receive failed: {e}"),
                    }
                }
                if (ready.is_writable() || ready.is_write_closed()) && self.tx_current.is_some() {
                    if let Err(e) = self.send_async() {
                        warn!("iSCSI: send failed: {e}");
                        self.reattach().await;
                    }
                }
            },
        }
    }

    /// Turns a SCSI request into an outbound PDU and starts sending it.
    ///
    /// Requests that can never be sent complete right away; only transport
    /// failures are returned.
    fn prepare(&mut self, mut cmd: Box<PendingCommand>) -> Result<()> {
        if let Err(e) = cmd.request.validate() {
            cmd.finish(Err(e));
            return Ok(());
        }
        // No R2T support: everything must fit into the immediate data.
        if cmd.request.i2t_len() > self.conn.send_len as usize {
            cmd.finish(Err(IscsiError::BufferOverflow));
            return Ok(());
        }
        let builder = match ScsiCommandRequestBuilder::new()
            .direction(cmd.request.direction)
            .scsi_descriptor_block(&cmd.request.cdb)
        {
            Ok(b) => b,
            Err(e) => {
                cmd.finish(Err(e));
                return Ok(());
            },
        };

        let itt = self.conn.seq.new_itt();
        let cmd_sn = self.conn.seq.next_cmd_sn();
        let header = builder
            .lun(self.conn.lun)
            .initiator_task_tag(itt)
            .expected_data_transfer_length(cmd.request.expected_len() as u32)
            .cmd_sn(cmd_sn)
            .exp_stat_sn(self.conn.seq.exp_stat_sn)
            .header;

        let mut pdu = PduBuilder::new(&header);
        if let Err(e) = pdu.append_padded(&cmd.request.i2t) {
            self.conn.dump_request(&[header.as_bytes()], &e.to_string());
            cmd.finish(Err(e));
            return Ok(());
        }
        cmd.itt = itt;
        cmd.cmd_sn = cmd_sn;
        debug!("prepared ITT {itt:#x} CmdSN {cmd_sn}");

        self.tx_queue.push_back(OutboundPdu::command(pdu.freeze(), cmd));
        if self.tx_current.is_none() {
            self.send_async()?;
        }
        Ok(())
    }

    /// Pushes queued PDUs into the socket until it stops accepting data or
    /// the command window closes.
    fn send_async(&mut self) -> Result<()> {
        loop {
            if self.tx_current.is_none() {
                match self.tx_queue.front() {
                    Some(head) if head.immediate || self.conn.seq.window_open(head.cmd_sn) => {
                        self.tx_current = self.tx_queue.pop_front();
                    },
                    _ => return Ok(()),
                }
            }
            let Some(cur) = self.tx_current.as_mut() else {
                return Ok(());
            };

            let n = self.conn.transport.write_nonblocking(cur.remaining())?;
            if n == 0 {
                return Ok(());
            }
            cur.sent += n;
            if cur.is_sent() {
                if let Some(cmd) = self.tx_current.take().and_then(|pdu| pdu.command) {
                    self.table.insert(cmd);
                }
            }
        }
    }

    /// Reads whatever the socket has and processes every completed PDU.
    fn recv_async(&mut self) -> Result<()> {
        loop {
            let n = self.conn.transport.read_nonblocking(self.rx.unfilled())?;
            if n == 0 {
                return Ok(());
            }
            match self.rx.advance(n) {
                Ok(Some(pdu)) => self.process_inbound(pdu)?,
                Ok(None) => {},
                Err(e) => {
                    self.rx.reset();
                    return Err(e);
                },
            }
        }
    }

    fn process_inbound(&mut self, pdu: InboundPdu) -> Result<()> {
        let hdr = &pdu.header;
        if let Err(e) = validate_pdu(hdr) {
            warn!("iSCSI: dropping invalid PDU: {e}");
            self.conn.dump_response(&pdu, &e);
            return Ok(());
        }
        self.conn.seq.update_window(hdr);
        if let Err(e) = self.conn.seq.acknowledge(hdr) {
            warn!("iSCSI: dropping PDU: {e}");
            self.conn.dump_response(&pdu, &e);
            return Ok(());
        }

        if hdr.itt() != RESERVED_TAG {
            self.update_request(&pdu);
        } else if let Some(reply) = self.conn.ping_reply(&pdu) {
            self.tx_queue
                .push_front(OutboundPdu::immediate(reply, self.conn.seq.cmd_sn));
        }

        // The window may have opened.
        if self.tx_current.is_none() {
            self.send_async()?;
        }
        Ok(())
    }

    fn update_request(&mut self, pdu: &InboundPdu) {
        let itt = pdu.header.itt();
        let exp_stat_sn = self.conn.seq.exp_stat_sn;
        let Some(cmd) = self.table.get_mut(itt) else {
            debug!("response for unknown ITT {itt:#x} ignored");
            return;
        };

        match pdu.header.opcode() {
            Some(Opcode::ScsiCommandResp) => {
                let res = apply_scsi_response(cmd, pdu, exp_stat_sn);
                if let Err(e) = &res {
                    warn!("iSCSI: bad SCSI Response for ITT {itt:#x}: {e}");
                    self.conn.dump_response(pdu, e);
                }
                if let Some(cmd) = self.table.remove(itt) {
                    self.complete(cmd, res);
                }
            },
            Some(Opcode::ScsiDataIn) => match apply_data_in(cmd, pdu) {
                Ok(true) => {
                    if let Some(cmd) = self.table.remove(itt) {
                        self.complete(cmd, Ok(()));
                    }
                },
                Ok(false) => {},
                Err(e) => {
                    warn!("iSCSI: bad Data-In for ITT {itt:#x}: {e}");
                    self.conn.dump_response(pdu, &e);
                },
            },
            other => {
                let e = IscsiError::parse(format!("unexpected {other:?} for ITT {itt:#x}"));
                warn!("iSCSI: {e}");
                self.conn.dump_response(pdu, &e);
            },
        }
    }

    /// Terminal path for a command that left the table. Sense data causes a
    /// resubmission while the command's retry budget lasts.
    fn complete(&mut self, mut cmd: Box<PendingCommand>, res: Result<()>) {
        if let Err(e) = res {
            cmd.finish(Err(e));
            return;
        }
        self.logins_since_io = 0;

        if cmd.sense.is_empty() {
            let outcome = cmd.take_outcome();
            cmd.finish(Ok(outcome));
        } else if cmd.retries_left > 0 {
            cmd.retries_left -= 1;
            match SenseData::parse(&cmd.sense) {
                Ok(sense) => debug!(
                    "ITT {:#x} completed with {sense:?}, {} retries left",
                    cmd.itt, cmd.retries_left
                ),
                Err(_) => debug!(
                    "ITT {:#x} completed with sense, {} retries left",
                    cmd.itt, cmd.retries_left
                ),
            }
            cmd.reset_response();
            self.inbox.push_back(Command::Scsi(cmd));
        } else {
            let status = cmd.status;
            let sense = std::mem::take(&mut cmd.sense);
            cmd.finish(Err(IscsiError::CheckCondition { status, sense }));
        }
    }

    /// Drops partial receive/transmit state and collects every command the
    /// engine still owns: the one being sent and the transmit list first,
    /// then the command table.
    fn reset(&mut self) -> Vec<Box<PendingCommand>> {
        self.rx.reset();
        let mut pending = Vec::new();
        pending.extend(self.tx_current.take().and_then(|pdu| pdu.command));
        pending.extend(self.tx_queue.drain(..).filter_map(|pdu| pdu.command));
        pending.extend(self.table.remove_all());
        for cmd in &mut pending {
            cmd.reset_response();
        }
        pending
    }

    /// Logs in, retrying after transport drops and following redirects.
    pub async fn attach(&mut self) -> Result<()> {
        let target = self.cfg().target.target_name.clone();
        if self.logins_since_io >= MAX_LOGINS_WITHOUT_IO {
            warn!(
                "iSCSI: {} logins to target {target} without I/O, giving up",
                self.logins_since_io
            );
            return Err(IscsiError::BrokenPipe);
        }

        self.conn.close();
        let mut retries = self.cfg().runtime.login_retries.max(1);
        let res = loop {
            match perform_login(&mut self.conn).await {
                Ok(()) => break Ok(()),
                Err(IscsiError::RetryAfterDisconnect) => {
                    self.conn.close();
                    retries -= 1;
                    if retries == 0 {
                        break Err(IscsiError::BrokenPipe);
                    }
                    debug!("login interrupted, {retries} attempts left");
                },
                Err(IscsiError::Redirect(addr)) => debug!("following redirect to {addr}"),
                Err(e) => break Err(e),
            }
        };

        match &res {
            Ok(()) => {
                self.logins_since_io += 1;
                info!("iSCSI: login to target {target} successful");
            },
            Err(e) => warn!("iSCSI: login to target {target} failed: {e}"),
        }
        res
    }

    /// Recovers from a broken connection: logs in again and resends every
    /// outstanding command under a new task tag. If that fails, every
    /// command completes with [`IscsiError::BrokenPipe`].
    pub async fn reattach(&mut self) {
        self.conn.close();
        self.conn.state = SessionState::Free;
        let pending = self.reset();
        if !pending.is_empty() {
            info!("iSCSI: reattaching with {} outstanding commands", pending.len());
        }

        if let Err(e) = self.attach().await {
            debug!("reattach failed: {e}");
            for cmd in pending {
                cmd.finish(Err(IscsiError::BrokenPipe));
            }
            return;
        }

        let mut pending = pending.into_iter();
        while let Some(cmd) = pending.next() {
            if let Err(e) = self.prepare(cmd) {
                warn!("iSCSI: resend after reattach failed: {e}");
                self.conn.close();
                self.conn.state = SessionState::Free;
                let mut lost = self.reset();
                lost.extend(pending);
                for cmd in lost {
                    cmd.finish(Err(IscsiError::BrokenPipe));
                }
                return;
            }
        }
    }

    /// Logs out (when logged in) and drops the connection. Logout failures
    /// are only logged.
    pub async fn detach(&mut self) -> Result<()> {
        if !matches!(self.conn.state, SessionState::Free | SessionState::InLogout) {
            self.conn.state = SessionState::InLogout;
            if let Err(e) = perform_logout(&mut self.conn).await {
                warn!(
                    "iSCSI: logout from target {} failed: {e}",
                    self.cfg().target.target_name
                );
            }
        }
        if self.conn.state != SessionState::Free {
            self.conn.close();
        }
        self.conn.state = SessionState::Free;
        Ok(())
    }
}

fn apply_scsi_response(
    cmd: &mut PendingCommand,
    pdu: &InboundPdu,
    exp_stat_sn: u32,
) -> Result<()> {
    let rsp = ScsiCommandResponse::from_bhs_bytes(&pdu.bhs)?;
    if !rsp.flags().contains(ScsiCommandResponseFlags::FINAL)
        || rsp.response != 0
        || rsp.stat_sn.get() != exp_stat_sn.wrapping_sub(1)
    {
        return Err(IscsiError::parse(format!(
            "SCSI Response flags {:#04x} response {} StatSN {}",
            rsp.flags,
            rsp.response,
            rsp.stat_sn.get()
        )));
    }
    cmd.status = rsp.status;

    let data = &pdu.data;
    match data.len() {
        0 => cmd.sense.clear(),
        1 => return Err(IscsiError::parse("truncated SenseLength")),
        _ => {
            let sense_len = u16::from_be_bytes([data[0], data[1]]) as usize;
            if sense_len + 2 > data.len() {
                return Err(IscsiError::BufferOverflow);
            }
            let keep = sense_len.min(cmd.request.sense_budget);
            cmd.sense = data[2..2 + keep].to_vec();
        },
    }
    Ok(())
}

/// Returns `true` once the Data-In carried the final status.
fn apply_data_in(cmd: &mut PendingCommand, pdu: &InboundPdu) -> Result<bool> {
    let din = ScsiDataIn::from_bhs_bytes(&pdu.bhs)?;
    if din.is_final() && pdu.data.len() > cmd.request.t2i_len {
        return Err(IscsiError::BufferOverflow);
    }
    let room = cmd.request.t2i_len.saturating_sub(cmd.t2i.len());
    cmd.t2i
        .extend_from_slice(&pdu.data[..pdu.data.len().min(room)]);

    match (din.is_final(), din.scsi_status()) {
        (true, Some(status)) => {
            cmd.status = status;
            cmd.sense.clear();
            Ok(true)
        },
        _ => Ok(false),
    }
}
