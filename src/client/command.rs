// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, pin::Pin};

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::{
    client::engine::Engine,
    error::{IscsiError, Result},
    models::command::{common::TransferDirection, request::MAX_CDB_LEN},
};

/// Sense bytes kept per command unless the caller asks otherwise.
pub const DEFAULT_SENSE_BUDGET: usize = 96;

/// One SCSI command as handed in by a caller.
#[derive(Debug, Clone)]
pub struct ScsiRequest {
    pub cdb: Vec<u8>,
    pub direction: TransferDirection,
    /// Initiator-to-target scatter list, sent as immediate data.
    pub i2t: Vec<Bytes>,
    /// Bytes the caller is prepared to receive.
    pub t2i_len: usize,
    /// Upper bound for the sense bytes kept from a SCSI Response.
    pub sense_budget: usize,
    /// Resubmissions when the command completes with sense data; the
    /// session default applies when unset.
    pub sense_retries: Option<u32>,
}

impl ScsiRequest {
    pub fn none(cdb: &[u8]) -> Self {
        Self {
            cdb: cdb.to_vec(),
            direction: TransferDirection::None,
            i2t: Vec::new(),
            t2i_len: 0,
            sense_budget: DEFAULT_SENSE_BUDGET,
            sense_retries: None,
        }
    }

    pub fn read(cdb: &[u8], t2i_len: usize) -> Self {
        Self {
            direction: TransferDirection::FromTarget,
            t2i_len,
            ..Self::none(cdb)
        }
    }

    pub fn write(cdb: &[u8], i2t: Vec<Bytes>) -> Self {
        Self {
            direction: TransferDirection::ToTarget,
            i2t,
            ..Self::none(cdb)
        }
    }

    pub fn with_sense_budget(mut self, budget: usize) -> Self {
        self.sense_budget = budget;
        self
    }

    pub fn with_sense_retries(mut self, retries: u32) -> Self {
        self.sense_retries = Some(retries);
        self
    }

    #[inline]
    pub fn i2t_len(&self) -> usize {
        self.i2t.iter().map(Bytes::len).sum()
    }

    /// Bytes announced in ExpectedDataTransferLength.
    pub fn expected_len(&self) -> usize {
        match self.direction {
            TransferDirection::FromTarget => self.t2i_len,
            TransferDirection::ToTarget => self.i2t_len(),
            TransferDirection::None => 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.cdb.is_empty() || self.cdb.len() > MAX_CDB_LEN {
            return Err(IscsiError::MalformedValue(format!(
                "CDB of {} bytes",
                self.cdb.len()
            )));
        }
        if u32::try_from(self.expected_len()).is_err() {
            return Err(IscsiError::BufferOverflow);
        }
        Ok(())
    }
}

/// What a successfully finished command returns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScsiOutcome {
    pub status: u8,
    /// Target-to-initiator data.
    pub data: Bytes,
    /// Bytes moved in the command's direction.
    pub transferred: usize,
}

pub type OnComplete = Box<dyn FnOnce(Result<ScsiOutcome>) + Send>;

/// Where the single terminal outcome of a command goes.
pub enum Completion {
    Channel(oneshot::Sender<Result<ScsiOutcome>>),
    /// Runs on the I/O task.
    Callback(OnComplete),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Completion::Channel(_) => "Completion::Channel",
            Completion::Callback(_) => "Completion::Callback",
        })
    }
}

/// A SCSI request on its way through the engine, from the submission queue
/// to the command table.
#[derive(Debug)]
pub struct PendingCommand {
    pub request: ScsiRequest,
    completion: Completion,
    /// Task tag of the current attempt.
    pub itt: u32,
    pub cmd_sn: u32,
    pub retries_left: u32,
    pub status: u8,
    pub sense: Vec<u8>,
    pub t2i: BytesMut,
}

impl PendingCommand {
    pub fn new(request: ScsiRequest, completion: Completion, default_retries: u32) -> Box<Self> {
        let retries_left = request.sense_retries.unwrap_or(default_retries);
        let t2i = BytesMut::with_capacity(request.t2i_len);
        Box::new(Self {
            request,
            completion,
            itt: 0,
            cmd_sn: 0,
            retries_left,
            status: 0,
            sense: Vec::new(),
            t2i,
        })
    }

    /// Drops whatever an earlier attempt collected.
    pub fn reset_response(&mut self) {
        self.status = 0;
        self.sense.clear();
        self.t2i.clear();
    }

    /// Status and data of a finished attempt.
    pub fn take_outcome(&mut self) -> ScsiOutcome {
        let transferred = match self.request.direction {
            TransferDirection::FromTarget => self.t2i.len(),
            TransferDirection::ToTarget => self.request.i2t_len(),
            TransferDirection::None => 0,
        };
        ScsiOutcome {
            status: self.status,
            data: self.t2i.split().freeze(),
            transferred,
        }
    }

    /// Delivers the terminal outcome.
    pub fn finish(self: Box<Self>, res: Result<ScsiOutcome>) {
        match self.completion {
            // The caller may have stopped waiting.
            Completion::Channel(tx) => {
                let _ = tx.send(res);
            },
            Completion::Callback(cb) => cb(res),
        }
    }
}

pub type ExecFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
pub type ExecFn = Box<dyn for<'a> FnOnce(&'a mut Engine) -> ExecFuture<'a> + Send>;

/// Code to run on the I/O task, serialized with command processing.
pub struct ExecCommand {
    pub func: ExecFn,
    pub done: oneshot::Sender<Result<()>>,
}

impl fmt::Debug for ExecCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ExecCommand")
    }
}

#[derive(Debug)]
pub enum Command {
    Scsi(Box<PendingCommand>),
    Exec(ExecCommand),
}

impl Command {
    /// Completes the command without running it.
    pub fn fail(self, err: IscsiError) {
        match self {
            Command::Scsi(cmd) => cmd.finish(Err(err)),
            Command::Exec(exec) => {
                let _ = exec.done.send(Err(err));
            },
        }
    }
}

/// Serialized request waiting for, or in the middle of, transmission.
#[derive(Debug)]
pub struct OutboundPdu {
    pub bytes: Bytes,
    pub sent: usize,
    pub cmd_sn: u32,
    /// Immediate PDUs are not held back by the command window.
    pub immediate: bool,
    /// Moves to the command table once the PDU is on the wire.
    pub command: Option<Box<PendingCommand>>,
}

impl OutboundPdu {
    pub fn command(bytes: Bytes, cmd: Box<PendingCommand>) -> Self {
        Self {
            bytes,
            sent: 0,
            cmd_sn: cmd.cmd_sn,
            immediate: false,
            command: Some(cmd),
        }
    }

    pub fn immediate(bytes: Bytes, cmd_sn: u32) -> Self {
        Self {
            bytes,
            sent: 0,
            cmd_sn,
            immediate: true,
            command: None,
        }
    }

    #[inline]
    pub fn is_sent(&self) -> bool {
        self.sent >= self.bytes.len()
    }

    #[inline]
    pub fn remaining(&self) -> &[u8] {
        &self.bytes[self.sent.min(self.bytes.len())..]
    }
}
