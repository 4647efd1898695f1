// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::pin::Pin;

use tracing::{debug, warn};
use zerocopy::IntoBytes;

use crate::{
    client::connection::Connection,
    error::Result,
    models::{
        common::BasicHeaderSegment,
        logout::{common::LogoutReason, request::LogoutRequestBuilder, response::LogoutResponse},
    },
    state_machine::common::{StateMachine, Transition},
};

#[derive(Debug)]
pub struct LogoutCtx<'a> {
    pub conn: &'a mut Connection,
    pub reason: LogoutReason,
}

impl<'a> LogoutCtx<'a> {
    pub fn new(conn: &'a mut Connection, reason: LogoutReason) -> Self {
        Self { conn, reason }
    }

    async fn send_logout(&mut self) -> Result<LogoutStatus> {
        let itt = self.conn.seq.new_itt();
        let cmd_sn = self.conn.seq.next_cmd_sn();
        let exp_stat_sn = self.conn.seq.exp_stat_sn;

        let header = LogoutRequestBuilder::new(self.reason, itt)
            .cmd_sn(cmd_sn)
            .exp_stat_sn(exp_stat_sn)
            .header;
        self.conn.send_pdu_blocking(header.as_bytes()).await?;

        Ok(LogoutStatus {
            itt,
            cmd_sn,
            exp_stat_sn,
        })
    }

    async fn receive_logout_resp(&mut self, expected: &LogoutStatus) -> Result<()> {
        let pdu = self.conn.recv_pdu_blocking(expected.itt).await?;
        let rsp = LogoutResponse::from_bhs_bytes(&pdu.bhs)?;
        if !rsp.is_clean_success() {
            warn!(
                "iSCSI: logout from target {} answered with {:?}",
                self.conn.cfg().target.target_name,
                rsp.response_code()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LogoutStatus {
    pub itt: u32,
    pub cmd_sn: u32,
    pub exp_stat_sn: u32,
}

pub struct Idle;
pub struct Wait {
    pending: LogoutStatus,
}

pub enum LogoutStates {
    Idle(Idle),
    Wait(Wait),
}

type LogoutStepOut = Transition<LogoutStates, Result<LogoutStatus>>;

impl<'ctx> StateMachine<LogoutCtx<'ctx>, LogoutStepOut> for Idle {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = LogoutStepOut> + Send + 'a>>
    where
        Self: 'a,
        LogoutCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut LogoutCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            match ctx.send_logout().await {
                Ok(st) => Transition::Next(
                    LogoutStates::Wait(Wait {
                        pending: st.clone(),
                    }),
                    Ok(st),
                ),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl<'ctx> StateMachine<LogoutCtx<'ctx>, LogoutStepOut> for Wait {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = LogoutStepOut> + Send + 'a>>
    where
        Self: 'a,
        LogoutCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut LogoutCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            match ctx.receive_logout_resp(&self.pending).await {
                Ok(()) => Transition::Done(Ok(self.pending.clone())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

pub async fn run_logout(
    mut state: LogoutStates,
    ctx: &mut LogoutCtx<'_>,
) -> Result<LogoutStatus> {
    loop {
        let trans = match &state {
            LogoutStates::Idle(s) => s.step(ctx).await,
            LogoutStates::Wait(s) => s.step(ctx).await,
        };

        match trans {
            Transition::Next(next_state, r) => {
                r?;
                state = next_state;
            },
            Transition::Stay(r) => {
                r?;
            },
            Transition::Done(r) => return r,
        }
    }
}

/// Closes the whole session with a Logout Request and waits for the answer.
///
/// A non-success Logout Response is only logged; the caller drops the
/// connection either way.
pub async fn perform_logout(conn: &mut Connection) -> Result<()> {
    let mut ctx = LogoutCtx::new(conn, LogoutReason::CloseSession);
    let st = run_logout(LogoutStates::Idle(Idle), &mut ctx).await?;
    debug!("logout done, itt {} cmd_sn {}", st.itt, st.cmd_sn);
    Ok(())
}

