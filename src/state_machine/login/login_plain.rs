// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Login steps that need no authentication exchange: the opening Security
//! request and the Operational negotiation.

use std::pin::Pin;

use crate::{
    cfg::enums::AuthMethod,
    error::{IscsiError, Result},
    models::{
        common::MAX_DATA_SEGMENT_LENGTH,
        login::common::Stage,
        text::codec::{TextBuffer, get_key_value},
    },
    state_machine::{
        common::{StateMachine, Transition},
        login::{
            common::{LoginCtx, LoginStates, LoginStepOut},
            login_chap::ChapAlgorithm,
        },
    },
};

/// Sub-state 0x0000.
#[derive(Debug)]
pub struct SecurityStart;

impl SecurityStart {
    async fn run(ctx: &mut LoginCtx<'_>) -> Result<LoginStates> {
        let chap = ctx.conn.cfg().chap().is_some();
        let request = match chap {
            true => ctx.request(Stage::Security, None),
            false => ctx.request(Stage::Security, Some(Stage::Operational)),
        };

        let mut text = ctx.text();
        text.add_key_value("SessionType", "Normal")?;
        text.add_key_value("InitiatorName", &ctx.conn.initiator_name)?;
        text.add_key_value("TargetName", &ctx.conn.cfg().target.target_name)?;
        let offer = match chap {
            true => format!("{},{}", AuthMethod::Chap, AuthMethod::None),
            false => AuthMethod::None.to_string(),
        };
        text.add_key_value("AuthMethod", &offer)?;
        ctx.exchange(request, &text).await?;

        let flags = ctx.last_header()?.flags;
        let method: AuthMethod = get_key_value(ctx.last_data()?, "AuthMethod")?.parse()?;
        match method {
            AuthMethod::None => Ok(LoginStates::Operational(Operational)),
            AuthMethod::Chap
                if chap && flags.nsg() == Some(Stage::Security) && !flags.transit() =>
            {
                Ok(LoginStates::ChapAlgorithm(ChapAlgorithm))
            },
            AuthMethod::Chap => Err(IscsiError::parse(format!(
                "unexpected AuthMethod=CHAP with {flags:?}"
            ))),
        }
    }
}

impl<'ctx> StateMachine<LoginCtx<'ctx>, LoginStepOut> for SecurityStart {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = LoginStepOut> + Send + 'a>>
    where
        Self: 'a,
        LoginCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut LoginCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(async move {
            match Self::run(ctx).await {
                Ok(next) => Transition::Next(next, Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

/// Sub-state 0x0100. The parameter list goes out with the first request
/// only; later rounds are empty until the target agrees to Full Feature.
#[derive(Debug)]
pub struct Operational;

/// Parameters offered in the Operational stage.
pub fn operational_keys(text: &mut TextBuffer, max_recv: u32) -> Result<()> {
    let burst = MAX_DATA_SEGMENT_LENGTH.to_string();
    text.add_key_value("HeaderDigest", "None")?;
    text.add_key_value("DataDigest", "None")?;
    text.add_key_value("MaxConnections", "1")?;
    text.add_key_value("InitialR2T", "No")?;
    text.add_key_value("ImmediateData", "Yes")?;
    text.add_key_value("MaxRecvDataSegmentLength", &max_recv.to_string())?;
    text.add_key_value("MaxBurstLength", &burst)?;
    text.add_key_value("FirstBurstLength", &burst)?;
    text.add_key_value("DefaultTime2Wait", "0")?;
    text.add_key_value("DefaultTime2Retain", "60")?;
    text.add_key_value("DataPDUInOrder", "Yes")?;
    text.add_key_value("DataSequenceInOrder", "Yes")?;
    text.add_key_value("ErrorRecoveryLevel", "0")?;
    text.add_key_value("MaxOutstandingR2T", "1")?;
    Ok(())
}

impl Operational {
    async fn run(ctx: &mut LoginCtx<'_>) -> LoginStepOut {
        let request = ctx.request(Stage::Operational, Some(Stage::FullFeature));
        let mut text = ctx.text();
        if !ctx.operational_sent {
            if let Err(e) = operational_keys(&mut text, ctx.conn.recv_len) {
                return Transition::Done(Err(e));
            }
            ctx.operational_sent = true;
        }
        if let Err(e) = ctx.exchange(request, &text).await {
            return Transition::Done(Err(e));
        }

        let flags = match ctx.last_header() {
            Ok(h) => h.flags,
            Err(e) => return Transition::Done(Err(e)),
        };
        let from_operational = flags.csg() == Some(Stage::Operational);
        let to_full = flags.nsg() == Some(Stage::FullFeature);
        let to_operational = flags.nsg() == Some(Stage::Operational);

        if from_operational && to_full && flags.transit() {
            Transition::Done(Ok(()))
        } else if from_operational && (to_operational || !flags.transit()) {
            Transition::Stay(Ok(()))
        } else {
            Transition::Done(Err(IscsiError::parse(format!(
                "unexpected operational response {flags:?}"
            ))))
        }
    }
}

impl<'ctx> StateMachine<LoginCtx<'ctx>, LoginStepOut> for Operational {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = LoginStepOut> + Send + 'a>>
    where
        Self: 'a,
        LoginCtx<'ctx>: 'a;

    fn step<'a>(&'a self, ctx: &'a mut LoginCtx<'ctx>) -> Self::StepResult<'a> {
        Box::pin(Self::run(ctx))
    }
}
