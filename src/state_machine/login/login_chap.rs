// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::pin::Pin;

use md5::{Digest, Md5};
use rand::RngExt;
use tracing::debug;

use crate::{
    error::{IscsiError, Result},
    models::{
        login::{common::Stage, status::InitiatorErrorDetail},
        text::codec::{decode_binary, get_key_value},
    },
    state_machine::{
        common::{StateMachine, Transition},
        login::{
            common::{ChapChallenge, LoginCtx, LoginStates, LoginStepOut},
            login_plain::Operational,
        },
    },
};

/// CHAP with MD5 (RFC 1994), the only algorithm offered.
pub const CHAP_MD5: &str = "5";
/// Upper bound for a decoded CHAP_C / CHAP_R value.
pub const CHAP_BINARY_CAPACITY: usize = 1024;
pub const CHAP_MD5_LEN: usize = 16;

const CHALLENGE_MIN: usize = 16;
const CHALLENGE_MAX: usize = 24;

/// CHAP_R = MD5(one-octet CHAP_I || secret || CHAP_C)
pub fn chap_md5_response(id: u8, secret: &[u8], challenge: &[u8]) -> [u8; CHAP_MD5_LEN] {
    let mut h = Md5::new();
    h.update([id]);
    h.update(secret);
    h.update(challenge);
    let mut out = [0u8; CHAP_MD5_LEN];
    out.copy_from_slice(&h.finalize());
    out
}

/// Random challenge of 16 to 24 octets for authenticating the target.
pub fn generate_challenge() -> Vec<u8> {
    let mut rng = rand::rng();
    let mut len = [0u8; 1];
    rng.fill(&mut len);
    let mut challenge =
        vec![0u8; CHALLENGE_MIN + len[0] as usize % (CHALLENGE_MAX - CHALLENGE_MIN + 1)];
    rng.fill(challenge.as_mut_slice());
    challenge
}

/// Checks the peer's answer to a challenge we issued.
pub fn verify_response(id: u8, secret: &[u8], challenge: &[u8], response: &[u8]) -> bool {
    response == chap_md5_response(id, secret, challenge)
}

/// Sub-state 0x0001: agree on the algorithm and pick up the challenge.
#[derive(Debug)]
pub struct ChapAlgorithm;

impl ChapAlgorithm {
    async fn run(ctx: &mut LoginCtx<'_>) -> Result<LoginStates> {
        let request = ctx.request(Stage::Security, None);
        let mut text = ctx.text();
        text.add_key_value("CHAP_A", CHAP_MD5)?;
        ctx.exchange(request, &text).await?;

        let data = ctx.last_data()?;
        let algorithm = get_key_value(data, "CHAP_A")?;
        if algorithm != CHAP_MD5 {
            return Err(IscsiError::parse(format!("unsupported CHAP_A={algorithm}")));
        }
        let id = get_key_value(data, "CHAP_I")?;
        let id = id
            .parse::<u8>()
            .map_err(|_| IscsiError::MalformedValue(format!("CHAP_I={id}")))?;
        let challenge = decode_binary(get_key_value(data, "CHAP_C")?, CHAP_BINARY_CAPACITY)?;
        debug!("CHAP challenge id {id}, {} bytes", challenge.len());

        ctx.chap = Some(ChapChallenge { id, challenge });
        Ok(LoginStates::ChapResponse(ChapResponse))
    }
}

impl<'ctx> StateMachine<LoginCtx<'ctx>, LoginStepOut> for ChapAlgorithm {
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

/// Sub-state 0x0002: answer the challenge and move to Operational.
///
/// With target credentials configured a counter-challenge rides along and
/// the target's CHAP_N / CHAP_R are checked.
#[derive(Debug)]
pub struct ChapResponse;

impl ChapResponse {
    async fn run(ctx: &mut LoginCtx<'_>) -> Result<LoginStates> {
        let cfg = ctx.conn.cfg().chap().cloned().ok_or_else(|| {
            IscsiError::LoginInitiatorError(InitiatorErrorDetail::AuthFailed.describe())
        })?;
        let chap = ctx
            .chap
            .take()
            .ok_or(IscsiError::InvalidState("CHAP challenge"))?;

        let request = ctx.request(Stage::Security, Some(Stage::Operational));
        let mut text = ctx.text();
        text.add_key_value("CHAP_N", &cfg.username)?;
        text.add_key_binary(
            "CHAP_R",
            &chap_md5_response(chap.id, cfg.secret.as_bytes(), &chap.challenge),
        )?;

        let mutual = match (&cfg.target_username, &cfg.target_secret) {
            (Some(name), Some(secret)) => {
                let mut id = [0u8; 1];
                rand::rng().fill(&mut id);
                let challenge = generate_challenge();
                text.add_key_value("CHAP_I", &id[0].to_string())?;
                text.add_key_binary("CHAP_C", &challenge)?;
                Some((name.clone(), secret.clone(), id[0], challenge))
            },
            _ => None,
        };
        ctx.exchange(request, &text).await?;

        let flags = ctx.last_header()?.flags;
        if flags.csg() != Some(Stage::Security)
            || flags.nsg() != Some(Stage::Operational)
            || !flags.transit()
        {
            return Err(IscsiError::parse(format!(
                "unexpected CHAP response flags {flags:?}"
            )));
        }

        if let Some((name, secret, id, challenge)) = mutual {
            let data = ctx.last_data()?;
            let peer = get_key_value(data, "CHAP_N")?;
            let answer = decode_binary(get_key_value(data, "CHAP_R")?, CHAP_BINARY_CAPACITY)?;
            if peer != name || !verify_response(id, secret.as_bytes(), &challenge, &answer) {
                return Err(IscsiError::LoginInitiatorError(
                    InitiatorErrorDetail::AuthFailed.describe(),
                ));
            }
        }

        Ok(LoginStates::Operational(Operational))
    }
}

impl<'ctx> StateMachine<LoginCtx<'ctx>, LoginStepOut> for ChapResponse {
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
