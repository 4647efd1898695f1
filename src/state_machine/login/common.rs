// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tracing::{debug, error, info};

use crate::{
    client::connection::{Connection, SequenceState, SessionState},
    error::{IscsiError, Result},
    models::{
        common::{BasicHeaderSegment, MAX_DATA_SEGMENT_LENGTH, PROTOCOL_VERSION},
        login::{
            common::Stage, request::LoginRequestBuilder, response::LoginResponse,
            status::StatusClass,
        },
        pdu::{InboundPdu, PduBuilder},
        text::codec::{TextBuffer, get_key_value},
    },
    state_machine::{
        common::{StateMachine, StateMachineCtx, Transition},
        login::{
            login_chap::{ChapAlgorithm, ChapResponse},
            login_plain::{Operational, SecurityStart},
        },
    },
    utils::isid_bytes,
};

/// The only connection of the session.
pub const LOGIN_CID: u16 = 1;

/// Room for the key=value text of one Login Request. Independent of
/// `WriteSplit`, which only bounds SCSI data.
pub const LOGIN_TEXT_LEN: usize = 4096;

/// Keys that bound how much data one PDU of ours may carry.
const SEND_LENGTH_KEYS: [&str; 3] = [
    "MaxRecvDataSegmentLength",
    "MaxBurstLength",
    "FirstBurstLength",
];

/// Challenge received from the target in the CHAP_A round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapChallenge {
    pub id: u8,
    pub challenge: Vec<u8>,
}

#[derive(Debug)]
pub struct LoginCtx<'a> {
    pub conn: &'a mut Connection,
    pub isid: [u8; 6],
    pub cid: u16,
    pub itt: u32,

    pub last_response: Option<InboundPdu>,
    pub chap: Option<ChapChallenge>,
    /// Number of completed round trips.
    pub round_trips: u32,
    pub(super) operational_sent: bool,

    state: Option<LoginStates>,
}

impl<'a> LoginCtx<'a> {
    /// Resets the sequence state and allocates the task tag shared by every
    /// Login Request of this attempt.
    pub fn new(conn: &'a mut Connection) -> Self {
        conn.seq = SequenceState::login_start();
        conn.recv_len = MAX_DATA_SEGMENT_LENGTH;
        conn.send_len = MAX_DATA_SEGMENT_LENGTH.min(conn.cfg().runtime.write_split);
        conn.state = SessionState::InLogin;
        let itt = conn.seq.new_itt();
        let isid = isid_bytes(conn.isid);
        Self {
            conn,
            isid,
            cid: LOGIN_CID,
            itt,
            last_response: None,
            chap: None,
            round_trips: 0,
            operational_sent: false,
            state: Some(LoginStates::SecurityStart(SecurityStart)),
        }
    }

    /// BHS for the next Login Request; `next` requests a stage transition.
    pub(super) fn request(&self, csg: Stage, next: Option<Stage>) -> LoginRequestBuilder {
        let builder = LoginRequestBuilder::new(self.isid, 0)
            .csg(csg)
            .initiator_task_tag(self.itt)
            .connection_id(self.cid)
            .cmd_sn(self.conn.seq.cmd_sn)
            .exp_stat_sn(self.conn.seq.exp_stat_sn);
        match next {
            Some(stage) => builder.transit_to(stage),
            None => builder,
        }
    }

    pub(super) fn text(&self) -> TextBuffer {
        TextBuffer::with_capacity(LOGIN_TEXT_LEN)
    }

    /// Sends one Login Request and waits for its response.
    ///
    /// A transport failure anywhere in the round trip becomes
    /// [`IscsiError::RetryAfterDisconnect`].
    pub(super) async fn exchange(
        &mut self,
        request: LoginRequestBuilder,
        text: &TextBuffer,
    ) -> Result<()> {
        let mut pdu = PduBuilder::new(&request.header);
        pdu.append_padded([text.as_bytes()])?;
        let pdu = pdu.freeze();

        self.conn
            .send_pdu_blocking(&pdu)
            .await
            .map_err(retry_on_disconnect)?;
        let rsp = self
            .conn
            .recv_pdu_blocking(self.itt)
            .await
            .map_err(retry_on_disconnect)?;

        self.check_response(&rsp)?;
        self.round_trips += 1;
        self.last_response = Some(rsp);
        Ok(())
    }

    /// Status-class handling shared by every login step. Only `Success`
    /// returns `Ok`.
    fn check_response(&mut self, pdu: &InboundPdu) -> Result<()> {
        let rsp = LoginResponse::from_bhs_bytes(&pdu.bhs)?;
        if rsp.version_active != PROTOCOL_VERSION {
            return Err(IscsiError::parse(format!(
                "unsupported active version {}",
                rsp.version_active
            )));
        }

        match rsp.class() {
            StatusClass::Success => {
                if self.conn.seq.first_recv_pdu {
                    self.conn.seq.exp_stat_sn = rsp.stat_sn.get().wrapping_add(1);
                    self.conn.seq.first_recv_pdu = false;
                }
                update_parameters(self.conn, &pdu.data)
            },
            StatusClass::Redirection => {
                let addr = get_key_value(&pdu.data, "TargetAddress")?;
                // Drop the portal group tag, if any.
                let addr = addr.split(',').next().unwrap_or(addr).to_string();
                info!(
                    "iSCSI: target {} redirected to {addr}",
                    self.conn.cfg().target.target_name
                );
                self.conn.target_address = addr.clone();
                Err(IscsiError::Redirect(addr))
            },
            StatusClass::InitiatorError => {
                let detail = rsp.initiator_error().describe();
                error!(
                    "iSCSI: login to target {} failed with: {detail}",
                    self.conn.cfg().target.target_name
                );
                Err(IscsiError::LoginInitiatorError(detail))
            },
            StatusClass::TargetError => Err(IscsiError::LoginTargetError(rsp.status_detail)),
            StatusClass::Unknown(class) => {
                Err(IscsiError::parse(format!("unknown login status class {class}")))
            },
        }
    }

    /// Typed view of the last Login Response.
    pub(super) fn last_header(&self) -> Result<&LoginResponse> {
        match &self.last_response {
            Some(pdu) => LoginResponse::from_bhs_bytes(&pdu.bhs),
            None => Err(IscsiError::InvalidState("login response")),
        }
    }

    pub(super) fn last_data(&self) -> Result<&[u8]> {
        match &self.last_response {
            Some(pdu) => Ok(&pdu.data),
            None => Err(IscsiError::InvalidState("login response")),
        }
    }
}

fn retry_on_disconnect(e: IscsiError) -> IscsiError {
    if e.is_connection_lost() {
        IscsiError::RetryAfterDisconnect
    } else {
        e
    }
}

/// Narrows the outbound data length by whatever limits the target announced.
pub fn update_parameters(conn: &mut Connection, text: &[u8]) -> Result<()> {
    for key in SEND_LENGTH_KEYS {
        let value = match get_key_value(text, key) {
            Ok(v) => v,
            Err(IscsiError::KeyNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        let limit = value
            .parse::<u32>()
            .map_err(|_| IscsiError::MalformedValue(format!("{key}={value}")))?;
        conn.send_len = conn.send_len.min(limit);
    }
    Ok(())
}

pub type LoginStepOut = Transition<LoginStates, Result<()>>;

#[derive(Debug)]
pub enum LoginStates {
    /// Sub-state 0x0000: session keys and AuthMethod offer.
    SecurityStart(SecurityStart),
    /// Sub-state 0x0001: CHAP_A.
    ChapAlgorithm(ChapAlgorithm),
    /// Sub-state 0x0002: CHAP_N / CHAP_R.
    ChapResponse(ChapResponse),
    /// Sub-state 0x0100: operational parameters.
    Operational(Operational),
}

impl<'ctx> StateMachineCtx<LoginCtx<'ctx>> for LoginCtx<'ctx> {
    async fn execute(&mut self) -> Result<()> {
        loop {
            let state = self
                .state
                .take()
                .ok_or(IscsiError::InvalidState("login state"))?;
            debug!("login step {state:?}");
            let tr = match &state {
                LoginStates::SecurityStart(s) => s.step(self).await,
                LoginStates::ChapAlgorithm(s) => s.step(self).await,
                LoginStates::ChapResponse(s) => s.step(self).await,
                LoginStates::Operational(s) => s.step(self).await,
            };

            match tr {
                Transition::Next(next, r) => {
                    r?;
                    self.state = Some(next);
                },
                Transition::Stay(r) => {
                    r?;
                    self.state = Some(state);
                },
                Transition::Done(r) => return r,
            }
        }
    }
}

/// Runs a complete login on `conn`, connecting first if needed.
///
/// Leaves the session in `Normal` on success. On any failure but
/// [`IscsiError::RetryAfterDisconnect`] the socket is closed and the session
/// returns to `Free`.
pub async fn perform_login(conn: &mut Connection) -> Result<()> {
    if !conn.is_connected() {
        conn.open().await?;
    }

    let res = LoginCtx::new(conn).execute().await;
    match &res {
        Ok(()) => conn.state = SessionState::Normal,
        Err(IscsiError::RetryAfterDisconnect) => {},
        Err(_) => {
            conn.close();
            conn.state = SessionState::Free;
        },
    }
    res
}
