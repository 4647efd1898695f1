// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Result, ensure};
use bytes::Bytes;
use iscsi_initiator_rs::{
    cfg::enums::YesNo,
    client::{
        command::{ScsiOutcome, ScsiRequest},
        session::Session,
    },
    error::IscsiError,
    models::common::RESERVED_TAG,
};
use tokio::{sync::oneshot, time::timeout};

use crate::unit_tests::common::{
    FakeTarget, OP_SCSI_CMD, TARGET_NAME, arc, listen, test_config,
};

const TEST_UNIT_READY: [u8; 6] = [0; 6];
const READ_10_ONE_BLOCK: [u8; 10] = [0x28, 0, 0, 0, 0, 0x10, 0, 0, 1, 0];
const WRITE_10_ONE_BLOCK: [u8; 10] = [0x2a, 0, 0, 0, 0, 0x10, 0, 0, 1, 0];

/// Fixed-format sense: UNIT ATTENTION, power on or reset occurred.
const UNIT_ATTENTION: [u8; 18] = [
    0x70, 0, 0x06, 0, 0, 0, 0, 0x0a, 0, 0, 0, 0, 0x29, 0x00, 0, 0, 0, 0,
];

fn block(fill: u8) -> Vec<u8> {
    vec![fill; 512]
}

#[tokio::test]
async fn read_waits_for_command_window() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.window = 0;
        target.login_plain().await?;

        let tur = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(tur.cmd_sn() == 1 && tur.edtl() == 0);
        // MaxCmdSN = ExpCmdSN - 1 closes the window
        target.scsi_response(&tur, 0, &[]).await?;

        target.expect_silence(Duration::from_millis(300)).await?;
        target.window = 1;
        target.nop_in(RESERVED_TAG).await?;

        let read = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(read.cmd_sn() == 2, "CmdSN {}", read.cmd_sn());
        ensure!(read.edtl() == 1024);
        ensure!(read.bhs[1] & 0x40 != 0, "READ bit not set");
        target.data_in_partial(&read, 0, &block(0xaa)).await?;
        target.data_in_final(&read, &block(0xbb)).await?;
        anyhow::Ok(())
    });

    let session = Session::new(arc(test_config(&addr)))?;
    assert_eq!(session.location(), format!("iscsi://{addr}/{TARGET_NAME}/0"));
    session.attach().await?;

    let tur = session.submit(ScsiRequest::none(&TEST_UNIT_READY)).await?;
    assert_eq!(tur, ScsiOutcome::default());

    let read = session.submit(ScsiRequest::read(&READ_10_ONE_BLOCK, 1024)).await?;
    assert_eq!(read.status, 0);
    assert_eq!(read.data.len(), 1024);
    assert_eq!(&read.data[..512], &block(0xaa)[..]);
    assert_eq!(&read.data[512..], &block(0xbb)[..]);

    server.await??;
    Ok(())
}

#[tokio::test]
async fn write_carries_immediate_data() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;

        let write = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(write.edtl() == 512);
        ensure!(write.bhs[1] & 0x20 != 0, "WRITE bit not set");
        ensure!(write.data.len() == 512);
        ensure!(write.data[..256] == [1u8; 256][..] && write.data[256..] == [2u8; 256][..]);
        target.scsi_response(&write, 0, &[]).await?;

        // the rejected commands did not use up a CmdSN
        let tur = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(tur.cmd_sn() == write.cmd_sn().wrapping_add(1));
        target.scsi_response(&tur, 0, &[]).await?;
        target.logout().await?;
        anyhow::Ok(())
    });

    let session = Session::new(arc(test_config(&addr)))?;
    session.attach().await?;

    let outcome = session
        .submit(ScsiRequest::write(
            &WRITE_10_ONE_BLOCK,
            vec![Bytes::from(vec![1u8; 256]), Bytes::from(vec![2u8; 256])],
        ))
        .await?;
    assert_eq!(outcome.status, 0);
    assert_eq!(outcome.transferred, 512);

    // more than the negotiated 8192 bytes of immediate data
    let big = session
        .submit(ScsiRequest::write(&WRITE_10_ONE_BLOCK, vec![Bytes::from(vec![0u8; 8193])]))
        .await;
    assert!(matches!(big, Err(IscsiError::BufferOverflow)), "{big:?}");

    let empty = session.submit(ScsiRequest::none(&[])).await;
    assert!(matches!(empty, Err(IscsiError::MalformedValue(_))), "{empty:?}");

    session.submit(ScsiRequest::none(&TEST_UNIT_READY)).await?;
    session.close().await?;

    server.await??;
    Ok(())
}

#[tokio::test]
async fn sense_data_triggers_resubmission() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;

        let first = target.recv_op(OP_SCSI_CMD).await?;
        target.scsi_response(&first, 0x02, &UNIT_ATTENTION).await?;
        let retry = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(retry.itt() != first.itt(), "retry reused ITT {}", first.itt());
        ensure!(retry.cmd_sn() == first.cmd_sn().wrapping_add(1));
        ensure!(retry.bhs[32..48] == first.bhs[32..48], "CDB changed");
        target.scsi_response(&retry, 0, &[]).await?;

        // no retries left for this one
        let once = target.recv_op(OP_SCSI_CMD).await?;
        target.scsi_response(&once, 0x02, &UNIT_ATTENTION).await?;
        target.expect_silence(Duration::from_millis(200)).await?;
        anyhow::Ok(())
    });

    let session = Session::new(arc(test_config(&addr)))?;
    session.attach().await?;

    let ok = session.submit(ScsiRequest::none(&TEST_UNIT_READY)).await?;
    assert_eq!(ok.status, 0);

    let res = session
        .submit(
            ScsiRequest::none(&TEST_UNIT_READY)
                .with_sense_retries(0)
                .with_sense_budget(14),
        )
        .await;
    match res {
        Err(IscsiError::CheckCondition { status, sense }) => {
            assert_eq!(status, 0x02);
            assert_eq!(sense, UNIT_ATTENTION[..14]);
        },
        other => panic!("expected CHECK CONDITION, got {other:?}"),
    }

    server.await??;
    Ok(())
}

#[tokio::test]
async fn reconnect_resends_outstanding_commands() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;
        target.recv_op(OP_SCSI_CMD).await?;
        target.recv_op(OP_SCSI_CMD).await?;
        drop(target);

        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;
        let a = target.recv_op(OP_SCSI_CMD).await?;
        let b = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(a.cmd_sn() == 1 && b.cmd_sn() == 2, "CmdSN restarts after login");
        ensure!(a.itt() != 1 && b.itt() != 1, "login tag reused");
        target.data_in_final(&a, &block(0x11)).await?;
        target.data_in_final(&b, &block(0x22)).await?;
        anyhow::Ok(())
    });

    let session = Session::new(arc(test_config(&addr)))?;
    session.attach().await?;

    let (a, b) = tokio::join!(
        session.submit(ScsiRequest::read(&READ_10_ONE_BLOCK, 512)),
        session.submit(ScsiRequest::read(&READ_10_ONE_BLOCK, 512)),
    );
    let (a, b) = (a?, b?);
    assert_eq!(a.data.len(), 512);
    assert_eq!(b.data.len(), 512);
    assert_ne!(a.data, b.data);

    server.await??;
    Ok(())
}

#[tokio::test]
async fn repeated_logins_without_io_give_up() -> Result<()> {
    let (listener, addr) = listen().await?;
    let session = Session::new(arc(test_config(&addr)))?;

    // kept open so the idle engine does not notice a closed peer
    let mut targets = Vec::new();
    for _ in 0..3 {
        let (res, target) = tokio::join!(session.attach(), async {
            let mut target = FakeTarget::accept(&listener).await?;
            target.login_plain().await?;
            anyhow::Ok(target)
        });
        res?;
        targets.push(target?);
    }

    let res = session.attach().await;
    assert!(matches!(res, Err(IscsiError::BrokenPipe)), "{res:?}");
    let connect = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(connect.is_err(), "initiator connected again");
    Ok(())
}

#[tokio::test]
async fn detached_session_reconnects_on_demand() -> Result<()> {
    let (listener, addr) = listen().await?;
    let (logged_out_tx, logged_out_rx) = oneshot::channel();
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;
        let logout = target.logout().await?;
        ensure!(logout.bhs[1] == 0x80, "reason must be close session");
        ensure!(logout.cmd_sn() == 1);
        let _ = logged_out_tx.send(());

        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;
        let tur = target.recv_op(OP_SCSI_CMD).await?;
        target.scsi_response(&tur, 0, &[]).await?;
        anyhow::Ok(())
    });

    let session = Session::new(arc(test_config(&addr)))?;
    session.attach().await?;
    session.detach().await?;
    logged_out_rx.await?;

    let res = session.submit(ScsiRequest::none(&TEST_UNIT_READY)).await;
    assert!(matches!(res, Err(IscsiError::ConnectionRefused)), "{res:?}");

    session.allow_reconnect().await?;
    session.submit(ScsiRequest::none(&TEST_UNIT_READY)).await?;

    server.await??;
    Ok(())
}

#[tokio::test]
async fn callback_completion() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;
        let read = target.recv_op(OP_SCSI_CMD).await?;
        target.data_in_final(&read, &block(0x5a)).await?;
        anyhow::Ok(())
    });

    let session = Session::new(arc(test_config(&addr)))?;
    session.attach().await?;

    let (tx, rx) = oneshot::channel();
    session.submit_async(ScsiRequest::read(&READ_10_ONE_BLOCK, 512), move |res| {
        let _ = tx.send(res);
    })?;
    let outcome = timeout(Duration::from_secs(5), rx).await???;
    assert_eq!(&outcome.data[..], &block(0x5a)[..]);

    server.await??;
    Ok(())
}

#[tokio::test]
async fn inline_mode_without_io_task() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;
        let read = target.recv_op(OP_SCSI_CMD).await?;
        target.data_in_final(&read, &block(0x33)).await?;
        target.logout().await?;
        anyhow::Ok(())
    });

    let mut cfg = test_config(&addr);
    cfg.runtime.host_ip_stack = YesNo::No;
    let session = Session::new(arc(cfg))?;
    session.attach().await?;

    let read = session.submit(ScsiRequest::read(&READ_10_ONE_BLOCK, 512)).await?;
    assert_eq!(&read.data[..], &block(0x33)[..]);

    let res = session.submit_async(ScsiRequest::none(&TEST_UNIT_READY), |_| {});
    assert!(matches!(res, Err(IscsiError::InvalidState(_))), "{res:?}");

    session.close().await?;
    server.await??;
    Ok(())
}

#[tokio::test]
async fn target_ping_is_answered() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.login_plain().await?;

        let tur = target.recv_op(OP_SCSI_CMD).await?;
        target.nop_in(0x1234).await?;
        let pong = target.recv().await?;
        ensure!(pong.opcode() == 0x00 && pong.immediate());
        ensure!(pong.itt() == RESERVED_TAG && pong.ttt() == 0x1234);
        ensure!(pong.cmd_sn() == tur.cmd_sn().wrapping_add(1), "ping consumed a CmdSN");
        target.scsi_response(&tur, 0, &[]).await?;
        anyhow::Ok(())
    });

    let session = Session::new(arc(test_config(&addr)))?;
    session.attach().await?;
    session.submit(ScsiRequest::none(&TEST_UNIT_READY)).await?;

    server.await??;
    Ok(())
}

#[tokio::test]
async fn small_write_split_limits_only_scsi_data() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        let operational = target.login_plain().await?;
        ensure!(
            operational.data.len() > 64,
            "operational text of {} bytes",
            operational.data.len()
        );

        let write = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(write.edtl() == 64 && write.data == [7u8; 64]);
        target.scsi_response(&write, 0, &[]).await?;
        target.logout().await?;
        anyhow::Ok(())
    });

    let mut cfg = test_config(&addr);
    cfg.runtime.write_split = 64;
    cfg.validate_and_normalize()?;
    let session = Session::new(arc(cfg))?;
    session.attach().await?;

    let outcome = session
        .submit(ScsiRequest::write(&WRITE_10_ONE_BLOCK, vec![Bytes::from(vec![7u8; 64])]))
        .await?;
    assert_eq!(outcome.transferred, 64);

    let over = session
        .submit(ScsiRequest::write(&WRITE_10_ONE_BLOCK, vec![Bytes::from(vec![7u8; 65])]))
        .await;
    assert!(matches!(over, Err(IscsiError::BufferOverflow)), "{over:?}");

    session.close().await?;
    server.await??;
    Ok(())
}

#[tokio::test]
async fn silent_target_triggers_relogin() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut stale = FakeTarget::accept(&listener).await?;
        stale.login_plain().await?;
        let first = stale.recv_op(OP_SCSI_CMD).await?;

        // never answered; the initiator has to log in again
        let mut target = FakeTarget::accept(&listener).await?;
        ensure!(stale.recv().await.is_err(), "stale connection still open");
        target.login_plain().await?;
        let again = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(again.cmd_sn() == 1, "CmdSN {}", again.cmd_sn());
        ensure!(again.bhs[32..48] == first.bhs[32..48], "CDB changed");
        target.data_in_final(&again, &block(0x44)).await?;
        anyhow::Ok(())
    });

    let mut cfg = test_config(&addr);
    cfg.runtime.timeout = Duration::from_millis(300);
    let session = Session::new(arc(cfg))?;
    session.attach().await?;

    let read = timeout(
        Duration::from_secs(5),
        session.submit(ScsiRequest::read(&READ_10_ONE_BLOCK, 512)),
    )
    .await??;
    assert_eq!(&read.data[..], &block(0x44)[..]);

    server.await??;
    Ok(())
}

#[tokio::test]
async fn inline_mode_waits_for_closed_window() -> Result<()> {
    let (listener, addr) = listen().await?;
    let server = tokio::spawn(async move {
        let mut target = FakeTarget::accept(&listener).await?;
        target.window = 0;
        target.login_plain().await?;

        let tur = target.recv_op(OP_SCSI_CMD).await?;
        target.scsi_response(&tur, 0, &[]).await?;

        // longer than the read timeout, with nothing awaiting a response
        target.expect_silence(Duration::from_millis(700)).await?;
        target.window = 1;
        target.nop_in(RESERVED_TAG).await?;

        let next = target.recv_op(OP_SCSI_CMD).await?;
        ensure!(next.cmd_sn() == 2, "CmdSN {}", next.cmd_sn());
        target.scsi_response(&next, 0, &[]).await?;
        target.logout().await?;
        anyhow::Ok(())
    });

    let mut cfg = test_config(&addr);
    cfg.runtime.host_ip_stack = YesNo::No;
    cfg.runtime.timeout = Duration::from_millis(300);
    let session = Session::new(arc(cfg))?;
    session.attach().await?;

    session.submit(ScsiRequest::none(&TEST_UNIT_READY)).await?;
    timeout(
        Duration::from_secs(5),
        session.submit(ScsiRequest::none(&TEST_UNIT_READY)),
    )
    .await??;

    session.close().await?;
    server.await??;
    Ok(())
}
