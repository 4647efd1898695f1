// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use tokio::{
    sync::{Mutex, mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::config::Config,
    client::{
        command::{
            Command, Completion, ExecCommand, ExecFuture, PendingCommand, ScsiOutcome,
            ScsiRequest,
        },
        engine::Engine,
    },
    error::{IscsiError, Result},
};

#[derive(Debug)]
enum Driver {
    /// Dedicated I/O task fed through a channel.
    Task {
        tx: mpsc::UnboundedSender<Command>,
        handle: Option<JoinHandle<()>>,
    },
    /// No I/O task: each call drives the engine under the session lock.
    Inline(Arc<Mutex<Engine>>),
}

/// Entry point for callers: submits SCSI commands over one iSCSI session.
///
/// With `HostIPStack=Yes` a spawned task owns the engine; otherwise every
/// call runs the engine on the calling task, one command at a time.
#[derive(Debug)]
pub struct Session {
    cfg: Arc<Config>,
    cancel: CancellationToken,
    driver: Driver,
}

impl Session {
    /// Builds the engine and, in task mode, spawns it on the current tokio
    /// runtime. No network traffic happens until [`Session::attach`].
    pub fn new(cfg: Arc<Config>) -> Result<Self> {
        let cancel = CancellationToken::new();
        let engine = Engine::new(cfg.clone(), cancel.clone())?;

        let driver = if cfg.runtime.host_ip_stack.as_bool() {
            let (tx, rx) = mpsc::unbounded_channel();
            let handle = tokio::spawn(engine.run(rx));
            Driver::Task {
                tx,
                handle: Some(handle),
            }
        } else {
            Driver::Inline(Arc::new(Mutex::new(engine)))
        };

        Ok(Self {
            cfg,
            cancel,
            driver,
        })
    }

    #[inline]
    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    /// `iscsi://<address>/<target>/<lun>`
    pub fn location(&self) -> String {
        self.cfg.compose_location()
    }

    pub fn name(&self) -> String {
        self.cfg.compose_name()
    }

    /// Runs `f` on the engine, serialized with command processing.
    pub async fn exec<F>(&self, f: F) -> Result<()>
    where F: for<'a> FnOnce(&'a mut Engine) -> ExecFuture<'a> + Send + 'static {
        match &self.driver {
            Driver::Task { tx, .. } => {
                let (done, wait) = oneshot::channel();
                tx.send(Command::Exec(ExecCommand {
                    func: Box::new(f),
                    done,
                }))
                .map_err(|_| IscsiError::SessionClosed)?;
                wait.await.map_err(|_| IscsiError::SessionClosed)?
            },
            Driver::Inline(engine) => {
                let mut engine = engine.lock().await;
                f(&mut *engine).await
            },
        }
    }

    /// Logs in to the configured target.
    pub async fn attach(&self) -> Result<()> {
        self.exec(|e| Box::pin(e.attach())).await
    }

    /// Logs out and drops the connection.
    pub async fn detach(&self) -> Result<()> {
        self.exec(|e| Box::pin(e.detach())).await
    }

    /// Allows one reconnect attempt on the next command submitted while the
    /// session is disconnected.
    pub async fn allow_reconnect(&self) -> Result<()> {
        self.exec(|e| {
            Box::pin(async move {
                e.allow_reconnect();
                Ok(())
            })
        })
        .await
    }

    /// Submits a command and waits for its outcome.
    pub async fn submit(&self, request: ScsiRequest) -> Result<ScsiOutcome> {
        let (done, mut wait) = oneshot::channel();
        let cmd = PendingCommand::new(
            request,
            Completion::Channel(done),
            self.cfg.runtime.sense_retries,
        );

        match &self.driver {
            Driver::Task { tx, .. } => {
                tx.send(Command::Scsi(cmd))
                    .map_err(|_| IscsiError::SessionClosed)?;
                wait.await.map_err(|_| IscsiError::SessionClosed)?
            },
            Driver::Inline(engine) => {
                let mut engine = engine.lock().await;
                engine.inbox.push_back(Command::Scsi(cmd));
                loop {
                    match wait.try_recv() {
                        Ok(res) => return res,
                        Err(oneshot::error::TryRecvError::Closed) => {
                            return Err(IscsiError::SessionClosed);
                        },
                        Err(oneshot::error::TryRecvError::Empty) => engine.turn().await,
                    }
                }
            },
        }
    }

    /// Submits a command without waiting. `on_complete` runs on the I/O task
    /// with the single outcome of the command.
    pub fn submit_async<F>(&self, request: ScsiRequest, on_complete: F) -> Result<()>
    where F: FnOnce(Result<ScsiOutcome>) + Send + 'static {
        match &self.driver {
            Driver::Task { tx, .. } => {
                let cmd = PendingCommand::new(
                    request,
                    Completion::Callback(Box::new(on_complete)),
                    self.cfg.runtime.sense_retries,
                );
                tx.send(Command::Scsi(cmd))
                    .map_err(|_| IscsiError::SessionClosed)
            },
            Driver::Inline(_) => Err(IscsiError::InvalidState("submit_async without an I/O task")),
        }
    }

    /// Logs out, stops the I/O task and fails whatever is still pending.
    pub async fn close(mut self) -> Result<()> {
        if let Err(e) = self.detach().await {
            warn!("iSCSI: detach on close failed: {e}");
        }
        self.cancel.cancel();
        match &mut self.driver {
            Driver::Task { handle, .. } => {
                if let Some(handle) = handle.take() {
                    if let Err(e) = handle.await {
                        warn!("iSCSI: I/O task ended abnormally: {e}");
                    }
                }
            },
            Driver::Inline(engine) => engine.lock().await.shutdown(),
        }
        debug!("session {} closed", self.name());
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
