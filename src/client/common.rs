// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{IscsiError, Result};

/// Runs a socket future under a deadline and the session's cancellation.
///
/// Expiry yields [`IscsiError::Timeout`], cancellation
/// [`IscsiError::SessionClosed`]; I/O errors are normalized through
/// [`IscsiError::from_stream_io`].
pub(super) async fn io_with_timeout<F, T>(
    label: &'static str,
    fut: F,
    io_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(IscsiError::SessionClosed),
        res = timeout(io_timeout, fut) => {
            match res {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => {
                    trace!("{label} failed: {e}");
                    Err(IscsiError::from_stream_io(e))
                },
                Err(_) => Err(IscsiError::Timeout),
            }
        }
    }
}
