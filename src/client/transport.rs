// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, net::SocketAddr, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, Interest, Ready},
    net::TcpStream,
    time::{Instant, timeout},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{
    client::common::io_with_timeout,
    error::{IscsiError, Result},
    models::{
        common::{DEFAULT_PORT, HEADER_LEN, ResponseHeader},
        pdu::InboundPdu,
    },
};

/// Splits `host`, `host:port`, `[v6]` or `[v6]:port` into host and port.
///
/// The port must be a complete, non-zero `u16`; it defaults to 3260.
pub fn parse_target_address(addr: &str) -> Result<(String, u16)> {
    let bad = || IscsiError::InvalidAddress(addr.to_string());

    let (host, port) = match addr.strip_prefix('[') {
        Some(rest) => {
            let (host, tail) = rest.split_once(']').ok_or_else(bad)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(bad)?)),
            }
        },
        None => match addr.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (addr, None),
        },
    };

    if host.is_empty() {
        return Err(bad());
    }
    let port = match port {
        None => DEFAULT_PORT,
        Some(p) => match p.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(bad()),
        },
    };
    Ok((host.to_string(), port))
}

/// One TCP connection to the target portal.
///
/// The socket is dropped on close and recreated by [`Transport::connect`];
/// the resolved portal survives reconnects.
#[derive(Debug, Default)]
pub struct Transport {
    stream: Option<TcpStream>,
    host: Option<String>,
    port: u16,
}

impl Transport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `target_address`, drops any previous socket and connects.
    pub async fn open(
        &mut self,
        target_address: &str,
        connect_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SocketAddr> {
        self.close();
        match parse_target_address(target_address) {
            Ok((host, port)) => {
                self.host = Some(host);
                self.port = port;
            },
            Err(e) => {
                self.host = None;
                self.port = 0;
                return Err(e);
            },
        }
        self.connect(connect_timeout, cancel).await
    }

    /// Connects to the portal set by [`Transport::open`] and returns the
    /// local address of the new socket.
    pub async fn connect(
        &mut self,
        connect_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<SocketAddr> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| IscsiError::InvalidAddress(String::new()))?;

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(IscsiError::SessionClosed),
            res = timeout(connect_timeout, TcpStream::connect((host, self.port))) => match res {
                Ok(Ok(s)) => s,
                Ok(Err(e)) => {
                    debug!("connect to {host}:{} failed: {e}", self.port);
                    return Err(IscsiError::from_connect_io(e));
                },
                Err(_) => return Err(IscsiError::Timeout),
            },
        };

        stream.set_nodelay(true).map_err(IscsiError::from_stream_io)?;
        let local = stream.local_addr().map_err(IscsiError::from_stream_io)?;
        if local.port() == 0 {
            return Err(IscsiError::InvalidAddress(local.to_string()));
        }
        self.stream = Some(stream);
        Ok(local)
    }

    /// Drops the socket. Returns whether one was open.
    pub fn close(&mut self) -> bool {
        self.stream.take().is_some()
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Reads exactly one PDU, failing with [`IscsiError::Timeout`] when
    /// `read_timeout` passes first.
    ///
    /// A peer close or reset drops the socket and yields
    /// [`IscsiError::BrokenPipe`].
    pub async fn blocking_read(
        &mut self,
        read_timeout: Duration,
        max_data_len: usize,
        cancel: &CancellationToken,
    ) -> Result<InboundPdu> {
        let deadline = Instant::now() + read_timeout;
        let res = self.read_pdu(deadline, max_data_len, cancel).await;
        if matches!(res, Err(IscsiError::BrokenPipe) | Err(IscsiError::ProtocolParse(_))) {
            self.close();
        }
        res
    }

    async fn read_pdu(
        &mut self,
        deadline: Instant,
        max_data_len: usize,
        cancel: &CancellationToken,
    ) -> Result<InboundPdu> {
        let stream = self.stream.as_mut().ok_or(IscsiError::BrokenPipe)?;

        let mut bhs = vec![0u8; HEADER_LEN];
        let left = deadline.saturating_duration_since(Instant::now());
        io_with_timeout("read BHS", stream.read_exact(&mut bhs), left, cancel).await?;

        let hdr = ResponseHeader::read(&bhs)?;
        if hdr.data_length_bytes() > max_data_len {
            return Err(IscsiError::parse(format!(
                "data segment of {} bytes exceeds {max_data_len}",
                hdr.data_length_bytes()
            )));
        }

        let mut body = vec![0u8; hdr.body_length_bytes()];
        if !body.is_empty() {
            let left = deadline.saturating_duration_since(Instant::now());
            io_with_timeout("read body", stream.read_exact(&mut body), left, cancel)
                .await?;
        }
        trace!("read PDU: opcode {:?} body {}", hdr.opcode, body.len());
        InboundPdu::from_parts(Bytes::from(bhs), Bytes::from(body))
    }

    /// Writes one serialized PDU in full.
    pub async fn blocking_write(
        &mut self,
        pdu: &[u8],
        write_timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(IscsiError::BrokenPipe)?;
        let res = io_with_timeout("write", stream.write_all(pdu), write_timeout, cancel).await;
        if matches!(res, Err(IscsiError::BrokenPipe)) {
            self.close();
        }
        res
    }

    /// Reads whatever is available without waiting. `Ok(0)` means the
    /// socket had nothing to give; a peer close is [`IscsiError::BrokenPipe`].
    pub fn read_nonblocking(&mut self, buf: &mut [u8]) -> Result<usize> {
        let stream = self.stream.as_ref().ok_or(IscsiError::BrokenPipe)?;
        match stream.try_read(buf) {
            Ok(0) if !buf.is_empty() => Err(IscsiError::BrokenPipe),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(IscsiError::from_stream_io(e)),
        }
    }

    /// Writes as much of `buf` as the socket accepts without waiting.
    pub fn write_nonblocking(&mut self, buf: &[u8]) -> Result<usize> {
        let stream = self.stream.as_ref().ok_or(IscsiError::BrokenPipe)?;
        match stream.try_write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(IscsiError::from_stream_io(e)),
        }
    }

    /// Waits for socket readiness. Without a socket this never resolves.
    pub async fn ready(&self, interest: Interest) -> Result<Ready> {
        match &self.stream {
            Some(stream) => stream.ready(interest).await.map_err(IscsiError::from_stream_io),
            None => std::future::pending().await,
        }
    }
}
