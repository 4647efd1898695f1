// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Whole-PDU framing: building outbound byte streams and reassembling
//! inbound PDUs from partial socket reads.

use bytes::{BufMut, Bytes, BytesMut};
use zerocopy::{Immutable, IntoBytes};

use crate::{
    error::{IscsiError, Result},
    models::common::{
        HEADER_LEN, MAX_DATA_SEGMENT_LENGTH, ResponseHeader, encode_data_length, pad_len,
    },
};

/// Growable buffer holding one serialized PDU: BHS followed by the padded
/// data segment.
#[derive(Debug)]
pub struct PduBuilder {
    buf: BytesMut,
}

impl PduBuilder {
    pub fn new<H: IntoBytes + Immutable>(header: &H) -> Self {
        let bhs = header.as_bytes();
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_slice(bhs);
        Self { buf }
    }

    /// Appends the data segment, gathered from `segments`, then pads to a
    /// word boundary and patches DataSegmentLength in the BHS.
    pub fn append_padded<I, B>(&mut self, segments: I) -> Result<()>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let start = self.buf.len();
        for seg in segments {
            self.buf.put_slice(seg.as_ref());
        }
        let data_len = self.buf.len() - start;
        if data_len > MAX_DATA_SEGMENT_LENGTH as usize {
            return Err(IscsiError::BufferOverflow);
        }
        self.buf.put_bytes(0, pad_len(data_len));
        self.buf[5..8].copy_from_slice(&encode_data_length(data_len as u32));
        Ok(())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

/// A complete PDU received from the target.
#[derive(Debug, Clone)]
pub struct InboundPdu {
    pub header: ResponseHeader,
    /// The raw 48-byte BHS, for typed views.
    pub bhs: Bytes,
    /// Data segment without AHS and padding.
    pub data: Bytes,
}

impl InboundPdu {
    /// Splits `bhs` + `body` (AHS, data, padding) into a PDU.
    pub fn from_parts(bhs: Bytes, body: Bytes) -> Result<Self> {
        let header = ResponseHeader::read(&bhs)?;
        let ahs = header.ahs_length_bytes();
        let ahs_padded = ahs + pad_len(ahs);
        let data_len = header.data_length_bytes();
        if body.len() < ahs_padded + data_len {
            return Err(IscsiError::parse(format!(
                "PDU body {} shorter than AHS {ahs_padded} + data {data_len}",
                body.len()
            )));
        }
        let data = body.slice(ahs_padded..ahs_padded + data_len);
        Ok(Self { header, bhs, data })
    }

    /// Whole PDU as it travelled, for malformed-packet dumps.
    pub fn segments(&self) -> [&[u8]; 2] {
        [&self.bhs, &self.data]
    }
}

/// Reassembles one inbound PDU out of arbitrarily split reads.
///
/// The BHS is collected first; once it is complete the remaining length is
/// known from the AHS-length and DataSegmentLength fields.
#[derive(Debug)]
pub struct ReceiveBuffer {
    buf: Vec<u8>,
    filled: usize,
    header_done: bool,
    max_data_len: usize,
}

impl Default for ReceiveBuffer {
    fn default() -> Self {
        Self::new(MAX_DATA_SEGMENT_LENGTH as usize)
    }
}

impl ReceiveBuffer {
    pub fn new(max_data_len: usize) -> Self {
        Self {
            buf: vec![0u8; HEADER_LEN],
            filled: 0,
            header_done: false,
            max_data_len,
        }
    }

    /// Drops any partially received PDU.
    pub fn reset(&mut self) {
        self.buf.truncate(HEADER_LEN);
        self.filled = 0;
        self.header_done = false;
    }

    /// Writable window for the next read.
    pub fn unfilled(&mut self) -> &mut [u8] {
        let filled = self.filled;
        &mut self.buf[filled..]
    }

    /// Accounts for `n` bytes read into [`Self::unfilled`]. Returns the PDU
    /// once it is complete.
    pub fn advance(&mut self, n: usize) -> Result<Option<InboundPdu>> {
        self.filled += n;
        if self.filled < self.buf.len() {
            return Ok(None);
        }

        if !self.header_done {
            let hdr = ResponseHeader::read(&self.buf)?;
            if hdr.data_length_bytes() > self.max_data_len {
                return Err(IscsiError::parse(format!(
                    "data segment of {} bytes exceeds {}",
                    hdr.data_length_bytes(),
                    self.max_data_len
                )));
            }
            self.header_done = true;
            let body = hdr.body_length_bytes();
            if body > 0 {
                self.buf.resize(HEADER_LEN + body, 0);
                return Ok(None);
            }
        }

        let mut raw = std::mem::replace(&mut self.buf, vec![0u8; HEADER_LEN]);
        let body = Bytes::from(raw.split_off(HEADER_LEN));
        self.filled = 0;
        self.header_done = false;
        InboundPdu::from_parts(Bytes::from(raw), body).map(Some)
    }
}
