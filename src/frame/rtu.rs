// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU framing: `address | function | data | CRC16-lo | CRC16-hi`.

use super::{DecodeError, Exception, Frame, FunctionCode};
use crate::crc;

/// Minimum possible RTU frame: address, function, two CRC bytes.
const MIN_FRAME_LEN: usize = 4;

/// A decoded RTU frame, mutated in place to become the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtuFrame {
    slave_id: u8,
    function: FunctionCode,
    data: Vec<u8>,
    exception: Option<Exception>,
}

impl RtuFrame {
    /// Parses one RTU frame out of `buf`, verifying its trailing CRC.
    ///
    /// Unlike [`super::tcp::TcpFrame::decode`], RTU carries no length
    /// prefix: the caller is expected to treat `buf` as "everything read
    /// so far since the last successful parse or CRC-triggered reset" and
    /// to clear or retain it based on which [`DecodeError`] comes back
    /// (see `crate::server::rtu`).
    pub(crate) fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < MIN_FRAME_LEN {
            return Err(DecodeError::Incomplete);
        }
        let body = &buf[..buf.len() - 2];
        let expected_crc =
            u16::from(buf[buf.len() - 2]) | (u16::from(buf[buf.len() - 1]) << 8);
        if !crc::check(body, expected_crc) {
            return Err(DecodeError::Crc);
        }
        Ok(Self {
            slave_id: body[0],
            function: body[1],
            data: body[2..].to_vec(),
            exception: None,
        })
    }

    /// Builds the response frame for this request: same slave id, empty
    /// body, ready for a handler to fill in.
    pub(crate) fn to_response(&self) -> Self {
        Self {
            slave_id: self.slave_id,
            function: self.function,
            data: Vec::new(),
            exception: None,
        }
    }
}

impl Frame for RtuFrame {
    fn address(&self) -> u8 {
        self.slave_id
    }

    fn function(&self) -> FunctionCode {
        self.function
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn set_data(&mut self, data: Vec<u8>) {
        self.exception = None;
        self.data = data;
    }

    fn set_exception(&mut self, exception: Exception) {
        self.exception = Some(exception);
        self.data = vec![exception.code()];
    }

    fn exception(&self) -> Option<Exception> {
        self.exception
    }

    fn encode(&self) -> Vec<u8> {
        let function = if self.exception.is_some() {
            self.function | 0x80
        } else {
            self.function
        };
        let mut out = Vec::with_capacity(MIN_FRAME_LEN + self.data.len());
        out.push(self.slave_id);
        out.push(function);
        out.extend_from_slice(&self.data);
        let crc = crc::crc16(&out);
        out.push((crc & 0xFF) as u8);
        out.push((crc >> 8) as u8);
        out
    }

    fn to_response_boxed(&self) -> Box<dyn Frame> {
        Box::new(self.to_response())
    }
}
