// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP (Modbus Application Protocol) framing, shared verbatim by the plain
//! TCP and TLS-over-TCP listeners: TLS only changes the byte source, not the
//! wire format (see `crate::server::tls`).

use super::{DecodeError, Exception, Frame, FunctionCode};

const MBAP_HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0x0000;

pub(crate) type TransactionId = u16;
pub(crate) type UnitId = u8;

/// A decoded MBAP + PDU frame, mutated in place to become the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpFrame {
    transaction_id: TransactionId,
    unit_id: UnitId,
    function: FunctionCode,
    data: Vec<u8>,
    exception: Option<Exception>,
}

impl TcpFrame {
    /// Parses one MBAP ADU from the front of `buf`.
    ///
    /// On success returns the frame and the number of bytes it consumed,
    /// so the caller can drain exactly that many bytes and re-attempt a
    /// parse on whatever is left (MBAP's length field tolerates a peer
    /// that writes a request across more than one TCP segment).
    pub(crate) fn decode(buf: &[u8]) -> Result<(Self, usize), DecodeError> {
        if buf.len() < MBAP_HEADER_LEN + 1 {
            return Err(DecodeError::Incomplete);
        }
        let transaction_id = u16::from_be_bytes([buf[0], buf[1]]);
        let protocol_id = u16::from_be_bytes([buf[2], buf[3]]);
        if protocol_id != PROTOCOL_ID {
            return Err(DecodeError::Protocol);
        }
        let length = u16::from_be_bytes([buf[4], buf[5]]) as usize;
        if length == 0 {
            return Err(DecodeError::Protocol);
        }
        let adu_len = MBAP_HEADER_LEN - 1 + length;
        if buf.len() < adu_len {
            return Err(DecodeError::Incomplete);
        }
        let unit_id = buf[6];
        let function = buf[7];
        let data = buf[8..adu_len].to_vec();
        Ok((
            Self {
                transaction_id,
                unit_id,
                function,
                data,
                exception: None,
            },
            adu_len,
        ))
    }

    /// Builds the response frame for this request: same transaction id and
    /// unit id, empty body, ready for a handler to fill in via
    /// [`Frame::set_data`] / [`Frame::set_exception`].
    pub(crate) fn to_response(&self) -> Self {
        Self {
            transaction_id: self.transaction_id,
            unit_id: self.unit_id,
            function: self.function,
            data: Vec::new(),
            exception: None,
        }
    }
}

impl Frame for TcpFrame {
    fn address(&self) -> u8 {
        self.unit_id
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
        let length = 2 + self.data.len();
        let mut out = Vec::with_capacity(MBAP_HEADER_LEN + 1 + self.data.len());
        out.extend_from_slice(&self.transaction_id.to_be_bytes());
        out.extend_from_slice(&PROTOCOL_ID.to_be_bytes());
        out.extend_from_slice(&(length as u16).to_be_bytes());
        out.push(self.unit_id);
        out.push(function);
        out.extend_from_slice(&self.data);
        out
    }

    fn to_response_boxed(&self) -> Box<dyn Frame> {
        Box::new(self.to_response())
    }
}
