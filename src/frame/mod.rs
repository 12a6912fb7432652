// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-independent ADU framing.
//!
//! [`tcp::TcpFrame`] and [`rtu::RtuFrame`] both implement [`Frame`], giving
//! the dispatcher (`crate::dispatcher`) a single PDU-shaped view of a
//! request regardless of which transport it arrived on.

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "tcp")]
pub mod tcp;

use std::fmt;

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub(crate) type FunctionCode = u8;

/// A Modbus protocol address is represented by 16 bit from `0` to `65535`.
pub(crate) type Address = u16;

/// Number of items to process (`0` - `65535`).
pub(crate) type Quantity = u16;

/// A server (slave) exception, carried back to the master in the response
/// PDU with the function code's high bit set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    SlaveDeviceBusy = 0x06,
}

impl Exception {
    pub(crate) fn code(self) -> u8 {
        self as u8
    }

    fn description(self) -> &'static str {
        use Exception::*;
        match self {
            IllegalFunction => "illegal function",
            IllegalDataAddress => "illegal data address",
            IllegalDataValue => "illegal data value",
            SlaveDeviceFailure => "slave device failure",
            SlaveDeviceBusy => "slave device busy",
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl std::error::Error for Exception {}

/// A decoded, transport-agnostic view of a single Modbus ADU: a unit/slave
/// address, a function code and a PDU data payload, plus a slot for the
/// exception a handler may set while building the response in place.
///
/// Implementors own the transport-specific header (MBAP transaction id for
/// TCP/TLS, unit id only for RTU) and know how to re-serialize themselves
/// for the reply, including any transport-specific trailer (the RTU CRC).
pub trait Frame: fmt::Debug + Send {
    /// Unit/slave identifier this request targets.
    fn address(&self) -> u8;

    /// The Modbus function code. Handlers mutate `self` in place to turn
    /// a decoded request into its response.
    fn function(&self) -> FunctionCode;

    /// The PDU data bytes following the function code.
    fn data(&self) -> &[u8];

    /// Replace the PDU data with a handler's successful response payload.
    fn set_data(&mut self, data: Vec<u8>);

    /// Mark this frame as an exception response, discarding any data
    /// previously set via [`Frame::set_data`].
    fn set_exception(&mut self, exception: Exception);

    /// The exception set on this frame, if any.
    fn exception(&self) -> Option<Exception>;

    /// Serialize this frame back to wire bytes, ready to hand to a
    /// [`crate::banks::RequestSink`].
    fn encode(&self) -> Vec<u8>;

    /// Builds an empty response frame addressed back to this request's
    /// origin (same unit/slave id, same MBAP transaction id where
    /// applicable), ready for a handler to fill in via [`Frame::set_data`]
    /// or [`Frame::set_exception`].
    fn to_response_boxed(&self) -> Box<dyn Frame>;
}

/// Errors that can occur while decoding a frame from a byte buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub(crate) enum DecodeError {
    /// Not enough bytes have arrived yet; the caller should keep reading.
    #[error("incomplete frame")]
    Incomplete,

    /// The bytes present do not form a well-formed frame of this transport
    /// and cannot be repaired by reading more.
    #[error("malformed frame")]
    Protocol,

    /// An RTU frame's trailing CRC did not match its body.
    #[error("CRC mismatch")]
    Crc,
}
