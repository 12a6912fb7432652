// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Library error type.

use std::path::PathBuf;

/// A specialized [`Result`] type for fallible server operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned from the public server API.
///
/// Modbus exceptions are *not* represented here: an exception is an
/// in-band response a handler hands back to the dispatcher, not a failure
/// of the server itself. This type only covers failures that prevent a
/// listener, serial port, or connection from being brought up at all.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to bind or accept on a TCP/TLS listener.
    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Failed to open a serial port.
    #[error("failed to open serial port {path}: {source}")]
    SerialOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TLS configuration was rejected by `rustls`.
    #[error("invalid TLS configuration: {0}")]
    Tls(String),

    /// General I/O error bubbled up from a connection or socket operation.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
