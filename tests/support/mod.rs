// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared helpers for the integration tests: raw-byte Modbus/TCP exchanges
//! against a real [`Server`], mirroring the literal byte scenarios from the
//! specification rather than going through a client library (this crate
//! implements a slave only).

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_modbus_slave::Server;

/// Starts a TCP listener on `addr` and gives the accept loop a moment to
/// come up before the caller connects.
pub async fn start_tcp_server(
    addr: SocketAddr,
    watchdog_enabled: bool,
    watchdog_timeout: Duration,
) -> std::sync::Arc<Server> {
    let server = Server::new(watchdog_enabled, watchdog_timeout);
    server.listen_tcp(addr).expect("bind must succeed");
    tokio::time::sleep(Duration::from_millis(50)).await;
    server
}

/// Writes `request` and reads back exactly one MBAP ADU, using the 6-byte
/// header's length field to know how many bytes follow.
pub async fn roundtrip(stream: &mut TcpStream, request: &[u8]) -> Vec<u8> {
    stream.write_all(request).await.expect("write request");
    read_one_adu(stream).await
}

pub async fn read_one_adu(stream: &mut TcpStream) -> Vec<u8> {
    let mut header = [0u8; 6];
    stream
        .read_exact(&mut header)
        .await
        .expect("read MBAP header");
    let length = u16::from_be_bytes([header[4], header[5]]) as usize;
    let mut rest = vec![0u8; length];
    stream.read_exact(&mut rest).await.expect("read MBAP body");
    let mut adu = header.to_vec();
    adu.extend_from_slice(&rest);
    adu
}
