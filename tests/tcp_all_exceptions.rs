// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The four Modbus/TCP end-to-end scenarios from the specification's
//! testable-properties section, byte for byte.

#![cfg(feature = "tcp")]

mod support;

use std::time::Duration;

use tokio::net::TcpStream;

use support::{roundtrip, start_tcp_server};

#[tokio::test]
async fn all_exceptions() {
    let addr = "127.0.0.1:17500".parse().unwrap();
    let server = start_tcp_server(addr, false, Duration::from_secs(60)).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // 1. FC3 read of 2 holding registers at address 0, both zero.
    let response = roundtrip(
        &mut stream,
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03, 0x00, 0x00, 0x00, 0x02],
    )
    .await;
    assert_eq!(
        response,
        vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0xFF, 0x03, 0x04, 0x00, 0x00, 0x00, 0x00]
    );

    // 2. FC6 write 0x1234 to holding register 10, echoed back.
    let response = roundtrip(
        &mut stream,
        &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x06, 0x00, 0x0A, 0x12, 0x34],
    )
    .await;
    assert_eq!(
        response,
        vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x06, 0x00, 0x0A, 0x12, 0x34]
    );

    // Subsequent FC3 at address 10, quantity 1, returns what was written.
    let response = roundtrip(
        &mut stream,
        &[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x03, 0x00, 0x0A, 0x00, 0x01],
    )
    .await;
    assert_eq!(
        response,
        vec![0x00, 0x02, 0x00, 0x00, 0x00, 0x05, 0xFF, 0x03, 0x02, 0x12, 0x34]
    );

    // 3. FC5 with an invalid coil value.
    let response = roundtrip(
        &mut stream,
        &[0x00, 0x03, 0x00, 0x00, 0x00, 0x06, 0xFF, 0x05, 0x00, 0x00, 0xAB, 0xCD],
    )
    .await;
    assert_eq!(
        response,
        vec![0x00, 0x03, 0x00, 0x00, 0x00, 0x03, 0xFF, 0x85, 0x03]
    );

    // 4. Unknown function code 0x42.
    let response = roundtrip(&mut stream, &[0x00, 0x04, 0x00, 0x00, 0x00, 0x02, 0xFF, 0x42]).await;
    assert_eq!(
        response,
        vec![0x00, 0x04, 0x00, 0x00, 0x00, 0x03, 0xFF, 0xC2, 0x01]
    );

    server.close().await;
}
