// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus RTU listener: a serial reader implementing the CRC-driven resync
//! state machine described by the connection/watchdog lifecycle design.
//!
//! Bytes accumulate in a buffer `A` across reads. A CRC failure on the
//! accumulated buffer means the bytes will never form a valid frame no
//! matter how much more arrives, so `A` is dropped (DROP state). Any other
//! decode failure is assumed to mean `A` holds a partial frame, so it is
//! kept for the next read (SYNC state) — up to [`MAX_FRAME_LEN`], beyond
//! which a peer that never produces a parseable boundary would otherwise
//! grow the buffer without limit.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_serial::SerialStream;
use tokio_util::sync::CancellationToken;

use crate::banks::RequestSink;
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::frame::rtu::RtuFrame;
use crate::frame::{DecodeError, Frame};
use crate::Server;

/// Reads are taken in chunks this large, matching the TCP reader and the
/// original slave implementation's fixed-size serial read buffer.
const READ_CHUNK: usize = 512;

/// The largest possible RTU frame (1 address + 1 function + 252 data bytes
/// + 2 CRC bytes, per the Modbus-over-serial-line specification). Once the
/// accumulation buffer grows past this without yielding a valid frame, it
/// is garbage and is dropped rather than retained forever.
const MAX_FRAME_LEN: usize = 256;

struct SerialSink<W> {
    write_half: AsyncMutex<W>,
}

impl<W> std::fmt::Debug for SerialSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl<W> RequestSink for SerialSink<W>
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.write_half.lock().await.write_all(bytes).await
    }

    // RTU ports have no watchdog identity: §5's Watchdog + Feed coupling
    // only ever watches TCP/TLS sinks.
}

impl Server {
    /// Opens the serial port at `path` and spawns an RTU reader that
    /// answers only frames addressed to `slave_id`, silently dropping
    /// frames addressed to any other slave (the Modbus convention for a
    /// shared serial bus).
    pub fn listen_rtu(self: &Arc<Self>, path: &str, baud_rate: u32, slave_id: u8) -> Result<()> {
        let port = SerialStream::open(&tokio_serial::new(path, baud_rate)).map_err(|source| {
            Error::SerialOpen {
                path: PathBuf::from(path),
                source: io::Error::from(source),
            }
        })?;
        let (read_half, write_half) = tokio::io::split(port);

        let server = Arc::clone(self);
        let shutdown = server.shutdown_token();
        let request_tx = server.request_sender();
        let sink: Arc<dyn RequestSink> = Arc::new(SerialSink {
            write_half: AsyncMutex::new(write_half),
        });

        server.track_serial_task(run_reader(read_half, sink, request_tx, shutdown, slave_id));
        Ok(())
    }
}

/// The resync loop itself, generic over the byte source so it can be
/// exercised in tests against an in-process duplex pipe instead of a real
/// serial port.
pub(crate) async fn run_reader<R>(
    mut read_half: R,
    sink: Arc<dyn RequestSink>,
    request_tx: mpsc::Sender<dispatcher::Request>,
    shutdown: CancellationToken,
    slave_id: u8,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            read = read_half.read(&mut chunk) => read,
        };

        match read {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(err) => {
                log::debug!("serial read error: {err}");
                break;
            }
        }

        match RtuFrame::decode(&buf) {
            Ok(frame) => {
                if frame.address() == slave_id {
                    let request = dispatcher::Request {
                        frame: Box::new(frame),
                        sink: Arc::clone(&sink),
                    };
                    if request_tx.send(request).await.is_err() {
                        break;
                    }
                } else {
                    log::debug!(
                        "wrong slave address: got {}, expected {slave_id}",
                        frame.address()
                    );
                }
                buf.clear();
            }
            Err(DecodeError::Crc) => {
                log::warn!("RTU frame error: CRC");
                buf.clear();
            }
            Err(DecodeError::Incomplete | DecodeError::Protocol) => {
                if buf.len() >= MAX_FRAME_LEN {
                    log::warn!(
                        "RTU accumulation buffer exceeded {MAX_FRAME_LEN} bytes without a \
                         valid frame, dropping"
                    );
                    buf.clear();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::banks::ConnectionId;

    #[derive(Debug, Default)]
    struct RecordingSink {
        written: AsyncMutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl RequestSink for RecordingSink {
        async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
            self.written.lock().await.push(bytes.to_vec());
            Ok(())
        }

        fn connection_id(&self) -> Option<ConnectionId> {
            None
        }
    }

    fn sealed(body: &[u8]) -> Vec<u8> {
        let mut buf = body.to_vec();
        let crc = crate::crc::crc16(body);
        buf.push((crc & 0xFF) as u8);
        buf.push((crc >> 8) as u8);
        buf
    }

    #[tokio::test]
    async fn resyncs_after_garbage_prefix_and_answers_the_valid_frame() {
        let server = Server::new(false, std::time::Duration::from_secs(1));
        {
            let mut banks = server.banks_mut();
            banks.set_coil(0, true);
            banks.set_coil(2, true);
            banks.set_coil(4, true);
        }

        let (mut client, port) = tokio::io::duplex(4096);
        let shutdown = server.shutdown_token();
        let request_tx = server.request_sender();
        let sink: Arc<dyn RequestSink> = Arc::new(RecordingSink::default());

        tokio::spawn(run_reader(port, sink, request_tx, shutdown, 0x11));

        client.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).await.unwrap();
        let good = sealed(&[0x11, 0x01, 0x00, 0x00, 0x00, 0x08]);
        client.write_all(&good).await.unwrap();

        let mut response = [0u8; 32];
        let n = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            client.read(&mut response),
        )
        .await
        .expect("response within timeout")
        .unwrap();

        assert_eq!(
            &response[..n],
            sealed(&[0x11, 0x01, 0x01, 0b0001_0101]).as_slice()
        );
        server.close().await;
    }

    #[tokio::test]
    async fn drops_frames_for_a_different_slave_address() {
        let server = Server::new(false, std::time::Duration::from_secs(1));

        let (mut client, port) = tokio::io::duplex(4096);
        let shutdown = server.shutdown_token();
        let request_tx = server.request_sender();
        let sink: Arc<dyn RequestSink> = Arc::new(RecordingSink::default());

        tokio::spawn(run_reader(port, sink, request_tx, shutdown, 0x11));

        let wrong_slave = sealed(&[0x05, 0x01, 0x00, 0x00, 0x00, 0x08]);
        client.write_all(&wrong_slave).await.unwrap();

        let mut response = [0u8; 32];
        let result = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            client.read(&mut response),
        )
        .await;
        assert!(result.is_err(), "no response should be sent for a foreign slave id");
        server.close().await;
    }
}
