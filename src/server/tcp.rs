// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus/TCP listener: accepts connections, parses MBAP ADUs off a raw
//! read loop, and enqueues one [`crate::dispatcher::Request`] per frame.
//!
//! [`spawn_framed_reader`] is generic over the byte source/sink so
//! `crate::server::tls` can reuse the identical MBAP reader/parser over a
//! `TlsStream` — the wire format does not change, only the transport.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex as AsyncMutex;

use crate::banks::{ConnectionId, RequestSink};
use crate::dispatcher;
use crate::error::{Error, Result};
use crate::frame::tcp::TcpFrame;
use crate::Server;

/// Reads are taken in chunks this large, matching the original slave
/// implementation's fixed-size socket read buffer.
const READ_CHUNK: usize = 512;

/// Called once per accepted connection, before its reader is spawned.
pub type ConnectCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;
/// Called once a connection's reader has exited for any reason.
pub type DisconnectCallback = Arc<dyn Fn(SocketAddr) + Send + Sync>;

struct FramedSink<W> {
    connection_id: ConnectionId,
    write_half: AsyncMutex<W>,
}

impl<W> std::fmt::Debug for FramedSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedSink")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<W> RequestSink for FramedSink<W>
where
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        self.write_half.lock().await.write_all(bytes).await
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        Some(self.connection_id)
    }
}

impl Server {
    /// Binds `addr` and spawns an accept loop with no connect/disconnect
    /// callbacks.
    pub fn listen_tcp(self: &Arc<Self>, addr: SocketAddr) -> Result<()> {
        self.listen_tcp_with_callbacks(addr, None, None)
    }

    /// Binds `addr` and spawns an accept loop, firing `on_connect`/
    /// `on_disconnect` for every accepted connection.
    pub fn listen_tcp_with_callbacks(
        self: &Arc<Self>,
        addr: SocketAddr,
        on_connect: Option<ConnectCallback>,
        on_disconnect: Option<DisconnectCallback>,
    ) -> Result<()> {
        let listener = bind(addr).map_err(|source| Error::Listen { addr, source })?;
        let server = Arc::clone(self);
        let shutdown = server.shutdown_token();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                if let Some(on_connect) = &on_connect {
                                    on_connect(peer_addr);
                                }
                                let (read_half, write_half) = stream.into_split();
                                spawn_framed_reader(
                                    Arc::clone(&server),
                                    read_half,
                                    write_half,
                                    peer_addr,
                                    on_disconnect.clone(),
                                );
                            }
                            Err(err) => {
                                log::error!("TCP accept failed on {addr}: {err}");
                            }
                        }
                    }
                }
            }
        });
        self.track_listener_task(task);
        Ok(())
    }
}

/// Spawns a per-connection reader over any byte-stream halves: repeatedly
/// reads up to [`READ_CHUNK`] bytes, parses as many complete MBAP ADUs as
/// the accumulated buffer holds (tolerating a peer that writes a request
/// across more than one segment), and enqueues one dispatcher request per
/// frame. Exits on EOF, read error, a malformed frame, or the shared
/// shutdown/watchdog cancellation token.
pub(crate) fn spawn_framed_reader<R, W>(
    server: Arc<Server>,
    mut read_half: R,
    write_half: W,
    peer_addr: SocketAddr,
    on_disconnect: Option<DisconnectCallback>,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let connection_id = server.next_connection_id();
        let shutdown = server.track_connection(connection_id);
        let request_tx = server.request_sender();

        let sink: Arc<dyn RequestSink> = Arc::new(FramedSink {
            connection_id,
            write_half: AsyncMutex::new(write_half),
        });

        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];

        'reader: loop {
            let read = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                read = read_half.read(&mut chunk) => read,
            };

            match read {
                Ok(0) => break,
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(err) => {
                    log::debug!("connection {peer_addr} read error: {err}");
                    break;
                }
            }

            loop {
                match TcpFrame::decode(&buf) {
                    Ok((frame, consumed)) => {
                        buf.drain(..consumed);
                        let request = dispatcher::Request {
                            frame: Box::new(frame),
                            sink: Arc::clone(&sink),
                        };
                        if request_tx.send(request).await.is_err() {
                            break 'reader;
                        }
                    }
                    Err(crate::frame::DecodeError::Incomplete) => break,
                    Err(err) => {
                        log::warn!("malformed MBAP frame from {peer_addr}: {err}");
                        break 'reader;
                    }
                }
            }
        }

        server.untrack_connection(connection_id);
        if let Some(on_disconnect) = on_disconnect {
            on_disconnect(peer_addr);
        }
    });
}

/// Binds a `TcpListener` configured the way the original slave
/// implementation's plain `net.Listen("tcp", ...)` is: `SO_REUSEADDR` on,
/// a generous backlog, `SO_REUSEPORT` on unix so a restarted server can
/// rebind promptly.
pub(crate) fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    configure_tcp(&socket)?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    TcpListener::from_std(socket.into())
}

#[cfg(unix)]
fn configure_tcp(socket: &Socket) -> io::Result<()> {
    socket.set_reuse_port(true)
}

#[cfg(not(unix))]
fn configure_tcp(_socket: &Socket) -> io::Result<()> {
    Ok(())
}
