// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! TLS-over-TCP listener: identical MBAP wire format to
//! `crate::server::tcp`, just sourced from a `TlsStream` instead of a bare
//! `TcpStream`. The handshake is the only thing this module adds.

use std::io::{self, BufReader};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use rustls_pemfile::{certs, private_key};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::server::tcp::{self, ConnectCallback, DisconnectCallback};
use crate::Server;

/// Loads a PEM certificate chain from `path`.
pub fn load_certs(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    certs(&mut BufReader::new(std::fs::File::open(path)?)).collect()
}

/// Loads a single PEM private key from `path`.
pub fn load_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    private_key(&mut BufReader::new(std::fs::File::open(path)?))?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no private key found"))
}

/// Builds a server TLS config from a certificate chain and matching
/// private key, with no client-certificate authentication (Modbus itself
/// has no concept of mutual TLS; this mirrors the original slave
/// implementation's plain, unauthenticated socket trust model while still
/// gaining transport encryption).
pub fn server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| Error::Tls(err.to_string()))?;
    Ok(Arc::new(config))
}

impl Server {
    /// Binds `addr` and spawns a TLS accept loop with no connect/
    /// disconnect callbacks.
    pub fn listen_tls(self: &Arc<Self>, addr: SocketAddr, tls_config: Arc<ServerConfig>) -> Result<()> {
        self.listen_tls_with_callbacks(addr, tls_config, None, None)
    }

    /// Binds `addr` and spawns a TLS accept loop, firing `on_connect`/
    /// `on_disconnect` for every accepted connection (after a successful
    /// handshake).
    pub fn listen_tls_with_callbacks(
        self: &Arc<Self>,
        addr: SocketAddr,
        tls_config: Arc<ServerConfig>,
        on_connect: Option<ConnectCallback>,
        on_disconnect: Option<DisconnectCallback>,
    ) -> Result<()> {
        let listener = tcp::bind(addr).map_err(|source| Error::Listen { addr, source })?;
        let acceptor = TlsAcceptor::from(tls_config);
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
                                let acceptor = acceptor.clone();
                                let server = Arc::clone(&server);
                                let on_connect = on_connect.clone();
                                let on_disconnect = on_disconnect.clone();
                                tokio::spawn(async move {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            if let Some(on_connect) = &on_connect {
                                                on_connect(peer_addr);
                                            }
                                            let (read_half, write_half) =
                                                tokio::io::split(tls_stream);
                                            tcp::spawn_framed_reader(
                                                server,
                                                read_half,
                                                write_half,
                                                peer_addr,
                                                on_disconnect,
                                            );
                                        }
                                        Err(err) => {
                                            log::warn!(
                                                "TLS handshake with {peer_addr} failed: {err}"
                                            );
                                        }
                                    }
                                });
                            }
                            Err(err) => {
                                log::error!("TLS accept failed on {addr}: {err}");
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
