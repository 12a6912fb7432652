// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Starts a Modbus/TCP slave on `0.0.0.0:502` with the watchdog enabled and
//! publishes an incrementing counter into holding register 1 once a
//! second, so any Modbus master can watch it tick over FC3/FC4.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_modbus_slave::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let server = Server::new(true, Duration::from_secs(5));
    let addr: SocketAddr = "0.0.0.0:502".parse()?;
    server.listen_tcp(addr)?;
    log::info!("listening on {addr}");

    let mut counter: u16 = 0;
    loop {
        counter = counter.wrapping_add(1);
        server.banks_mut().set_holding_register(1, counter);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}
