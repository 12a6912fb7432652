// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The device's in-memory register/coil tables and the transport-agnostic
//! sink a dispatched response is written to.

use std::fmt;

use async_trait::async_trait;

/// Number of addressable coils/registers per bank.
pub const BANK_LEN: usize = 1 << 16;

/// The four fixed-size Modbus data tables backing a [`crate::Server`].
///
/// All four tables are allocated once, at their full 65536-element width,
/// for the life of the server. Bounds checking against the quantity limits
/// a function code allows is the handler's job (`crate::handlers`), not
/// this struct's: these accessors trust the caller, exactly as the plain
/// register/coil slices they are grounded on do in the original Modbus
/// slave implementation this crate reworks.
pub struct MemoryBanks {
    coils: Box<[u8; BANK_LEN]>,
    discrete_inputs: Box<[u8; BANK_LEN]>,
    holding_registers: Box<[u16; BANK_LEN]>,
    input_registers: Box<[u16; BANK_LEN]>,
}

impl fmt::Debug for MemoryBanks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBanks").finish_non_exhaustive()
    }
}

impl Default for MemoryBanks {
    fn default() -> Self {
        Self {
            coils: Box::new([0; BANK_LEN]),
            discrete_inputs: Box::new([0; BANK_LEN]),
            holding_registers: Box::new([0; BANK_LEN]),
            input_registers: Box::new([0; BANK_LEN]),
        }
    }
}

impl MemoryBanks {
    pub(crate) fn coil(&self, addr: u16) -> bool {
        self.coils[addr as usize] != 0
    }

    pub(crate) fn set_coil(&mut self, addr: u16, value: bool) {
        self.coils[addr as usize] = u8::from(value);
    }

    pub(crate) fn discrete_input(&self, addr: u16) -> bool {
        self.discrete_inputs[addr as usize] != 0
    }

    /// Exposed so an embedding application can publish sensor state into
    /// the discrete-input table, which the wire protocol itself never
    /// writes to.
    pub fn set_discrete_input(&mut self, addr: u16, value: bool) {
        self.discrete_inputs[addr as usize] = u8::from(value);
    }

    pub(crate) fn holding_register(&self, addr: u16) -> u16 {
        self.holding_registers[addr as usize]
    }

    /// Exposed so an embedding application can seed or overwrite a holding
    /// register directly, e.g. to publish a counter on a timer rather than
    /// waiting for a master to write it via function code 6/16.
    pub fn set_holding_register(&mut self, addr: u16, value: u16) {
        self.holding_registers[addr as usize] = value;
    }

    pub(crate) fn input_register(&self, addr: u16) -> u16 {
        self.input_registers[addr as usize]
    }

    /// Exposed so an embedding application can publish telemetry into the
    /// input-register table, which the wire protocol itself never writes
    /// to.
    pub fn set_input_register(&mut self, addr: u16, value: u16) {
        self.input_registers[addr as usize] = value;
    }
}

/// A unique identifier for a live, watchable connection (TCP/TLS). RTU
/// sinks have no connection id and are never subject to the watchdog.
pub type ConnectionId = u64;

/// The capability a dispatched response is written through, unifying TCP,
/// TLS and serial connections behind one write operation.
///
/// This is the "connection as abstract sink" design: a [`crate::Request`]
/// carries a `Box<dyn RequestSink>` rather than a concrete socket type, so
/// the dispatcher (`crate::dispatcher`) never needs to know which
/// transport produced the request it is answering.
#[async_trait]
pub trait RequestSink: Send + Sync + fmt::Debug {
    /// Writes a fully encoded response ADU to the underlying transport.
    async fn write_all(&self, bytes: &[u8]) -> std::io::Result<()>;

    /// The watchdog identity of this sink, if it is watched. TCP/TLS
    /// connections return `Some`; RTU ports return `None`.
    fn connection_id(&self) -> Option<ConnectionId> {
        None
    }
}
