// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Default function-code handlers over [`crate::banks::MemoryBanks`].
//!
//! Every handler receives the owning [`crate::Server`] and the inbound
//! frame's PDU data and returns the successful response body, or the
//! [`Exception`] to set on the reply.

use crate::frame::Exception;
use crate::Server;

/// Function code 1.
pub const FC_READ_COILS: u8 = 0x01;
/// Function code 2.
pub const FC_READ_DISCRETE_INPUTS: u8 = 0x02;
/// Function code 3.
pub const FC_READ_HOLDING_REGISTERS: u8 = 0x03;
/// Function code 4.
pub const FC_READ_INPUT_REGISTERS: u8 = 0x04;
/// Function code 5.
pub const FC_WRITE_SINGLE_COIL: u8 = 0x05;
/// Function code 6.
pub const FC_WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Function code 15.
pub const FC_WRITE_MULTIPLE_COILS: u8 = 0x0F;
/// Function code 16.
pub const FC_WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

const MAX_READ_BITS: u16 = 2000;
const MAX_READ_WORDS: u16 = 125;
const MAX_WRITE_BITS: u16 = 1968;
const MAX_WRITE_WORDS: u16 = 123;

/// A registered function handler: owning server plus the request PDU data
/// in, the response PDU data (or exception) out.
pub type HandlerFn = fn(&Server, &[u8]) -> Result<Vec<u8>, Exception>;

/// `[Option<HandlerFn>; 256]`-shaped dispatch table, indexable directly by
/// function code and externally extensible via
/// [`crate::Server::register_function_handler`].
pub struct FunctionTable(Box<[Option<HandlerFn>; 256]>);

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registered: Vec<u8> = (0u16..256)
            .filter(|&code| self.0[code as usize].is_some())
            .map(|code| code as u8)
            .collect();
        f.debug_struct("FunctionTable")
            .field("registered", &registered)
            .finish()
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        let mut table: [Option<HandlerFn>; 256] = [None; 256];
        table[FC_READ_COILS as usize] = Some(read_coils);
        table[FC_READ_DISCRETE_INPUTS as usize] = Some(read_discrete_inputs);
        table[FC_READ_HOLDING_REGISTERS as usize] = Some(read_holding_registers);
        table[FC_READ_INPUT_REGISTERS as usize] = Some(read_input_registers);
        table[FC_WRITE_SINGLE_COIL as usize] = Some(write_single_coil);
        table[FC_WRITE_SINGLE_REGISTER as usize] = Some(write_single_register);
        table[FC_WRITE_MULTIPLE_COILS as usize] = Some(write_multiple_coils);
        table[FC_WRITE_MULTIPLE_REGISTERS as usize] = Some(write_multiple_registers);
        Self(Box::new(table))
    }
}

impl FunctionTable {
    pub(crate) fn get(&self, code: u8) -> Option<HandlerFn> {
        self.0[code as usize]
    }

    /// Replaces the handler for `code`, or clears it when `handler` is
    /// `None`.
    pub(crate) fn set(&mut self, code: u8, handler: Option<HandlerFn>) {
        self.0[code as usize] = handler;
    }
}

fn read_start_quantity(data: &[u8]) -> Result<(u16, u16), Exception> {
    if data.len() < 4 {
        return Err(Exception::IllegalDataValue);
    }
    let start = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    Ok((start, quantity))
}

fn check_span(start: u16, quantity: u16) -> Result<(), Exception> {
    if quantity == 0 {
        return Err(Exception::IllegalDataValue);
    }
    if u32::from(start) + u32::from(quantity) > u32::from(u16::MAX) + 1 {
        return Err(Exception::IllegalDataAddress);
    }
    Ok(())
}

fn pack_bits<F>(start: u16, quantity: u16, mut bit_at: F) -> Vec<u8>
where
    F: FnMut(u16) -> bool,
{
    let byte_count = (usize::from(quantity) + 7) / 8;
    let mut packed = vec![0u8; byte_count];
    for i in 0..quantity {
        if bit_at(start + i) {
            packed[usize::from(i / 8)] |= 1 << (i % 8);
        }
    }
    let mut out = Vec::with_capacity(1 + byte_count);
    out.push(byte_count as u8);
    out.extend_from_slice(&packed);
    out
}

fn read_coils(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    let (start, quantity) = read_start_quantity(data)?;
    if quantity == 0 || quantity > MAX_READ_BITS {
        return Err(Exception::IllegalDataValue);
    }
    check_span(start, quantity)?;
    let banks = server.banks();
    Ok(pack_bits(start, quantity, |addr| banks.coil(addr)))
}

fn read_discrete_inputs(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    let (start, quantity) = read_start_quantity(data)?;
    if quantity == 0 || quantity > MAX_READ_BITS {
        return Err(Exception::IllegalDataValue);
    }
    check_span(start, quantity)?;
    let banks = server.banks();
    Ok(pack_bits(start, quantity, |addr| banks.discrete_input(addr)))
}

fn pack_words<F>(start: u16, quantity: u16, mut word_at: F) -> Vec<u8>
where
    F: FnMut(u16) -> u16,
{
    let mut out = Vec::with_capacity(1 + 2 * usize::from(quantity));
    out.push((2 * quantity) as u8);
    for i in 0..quantity {
        out.extend_from_slice(&word_at(start + i).to_be_bytes());
    }
    out
}

fn read_holding_registers(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    let (start, quantity) = read_start_quantity(data)?;
    if quantity == 0 || quantity > MAX_READ_WORDS {
        return Err(Exception::IllegalDataValue);
    }
    check_span(start, quantity)?;
    let banks = server.banks();
    Ok(pack_words(start, quantity, |addr| {
        banks.holding_register(addr)
    }))
}

fn read_input_registers(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    let (start, quantity) = read_start_quantity(data)?;
    if quantity == 0 || quantity > MAX_READ_WORDS {
        return Err(Exception::IllegalDataValue);
    }
    check_span(start, quantity)?;
    let banks = server.banks();
    Ok(pack_words(start, quantity, |addr| {
        banks.input_register(addr)
    }))
}

fn write_single_coil(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    if data.len() != 4 {
        return Err(Exception::IllegalDataValue);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let raw = u16::from_be_bytes([data[2], data[3]]);
    let value = match raw {
        0xFF00 => true,
        0x0000 => false,
        _ => return Err(Exception::IllegalDataValue),
    };
    server.banks_mut().set_coil(addr, value);
    Ok(data.to_vec())
}

fn write_single_register(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    if data.len() != 4 {
        return Err(Exception::IllegalDataValue);
    }
    let addr = u16::from_be_bytes([data[0], data[1]]);
    let value = u16::from_be_bytes([data[2], data[3]]);
    server.banks_mut().set_holding_register(addr, value);
    Ok(data.to_vec())
}

fn write_multiple_coils(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    if data.len() < 5 {
        return Err(Exception::IllegalDataValue);
    }
    let start = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    let byte_count = data[4] as usize;
    if quantity == 0 || quantity > MAX_WRITE_BITS {
        return Err(Exception::IllegalDataValue);
    }
    if byte_count != (usize::from(quantity) + 7) / 8 || data.len() != 5 + byte_count {
        return Err(Exception::IllegalDataValue);
    }
    check_span(start, quantity)?;
    let bits = &data[5..];
    let mut banks = server.banks_mut();
    for i in 0..quantity {
        let byte = bits[usize::from(i / 8)];
        let bit = (byte >> (i % 8)) & 0x01 != 0;
        banks.set_coil(start + i, bit);
    }
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&start.to_be_bytes());
    out.extend_from_slice(&quantity.to_be_bytes());
    Ok(out)
}

fn write_multiple_registers(server: &Server, data: &[u8]) -> Result<Vec<u8>, Exception> {
    if data.len() < 5 {
        return Err(Exception::IllegalDataValue);
    }
    let start = u16::from_be_bytes([data[0], data[1]]);
    let quantity = u16::from_be_bytes([data[2], data[3]]);
    let byte_count = data[4] as usize;
    if quantity == 0 || quantity > MAX_WRITE_WORDS {
        return Err(Exception::IllegalDataValue);
    }
    if byte_count != 2 * usize::from(quantity) || data.len() != 5 + byte_count {
        return Err(Exception::IllegalDataValue);
    }
    check_span(start, quantity)?;
    let words = &data[5..];
    let mut banks = server.banks_mut();
    for i in 0..quantity {
        let offset = 2 * usize::from(i);
        let value = u16::from_be_bytes([words[offset], words[offset + 1]]);
        banks.set_holding_register(start + i, value);
    }
    let mut out = Vec::with_capacity(4);
    out.extend_from_slice(&start.to_be_bytes());
    out.extend_from_slice(&quantity.to_be_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> std::sync::Arc<Server> {
        Server::new(false, std::time::Duration::from_secs(1))
    }

    #[tokio::test]
    async fn read_coils_packs_lsb_first_with_zero_padded_tail() {
        let server = server();
        {
            let mut banks = server.banks_mut();
            banks.set_coil(0, true);
            banks.set_coil(1, false);
            banks.set_coil(2, true);
        }
        let body = read_coils(&server, &[0x00, 0x00, 0x00, 0x03]).unwrap();
        assert_eq!(body, vec![0x01, 0b0000_0101]);
    }

    #[tokio::test]
    async fn read_coils_rejects_out_of_range_quantity() {
        let server = server();
        let body = [0x00, 0x00, 0x07, 0xD1]; // 2001
        assert_eq!(
            read_coils(&server, &body).unwrap_err(),
            Exception::IllegalDataValue
        );
    }

    #[tokio::test]
    async fn read_holding_registers_rejects_span_overflow() {
        let server = server();
        let body = [0xFF, 0xFF, 0x00, 0x02]; // start=65535, qty=2
        assert_eq!(
            read_holding_registers(&server, &body).unwrap_err(),
            Exception::IllegalDataAddress
        );
    }

    #[tokio::test]
    async fn write_single_coil_rejects_invalid_value_without_mutating() {
        let server = server();
        let before = server.banks().coil(5);
        let result = write_single_coil(&server, &[0x00, 0x05, 0x12, 0x34]);
        assert_eq!(result.unwrap_err(), Exception::IllegalDataValue);
        assert_eq!(server.banks().coil(5), before);
    }

    #[tokio::test]
    async fn write_single_coil_accepts_on_and_off() {
        let server = server();
        write_single_coil(&server, &[0x00, 0x05, 0xFF, 0x00]).unwrap();
        assert!(server.banks().coil(5));
        write_single_coil(&server, &[0x00, 0x05, 0x00, 0x00]).unwrap();
        assert!(!server.banks().coil(5));
    }

    #[tokio::test]
    async fn write_multiple_registers_round_trips_through_read() {
        let server = server();
        let mut body = vec![0x00, 0x0A, 0x00, 0x02, 0x04];
        body.extend_from_slice(&0x1234u16.to_be_bytes());
        body.extend_from_slice(&0x5678u16.to_be_bytes());
        write_multiple_registers(&server, &body).unwrap();
        let read = read_holding_registers(&server, &[0x00, 0x0A, 0x00, 0x02]).unwrap();
        assert_eq!(read, vec![0x04, 0x12, 0x34, 0x56, 0x78]);
    }

    #[tokio::test]
    async fn write_multiple_coils_rejects_mismatched_byte_count() {
        let server = server();
        let body = vec![0x00, 0x00, 0x00, 0x08, 0x02, 0xFF];
        assert_eq!(
            write_multiple_coils(&server, &body).unwrap_err(),
            Exception::IllegalDataValue
        );
    }
}
