//! Flash programming pipelines.
//!
//! The PAC52xx programs one 32-bit word per FLASHLOCK arming. The destination
//! must be word aligned; a short tail is padded with 0xFF.
//!
//! The PAC55xx only programs whole 16-byte rows starting on a 16-byte
//! boundary. Data is staged into a row buffer and every byte of a touched row
//! that lies outside `[offset, offset + len)` is programmed as 0xFF. This is
//! destructive: existing contents of those bytes are not preserved, so callers
//! wanting to keep neighbouring data must align and size their payloads to
//! rows themselves.
use std::borrow::Cow;

use anyhow::Result;
use scroll::{LE, Pread};

use crate::bank::FlashBank;
use crate::constants::{FLASH_WRITE_TIMEOUT, pac55xx::ROW_SIZE};
use crate::erase::with_lockdown;
use crate::error::FlashError;
use crate::poll::wait_idle;
use crate::protocol::{Command, Protocol, WriteGranule};
use crate::transport::Target;

/// Programs `buffer` at `offset` from the bank base.
pub fn write<T: Target>(
    target: &mut T,
    bank: &FlashBank,
    buffer: &[u8],
    offset: u32,
) -> Result<()> {
    target.ensure_halted()?;

    match bank.driver.protocol().granule {
        WriteGranule::Word => write_words(target, bank, buffer, offset),
        WriteGranule::Row => write_rows(target, bank, buffer, offset),
    }
}

fn write_words<T: Target>(
    target: &mut T,
    bank: &FlashBank,
    buffer: &[u8],
    offset: u32,
) -> Result<()> {
    if offset & 0x3 != 0 {
        log::error!("offset 0x{:08x} breaks required 4-byte alignment", offset);
        anyhow::bail!(FlashError::DstBreaksAlignment {
            offset,
            required: 4
        });
    }
    bank.check_range(offset, buffer.len() as u32)?;
    if buffer.is_empty() {
        return Ok(());
    }

    let data: Cow<[u8]> = if buffer.len() % 4 != 0 {
        log::info!("odd number of bytes to write, padding with 0xff");
        let mut padded = buffer.to_vec();
        padded.resize(buffer.len().next_multiple_of(4), 0xFF);
        Cow::Owned(padded)
    } else {
        Cow::Borrowed(buffer)
    };

    let protocol = bank.driver.protocol();
    with_lockdown(target, protocol, |target| {
        let mut address = bank.base + offset;
        for pos in (0..data.len()).step_by(4) {
            let value: u32 = data.pread_with(pos, LE)?;
            target.transfer(protocol, protocol.arm_write())?;
            target.transfer(protocol, Command::Program { address, value })?;
            wait_idle(target, protocol, FLASH_WRITE_TIMEOUT)?;
            address += 4;
        }
        Ok(())
    })?;
    log::info!(
        "{}: wrote {} bytes at 0x{:08x}",
        bank.name,
        buffer.len(),
        offset
    );
    Ok(())
}

fn write_rows<T: Target>(
    target: &mut T,
    bank: &FlashBank,
    buffer: &[u8],
    offset: u32,
) -> Result<()> {
    bank.check_range(offset, buffer.len() as u32)?;
    if buffer.is_empty() {
        return Ok(());
    }

    let head = offset as usize % ROW_SIZE;
    let tail = (head + buffer.len()) % ROW_SIZE;
    if head != 0 || tail != 0 {
        log::warn!(
            "write of {} bytes at 0x{:08x} is not row aligned, rest of the touched rows becomes 0xff",
            buffer.len(),
            offset
        );
    }

    let protocol = bank.driver.protocol();
    let reset_word_count = protocol.reset_write_word_count()?;
    with_lockdown(target, protocol, |target| {
        for cmd in reset_word_count {
            target.transfer(protocol, cmd)?;
        }
        target.transfer(protocol, protocol.arm_write())?;

        let mut address = bank.base + (offset & !(ROW_SIZE as u32 - 1));
        let mut row = [0xFFu8; ROW_SIZE];
        let mut index = head;
        for &byte in buffer {
            row[index] = byte;
            index += 1;
            if index == ROW_SIZE {
                program_row(target, protocol, address, &row)?;
                address += ROW_SIZE as u32;
                index = 0;
            }
        }
        if index != 0 {
            row[index..].fill(0xFF);
            program_row(target, protocol, address, &row)?;
        }

        // flash is readable 10us after the last WBUSY clears
        target.sleep_ms(1);
        Ok(())
    })?;
    log::info!(
        "{}: wrote {} bytes at 0x{:08x}",
        bank.name,
        buffer.len(),
        offset
    );
    Ok(())
}

/// Four word stores, then one status poll for the whole row.
fn program_row<T: Target>(
    target: &mut T,
    protocol: &Protocol,
    address: u32,
    row: &[u8; ROW_SIZE],
) -> Result<()> {
    log::debug!("row 0x{:08x}: {}", address, hex::encode(row));
    for word in 0..ROW_SIZE / 4 {
        let value: u32 = row[..].pread_with(word * 4, LE)?;
        target.transfer(
            protocol,
            Command::Program {
                address: address + word as u32 * 4,
                value,
            },
        )?;
    }
    wait_idle(target, protocol, FLASH_WRITE_TIMEOUT)
}
