//! Simulated target: a PAC52xx/PAC55xx memory controller in a register file.
use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;

use super::{Target, TargetState};
use crate::protocol::{EraseKey, MemCtl, Protocol, RegWrite, WriteGranule};

/// One bus transaction or sleep seen by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read { address: u32, value: u32 },
    Write { address: u32, value: u32 },
    Sleep(u64),
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Access::Read { address, value } => {
                write!(f, "R [0x{:08x}] -> 0x{:08x}", address, value)
            }
            Access::Write { address, value } => write!(f, "W {}", RegWrite { address, value }),
            Access::Sleep(ms) => write!(f, "sleep {}ms", ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// Status polls reporting EBUSY after an erase starts
    pub erase_busy_polls: u32,
    /// Status polls reporting WBUSY after a word (or a full row) lands
    pub write_busy_polls: u32,
    /// Status never goes idle
    pub stuck_busy: bool,
    /// CCSPLLCTL polls before the lock bit shows, `None` never locks
    pub pll_lock_polls: Option<u32>,
    pub fail_write_at: Option<u32>,
    pub fail_read_at: Option<u32>,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            erase_busy_polls: 2,
            write_busy_polls: 1,
            stuck_busy: false,
            pll_lock_polls: Some(2),
            fail_write_at: None,
            fail_read_at: None,
        }
    }
}

const WBUSY: u32 = 1 << 0;
const EBUSY: u32 = 1 << 1;
const PLL_LOCKED: u32 = 1 << 24;

/// Keeps FLASHLOCK armed until software clears it, so a missing lock-down
/// shows up in [`SimTarget::flashlock`].
pub struct SimTarget {
    protocol: &'static Protocol,
    config: SimConfig,
    state: TargetState,
    flash: Vec<u8>,
    registers: BTreeMap<u32, u32>,
    busy_bits: u32,
    busy_polls_left: u32,
    pll_polls: u32,
    pll_enabled: bool,
    row_words: u32,
    log: Vec<Access>,
    elapsed_ms: u64,
}

impl SimTarget {
    /// A halted target with blank flash.
    pub fn new(protocol: &'static Protocol) -> Self {
        Self::with_config(protocol, SimConfig::default())
    }

    pub fn with_config(protocol: &'static Protocol, config: SimConfig) -> Self {
        SimTarget {
            protocol,
            config,
            state: TargetState::Halted,
            flash: vec![0xFF; protocol.flash_size() as usize],
            registers: BTreeMap::new(),
            busy_bits: 0,
            busy_polls_left: 0,
            pll_polls: 0,
            pll_enabled: false,
            row_words: 0,
            log: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn protocol(&self) -> &'static Protocol {
        self.protocol
    }

    pub fn set_state(&mut self, state: TargetState) {
        self.state = state;
    }

    pub fn config_mut(&mut self) -> &mut SimConfig {
        &mut self.config
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Fills flash directly, bypassing the controller.
    pub fn preload(&mut self, offset: u32, data: &[u8]) {
        let start = offset as usize;
        self.flash[start..start + data.len()].copy_from_slice(data);
    }

    pub fn register(&self, address: u32) -> u32 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    pub fn flashlock(&self) -> u32 {
        self.register(self.protocol.regs.flashlock)
    }

    pub fn log(&self) -> &[Access] {
        &self.log
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    pub fn writes(&self) -> Vec<(u32, u32)> {
        self.log
            .iter()
            .filter_map(|a| match *a {
                Access::Write { address, value } => Some((address, value)),
                _ => None,
            })
            .collect()
    }

    /// Values written to one address, in order.
    pub fn writes_to(&self, address: u32) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|&(a, _)| a == address)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn reads_of(&self, address: u32) -> usize {
        self.log
            .iter()
            .filter(|a| matches!(a, Access::Read { address: r, .. } if *r == address))
            .count()
    }

    pub fn sleeps(&self) -> usize {
        self.log
            .iter()
            .filter(|a| matches!(a, Access::Sleep(_)))
            .count()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    fn flash_index(&self, address: u32) -> Option<usize> {
        let offset = address.checked_sub(self.protocol.flash_base)?;
        (offset < self.protocol.flash_size()).then_some(offset as usize)
    }

    fn start_busy(&mut self, bits: u32, polls: u32) {
        self.busy_bits = bits;
        self.busy_polls_left = polls;
    }

    fn erase_range(&mut self, start: usize, len: usize) {
        let end = (start + len).min(self.flash.len());
        self.flash[start..end].fill(0xFF);
    }

    fn on_erase_command(&mut self, value: u32) {
        let p = self.protocol;
        if self.flashlock() != p.keys.erase_unlock {
            log::warn!("sim: erase command 0x{:08x} ignored, FLASHLOCK not armed", value);
            return;
        }
        if value == p.keys.page_erase {
            let page = self.register(p.regs.flashpage);
            if page < p.num_pages {
                let size = p.page_size as usize;
                self.erase_range(page as usize * size, size);
            }
        } else if p.keyed_erase
            && [EraseKey::MassPage, EraseKey::MassProgInfo].iter().any(|k| k.key() == value)
        {
            let len = self.flash.len();
            self.erase_range(0, len);
        } else if p.keyed_erase && value == EraseKey::Info3.key() {
            // INFO3 lives outside the simulated array
        } else {
            log::warn!("sim: unknown erase key 0x{:08x}", value);
            return;
        }
        self.start_busy(EBUSY, self.config.erase_busy_polls);
    }

    fn on_flash_write(&mut self, index: usize, value: u32) {
        let p = self.protocol;
        if self.flashlock() != p.keys.write_unlock {
            log::warn!("sim: flash write at 0x{:x} ignored, FLASHLOCK not armed", index);
            return;
        }
        for (dst, src) in self.flash[index..].iter_mut().zip(value.to_le_bytes()) {
            *dst &= src;
        }
        match p.granule {
            WriteGranule::Word => self.start_busy(WBUSY, self.config.write_busy_polls),
            WriteGranule::Row => {
                self.row_words = (self.row_words + 1) % 4;
                if let Some(memctl) = p.regs.memctl {
                    let mut reg = MemCtl::from(self.register(memctl));
                    reg.set_write_word_count(self.row_words);
                    self.registers.insert(memctl, reg.bits());
                }
                if self.row_words == 0 {
                    self.start_busy(WBUSY, self.config.write_busy_polls);
                }
            }
        }
    }
}

impl Target for SimTarget {
    fn read_u32(&mut self, address: u32) -> Result<u32> {
        if self.config.fail_read_at == Some(address) {
            anyhow::bail!("simulated read fault at 0x{:08x}", address);
        }
        let p = self.protocol;
        let value = if address == p.regs.status {
            if self.config.stuck_busy {
                WBUSY | EBUSY
            } else if self.busy_polls_left > 0 {
                self.busy_polls_left -= 1;
                self.busy_bits
            } else {
                0
            }
        } else if Some(address) == p.regs.ccspllctl {
            let raw = self.register(address);
            match self.config.pll_lock_polls {
                Some(polls) if self.pll_enabled => {
                    self.pll_polls += 1;
                    if self.pll_polls > polls { raw | PLL_LOCKED } else { raw }
                }
                _ => raw,
            }
        } else if let Some(index) = self.flash_index(address) {
            let mut word = [0xFF; 4];
            for (dst, src) in word.iter_mut().zip(&self.flash[index..]) {
                *dst = *src;
            }
            u32::from_le_bytes(word)
        } else {
            self.register(address)
        };
        self.log.push(Access::Read { address, value });
        Ok(value)
    }

    fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        self.log.push(Access::Write { address, value });
        if self.config.fail_write_at == Some(address) {
            anyhow::bail!("simulated write fault at 0x{:08x}", address);
        }
        let p = self.protocol;
        if address == p.regs.erase {
            self.on_erase_command(value);
        } else if Some(address) == p.regs.memctl {
            if Some(self.flashlock()) != p.keys.memctl_unlock {
                log::warn!("sim: MEMCTL write ignored, FLASHLOCK not armed");
                return Ok(());
            }
            self.row_words = MemCtl::from(value).write_word_count();
            self.registers.insert(address, value);
        } else if Some(address) == p.regs.ccspllctl {
            self.pll_enabled = p.clock_init.is_some_and(|c| c.ccspllctl == value);
            self.pll_polls = 0;
            self.registers.insert(address, value);
        } else if let Some(index) = self.flash_index(address) {
            self.on_flash_write(index, value);
        } else {
            self.registers.insert(address, value);
        }
        Ok(())
    }

    fn state(&self) -> TargetState {
        self.state
    }

    fn sleep_ms(&mut self, ms: u64) {
        self.log.push(Access::Sleep(ms));
        self.elapsed_ms += ms;
    }
}
