//! The memory controller protocol of each device.
//!
//! This is the only place that knows which register gets which key in which
//! order. The erase, write and probe engines ask a [`Protocol`] for a command
//! sequence and hand each [`Command`] to the target.
use std::fmt;

use anyhow::Result;
use bitfield::bitfield;

use crate::constants::{self, pac52xx, pac55xx};
use crate::error::FlashError;

/// Smallest unit the controller programs in one go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteGranule {
    /// One 32-bit word per arming of FLASHLOCK. Start must be word aligned,
    /// a short tail is padded with 0xFF.
    Word,
    /// One 16-byte aligned row of four words, polled once. Bytes of a touched
    /// row outside the written range are programmed as 0xFF.
    Row,
}

/// Controller register addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    pub flashlock: u32,
    pub status: u32,
    pub flashpage: u32,
    /// FLASHPERASE on PAC52xx, FLASHERASE on PAC55xx
    pub erase: u32,
    pub memctl: Option<u32>,
    pub ccsctl: Option<u32>,
    pub ccspllctl: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keys {
    /// FLASHLOCK value that arms an erase
    pub erase_unlock: u32,
    /// FLASHLOCK value that arms programming
    pub write_unlock: u32,
    /// Erase register value that starts a page erase
    pub page_erase: u32,
    /// FLASHLOCK value that opens MEMCTL
    pub memctl_unlock: Option<u32>,
}

/// Static description of one device's flash controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub name: &'static str,
    pub regs: RegisterMap,
    pub keys: Keys,
    /// Status bits that must all read 0 for the controller to be idle
    pub idle_mask: u32,
    pub flash_base: u32,
    pub num_pages: u32,
    pub page_size: u32,
    pub granule: WriteGranule,
    /// Whether keyed (mass) erase commands exist
    pub keyed_erase: bool,
    /// MEMCTL value restoring MCLK with WRITEWORDCNT cleared
    pub memctl_value: Option<u32>,
    /// Clock bring-up required before flash access
    pub clock_init: Option<ClockInit>,
}

/// CCSCTL/CCSPLLCTL values for moving the core onto the PLL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockInit {
    /// CCSCTL while the PLL spins up
    pub ccsctl_frclk: u32,
    pub ccspllctl: u32,
    /// CCSCTL once the PLL has locked
    pub ccsctl_pllclk: u32,
}

pub const PAC52XX: Protocol = Protocol {
    name: "pac52xx",
    regs: RegisterMap {
        flashlock: pac52xx::FLASHLOCK,
        status: pac52xx::FLASHSTATUS,
        flashpage: pac52xx::FLASHPAGE,
        erase: pac52xx::FLASHPERASE,
        memctl: None,
        ccsctl: None,
        ccspllctl: None,
    },
    keys: Keys {
        erase_unlock: pac52xx::FLASH_WRITE_KEY,
        write_unlock: pac52xx::FLASH_WRITE_KEY,
        page_erase: pac52xx::PERASE_KEY,
        memctl_unlock: None,
    },
    idle_mask: 0x3,
    flash_base: pac52xx::FLASH_BASE,
    num_pages: pac52xx::NUM_FLASH_PAGES,
    page_size: constants::PAGE_SIZE,
    granule: WriteGranule::Word,
    keyed_erase: false,
    memctl_value: None,
    clock_init: None,
};

pub const PAC55XX: Protocol = Protocol {
    name: "pac55xx",
    regs: RegisterMap {
        flashlock: pac55xx::FLASHLOCK,
        status: pac55xx::MEMSTATUS,
        flashpage: pac55xx::FLASHPAGE,
        erase: pac55xx::FLASHERASE,
        memctl: Some(pac55xx::MEMCTL),
        ccsctl: Some(pac55xx::CCSCTL),
        ccspllctl: Some(pac55xx::CCSPLLCTL),
    },
    keys: Keys {
        erase_unlock: pac55xx::LOCK_WRITE_ERASE_FLASH,
        write_unlock: pac55xx::LOCK_WRITE_ERASE_FLASH,
        page_erase: pac55xx::PAGE_ERASE_CMD,
        memctl_unlock: Some(pac55xx::LOCK_WRITE_MEMCTL),
    },
    idle_mask: 0x3,
    flash_base: pac55xx::FLASH_BASE,
    num_pages: pac55xx::NUM_FLASH_PAGES,
    page_size: constants::PAGE_SIZE,
    granule: WriteGranule::Row,
    keyed_erase: true,
    memctl_value: Some(pac55xx::MEMCTL_MCLK_30MHZ),
    clock_init: Some(ClockInit {
        ccsctl_frclk: pac55xx::CCSCTL_FRCLK,
        ccspllctl: pac55xx::CCSPLLCTL_150MHZ,
        ccsctl_pllclk: pac55xx::CCSCTL_PLLCLK,
    }),
};

/// Whole-array erase commands of the PAC55xx.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EraseKey {
    /// All program pages
    MassPage,
    /// All program pages plus INFO3
    MassProgInfo,
    /// INFO3 pages only
    Info3,
}

impl EraseKey {
    pub const fn key(self) -> u32 {
        match self {
            EraseKey::MassPage => pac55xx::MASS_ERASE_CMD,
            EraseKey::MassProgInfo => pac55xx::MASS_PROG_INFO_ERASE_CMD,
            EraseKey::Info3 => pac55xx::INFO3_ERASE_CMD,
        }
    }

    /// Whether the key clears the program array
    pub const fn erases_program_flash(self) -> bool {
        !matches!(self, EraseKey::Info3)
    }
}

/// One privileged register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// FLASHLOCK <- key
    Unlock(u32),
    /// FLASHLOCK <- 0
    Lock,
    /// FLASHPAGE <- page
    SelectPage(u32),
    /// Erase register <- key
    StartErase(u32),
    WriteMemctl(u32),
    SetClock(u32),
    SetPll(u32),
    /// Flash word store, the address is absolute
    Program { address: u32, value: u32 },
}

/// A command lowered onto the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegWrite {
    pub address: u32,
    pub value: u32,
}

impl fmt::Display for RegWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:08x}] <- 0x{:08x}", self.address, self.value)
    }
}

impl Command {
    pub fn into_raw(self, protocol: &Protocol) -> Result<RegWrite> {
        let regs = &protocol.regs;
        let (address, value) = match self {
            Command::Unlock(key) => (regs.flashlock, key),
            Command::Lock => (regs.flashlock, 0),
            Command::SelectPage(page) => {
                anyhow::ensure!(
                    page < protocol.num_pages,
                    FlashError::InvalidSector {
                        first: page,
                        last: page,
                        num_sectors: protocol.num_pages,
                    }
                );
                (regs.flashpage, page)
            }
            Command::StartErase(key) => (regs.erase, key),
            Command::WriteMemctl(value) => (required(regs.memctl, "MEMCTL")?, value),
            Command::SetClock(value) => (required(regs.ccsctl, "CCSCTL")?, value),
            Command::SetPll(value) => (required(regs.ccspllctl, "CCSPLLCTL")?, value),
            Command::Program { address, value } => (address, value),
        };
        Ok(RegWrite { address, value })
    }
}

fn required(register: Option<u32>, name: &'static str) -> Result<u32> {
    register.ok_or_else(|| FlashError::Unsupported(name).into())
}

impl Protocol {
    pub const fn flash_size(&self) -> u32 {
        self.num_pages * self.page_size
    }

    pub fn page_erase(&self, page: u32) -> Vec<Command> {
        vec![
            Command::Unlock(self.keys.erase_unlock),
            Command::SelectPage(page),
            Command::StartErase(self.keys.page_erase),
        ]
    }

    pub fn keyed_erase(&self, key: EraseKey) -> Result<Vec<Command>> {
        anyhow::ensure!(self.keyed_erase, FlashError::Unsupported("keyed erase"));
        Ok(vec![
            Command::Unlock(self.keys.erase_unlock),
            Command::StartErase(key.key()),
        ])
    }

    /// Arms programming. Word devices need this before every word, row
    /// devices once per write call.
    pub fn arm_write(&self) -> Command {
        Command::Unlock(self.keys.write_unlock)
    }

    pub fn lock(&self) -> Command {
        Command::Lock
    }

    /// Rewrites MEMCTL with WRITEWORDCNT cleared so the next row starts at
    /// word 0.
    pub fn reset_write_word_count(&self) -> Result<Vec<Command>> {
        let (Some(unlock), Some(value)) = (self.keys.memctl_unlock, self.memctl_value) else {
            anyhow::bail!(FlashError::Unsupported("MEMCTL"));
        };
        Ok(vec![Command::Unlock(unlock), Command::WriteMemctl(value)])
    }

    /// Clock setup up to the point where the PLL has to lock.
    pub fn clock_init_start(&self) -> Result<Vec<Command>> {
        let clocks = self.clocks()?;
        Ok(vec![
            Command::SetClock(clocks.ccsctl_frclk),
            Command::SetPll(clocks.ccspllctl),
        ])
    }

    /// Moves SCLK onto the locked PLL. MEMCTL must be rewritten afterwards
    /// to bring MCLK back into range.
    pub fn clock_switch_to_pll(&self) -> Result<Command> {
        Ok(Command::SetClock(self.clocks()?.ccsctl_pllclk))
    }

    fn clocks(&self) -> Result<&ClockInit> {
        Ok(self
            .clock_init
            .as_ref()
            .ok_or(FlashError::Unsupported("clock init"))?)
    }
}

bitfield! {
    /// FLASHSTATUS (PAC52xx) or MEMSTATUS (PAC55xx)
    pub struct FlashStatus(u32);
    impl Debug;
    pub write_busy, _: 0;
    pub erase_busy, _: 1;
}

impl FlashStatus {
    pub fn is_idle(&self, mask: u32) -> bool {
        self.0 & mask == 0
    }
}

impl From<u32> for FlashStatus {
    fn from(raw: u32) -> Self {
        FlashStatus(raw)
    }
}

bitfield! {
    /// CCSPLLCTL
    pub struct PllControl(u32);
    impl Debug;
    pub locked, _: 24;
}

impl From<u32> for PllControl {
    fn from(raw: u32) -> Self {
        PllControl(raw)
    }
}

bitfield! {
    /// MEMCTL
    pub struct MemCtl(u32);
    impl Debug;
    pub u32, write_word_count, set_write_word_count: 9, 8;
}

impl MemCtl {
    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl From<u32> for MemCtl {
    fn from(raw: u32) -> Self {
        MemCtl(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_erase_lowers_to_pac55xx_registers() {
        let writes = PAC55XX
            .page_erase(7)
            .into_iter()
            .map(|c| c.into_raw(&PAC55XX).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            writes,
            vec![
                RegWrite { address: 0x400D_0008, value: 0x43DF_140A },
                RegWrite { address: 0x400D_000C, value: 7 },
                RegWrite { address: 0x400D_0020, value: 0x8C79_9CA7 },
            ]
        );
    }

    #[test]
    fn page_erase_lowers_to_pac52xx_registers() {
        let writes = PAC52XX
            .page_erase(31)
            .into_iter()
            .map(|c| c.into_raw(&PAC52XX).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(
            writes,
            vec![
                RegWrite { address: 0x4002_0000, value: 0xAAAA_AAAA },
                RegWrite { address: 0x4002_0008, value: 31 },
                RegWrite { address: 0x4002_0014, value: 0xA5A5_5A5A },
            ]
        );
    }

    #[test]
    fn pac52xx_has_no_memctl_or_keyed_erase() {
        assert!(Command::WriteMemctl(0).into_raw(&PAC52XX).is_err());
        assert!(PAC52XX.keyed_erase(EraseKey::MassProgInfo).is_err());
        assert!(PAC52XX.clock_init_start().is_err());
    }

    #[test]
    fn clock_bring_up_comes_from_the_description() {
        let clocks = PAC55XX.clock_init.unwrap();
        let start = PAC55XX.clock_init_start().unwrap();
        assert_eq!(
            start,
            vec![
                Command::SetClock(clocks.ccsctl_frclk),
                Command::SetPll(clocks.ccspllctl)
            ]
        );
        assert_eq!(
            PAC55XX.clock_switch_to_pll().unwrap(),
            Command::SetClock(clocks.ccsctl_pllclk)
        );
        assert_eq!(
            PAC55XX.reset_write_word_count().unwrap()[1],
            Command::WriteMemctl(0x0072_0046)
        );

        let mut custom = PAC55XX;
        custom.memctl_value = None;
        assert!(custom.reset_write_word_count().is_err());
        custom.clock_init = None;
        assert!(custom.clock_switch_to_pll().is_err());
    }

    #[test]
    fn select_page_is_bounded() {
        assert!(Command::SelectPage(32).into_raw(&PAC52XX).is_err());
        assert!(Command::SelectPage(127).into_raw(&PAC55XX).is_ok());
    }

    #[test]
    fn status_idle_needs_both_bits_clear() {
        assert!(FlashStatus::from(0).is_idle(0x3));
        assert!(FlashStatus::from(0xF0).is_idle(0x3));
        assert!(!FlashStatus::from(0x1).is_idle(0x3));
        assert!(!FlashStatus::from(0x2).is_idle(0x3));
        assert!(!FlashStatus::from(0x3).is_idle(0x3));
        let st = FlashStatus::from(0x2);
        assert!(st.erase_busy() && !st.write_busy());
    }

    #[test]
    fn memctl_setting_clears_write_word_count() {
        let memctl = MemCtl::from(pac55xx::MEMCTL_MCLK_30MHZ);
        assert_eq!(memctl.write_word_count(), 0);
        assert!(PllControl::from(0x0101_2C45).locked());
        assert!(!PllControl::from(pac55xx::CCSPLLCTL_150MHZ).locked());
    }
}
