//! Memory controller register addresses and magic keys.

/// Busy-wait budget, in 1 ms polls, for a page or mass erase.
pub const FLASH_ERASE_TIMEOUT: u32 = 100;
/// Busy-wait budget, in 1 ms polls, for one word (PAC52xx) or one row (PAC55xx).
pub const FLASH_WRITE_TIMEOUT: u32 = 5;
/// Busy-wait budget, in 1 ms polls, for the PAC55xx PLL to lock.
pub const PLL_LOCK_TIMEOUT: u32 = 100;

pub const PAGE_SIZE: u32 = 1024;

pub mod pac52xx {
    pub const FLASH_BASE: u32 = 0x0000_0000;
    pub const NUM_FLASH_PAGES: u32 = 32;

    pub const MEMCTL_BASE: u32 = 0x4002_0000;
    /// [31:0] Must hold the write key before a page can be written or erased
    pub const FLASHLOCK: u32 = MEMCTL_BASE + 0x00;
    pub const FLASHSTATUS: u32 = MEMCTL_BASE + 0x04;
    /// [4:0] Page selected for erase
    pub const FLASHPAGE: u32 = MEMCTL_BASE + 0x08;
    pub const FLASHPERASE: u32 = MEMCTL_BASE + 0x14;

    /// Allow writes to any page not protected by the RW bits
    pub const FLASH_WRITE_KEY: u32 = 0xAAAA_AAAA;
    pub const PERASE_KEY: u32 = 0xA5A5_5A5A;
}

pub mod pac55xx {
    pub const FLASH_BASE: u32 = 0x0000_0000;
    pub const NUM_FLASH_PAGES: u32 = 128;

    pub const MEMCTL: u32 = 0x400D_0000;
    pub const MEMSTATUS: u32 = 0x400D_0004;
    pub const FLASHLOCK: u32 = 0x400D_0008;
    pub const FLASHPAGE: u32 = 0x400D_000C;
    pub const FLASHERASE: u32 = 0x400D_0020;
    pub const CCSCTL: u32 = 0x400D_0400;
    pub const CCSPLLCTL: u32 = 0x400D_0404;

    /// FLASHLOCK value that opens MEMCTL for writing
    pub const LOCK_WRITE_MEMCTL: u32 = 0xD513_B490;
    /// FLASHLOCK value that allows flash writes and erases
    pub const LOCK_WRITE_ERASE_FLASH: u32 = 0x43DF_140A;
    /// Permanently disables SWD through INFO2.SWDFUSE. Never issued.
    pub const LOCK_WRITE_SWDFUSE: u32 = 0x79B4_F762;
    /// Opens INFO2.SECEN. Never issued.
    pub const LOCK_WRITE_SECEN: u32 = 0x1D85_5C1E;

    pub const PAGE_ERASE_CMD: u32 = 0x8C79_9CA7;
    pub const INFO3_ERASE_CMD: u32 = 0x1266_FF45;
    pub const MASS_ERASE_CMD: u32 = 0x09EE_76C9;
    pub const MASS_PROG_INFO_ERASE_CMD: u32 = 0x856E_0E70;

    /// MCLKSEL=MCLK, MCLKDIV=HCLK/5 (30 MHz), WRITEWORDCNT=0
    pub const MEMCTL_MCLK_30MHZ: u32 = 0x0072_0046;
    /// FRCLK=CLKREF, LDO on, SCLK=FRCLK, HCLKDIV=SCLK/1
    pub const CCSCTL_FRCLK: u32 = 0x0000_F105;
    /// PLLCLK=150 MHz: PLLEN=1, OUTDIV=/2, INDIV=4, FBDIV=300
    pub const CCSPLLCTL_150MHZ: u32 = 0x0001_2C45;
    /// FRCLK=CLKREF, LDO on, SCLK=PLLCLK, HCLKDIV=SCLK/2
    pub const CCSCTL_PLLCLK: u32 = 0x0100_F115;

    /// Bytes per programming burst
    pub const ROW_SIZE: usize = 16;
}
