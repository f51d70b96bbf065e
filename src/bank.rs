//! Flash bank and sector model.
use anyhow::Result;

use crate::device::{self, Device};
use crate::error::FlashError;

/// What is known about a sector's erase state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErasedState {
    /// Not checked since probe
    #[default]
    Unknown,
    No,
    Yes,
}

impl ErasedState {
    /// Host encoding: -1 unknown, 0 no, 1 yes.
    pub const fn as_raw(self) -> i32 {
        match self {
            ErasedState::Unknown => -1,
            ErasedState::No => 0,
            ErasedState::Yes => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sector {
    /// Offset from the bank base
    pub offset: u32,
    pub size: u32,
    pub is_erased: ErasedState,
    /// Assumed protected until protection status can be read back
    pub is_protected: bool,
}

/// Per-bank state owned by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverPriv {
    pub probed: bool,
    /// Size given on the `flash bank` line. Kept by the PAC55xx driver only.
    pub user_bank_size: Option<u32>,
}

/// A contiguous flash region driven as one unit.
#[derive(Debug, Clone)]
pub struct FlashBank {
    pub name: String,
    pub driver: Device,
    pub base: u32,
    pub size: u32,
    pub chip_width: u32,
    pub bus_width: u32,
    pub target: String,
    sectors: Option<Vec<Sector>>,
    pub(crate) private: DriverPriv,
}

impl FlashBank {
    /// Builds a bank from the positional arguments of
    /// `flash bank <name> <driver> <base> <size> <chip_width> <bus_width> <target> ...`.
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Result<Self> {
        if args.len() < 6 {
            log::error!("flash bank needs at least 6 arguments, got {}", args.len());
            anyhow::bail!(FlashError::Syntax);
        }
        let arg = |i: usize| args[i].as_ref();
        let num = |i: usize| -> Result<u32> {
            device::parse_number(arg(i)).map_err(|e| {
                log::error!("bad number '{}': {}", arg(i), e);
                anyhow::Error::new(FlashError::Syntax)
            })
        };

        let driver: Device = arg(1).parse()?;
        let size = num(3)?;
        let private = DriverPriv {
            probed: false,
            user_bank_size: match driver {
                Device::Pac55xx => Some(size),
                Device::Pac52xx => None,
            },
        };
        Ok(FlashBank {
            name: arg(0).to_string(),
            driver,
            base: num(2)?,
            size,
            chip_width: num(4)?,
            bus_width: num(5)?,
            target: args.get(6).map(|s| s.as_ref().to_string()).unwrap_or_default(),
            sectors: None,
            private,
        })
    }

    pub fn is_probed(&self) -> bool {
        self.private.probed
    }

    pub fn driver_priv(&self) -> &DriverPriv {
        &self.private
    }

    /// Sector table, empty until probed.
    pub fn sectors(&self) -> &[Sector] {
        self.sectors.as_deref().unwrap_or(&[])
    }

    pub fn num_sectors(&self) -> u32 {
        self.sectors().len() as u32
    }

    /// Replaces the sector table with `num_pages` unknown, protected pages.
    pub(crate) fn build_sectors(&mut self, num_pages: u32, page_size: u32) {
        self.sectors = Some(
            (0..num_pages)
                .map(|i| Sector {
                    offset: i * page_size,
                    size: page_size,
                    is_erased: ErasedState::Unknown,
                    is_protected: true,
                })
                .collect(),
        );
    }

    pub(crate) fn clear_sectors(&mut self) {
        self.sectors = None;
    }

    pub(crate) fn set_erased(&mut self, index: u32, state: ErasedState) {
        if let Some(sector) = self
            .sectors
            .as_mut()
            .and_then(|s| s.get_mut(index as usize))
        {
            sector.is_erased = state;
        }
    }

    pub(crate) fn set_all_erased(&mut self) {
        for sector in self.sectors.iter_mut().flatten() {
            sector.is_erased = ErasedState::Yes;
        }
    }

    /// Fails with [`FlashError::InvalidSector`] unless `first <= last < num_sectors`.
    pub fn check_sector_range(&self, first: u32, last: u32) -> Result<()> {
        let num_sectors = self.num_sectors();
        if first > last || last >= num_sectors {
            log::error!(
                "sector range {}..={} invalid for bank {} ({} sectors)",
                first,
                last,
                self.name,
                num_sectors
            );
            anyhow::bail!(FlashError::InvalidSector {
                first,
                last,
                num_sectors,
            });
        }
        Ok(())
    }

    pub(crate) fn check_range(&self, offset: u32, count: u32) -> Result<()> {
        let fits = offset
            .checked_add(count)
            .is_some_and(|end| end <= self.size);
        anyhow::ensure!(
            fits,
            FlashError::OutOfRange {
                offset,
                count,
                size: self.size,
            }
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::flash_error;

    #[test]
    fn too_few_arguments_is_syntax_error() {
        let err = FlashBank::from_args(&["b0", "pac55xx", "0", "0", "0"]).unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::Syntax));
    }

    #[test]
    fn construction_leaves_bank_unprobed() {
        let bank =
            FlashBank::from_args(&["b0", "pac55xx", "0", "0x20000", "0", "0", "cpu"]).unwrap();
        assert!(!bank.is_probed());
        assert!(bank.sectors().is_empty());
        assert_eq!(bank.driver_priv().user_bank_size, Some(0x20000));

        let bank = FlashBank::from_args(&["b0", "pac52xx", "0", "0", "0", "0"]).unwrap();
        assert_eq!(bank.driver_priv().user_bank_size, None);
        assert_eq!(bank.target, "");
    }

    #[test]
    fn sector_table_layout() {
        let mut bank = FlashBank::from_args(&["b0", "pac52xx", "0", "0", "0", "0"]).unwrap();
        bank.build_sectors(32, 1024);
        assert_eq!(bank.num_sectors(), 32);
        for (i, s) in bank.sectors().iter().enumerate() {
            assert_eq!(s.offset, i as u32 * 1024);
            assert_eq!(s.size, 1024);
            assert_eq!(s.is_erased, ErasedState::Unknown);
            assert_eq!(s.is_erased.as_raw(), -1);
            assert!(s.is_protected);
        }
    }

    #[test]
    fn range_checks() {
        let mut bank = FlashBank::from_args(&["b0", "pac52xx", "0", "0x8000", "0", "0"]).unwrap();
        bank.build_sectors(32, 1024);
        assert!(bank.check_sector_range(0, 31).is_ok());
        assert!(bank.check_sector_range(5, 4).is_err());
        assert!(bank.check_sector_range(0, 32).is_err());
        assert!(bank.check_range(0x7FFC, 4).is_ok());
        assert!(bank.check_range(0x7FFC, 5).is_err());
        assert!(bank.check_range(u32::MAX, 2).is_err());
    }
}
