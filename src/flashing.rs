//! Host-facing flash driver operations.

use anyhow::Result;

use crate::bank::{ErasedState, FlashBank};
use crate::device::BankConfigFile;
use crate::error::FlashError;
use crate::protocol::EraseKey;
use crate::transport::Target;
use crate::{erase, probe, write};

/// A debug target together with the flash banks defined on it.
pub struct Flashing<T: Target> {
    target: T,
    banks: Vec<FlashBank>,
}

impl<T: Target> Flashing<T> {
    pub fn new(target: T) -> Self {
        Flashing {
            target,
            banks: Vec::new(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    /// `flash bank <name> <driver> <base> <size> <chip_width> <bus_width> <target> ...`
    ///
    /// Returns the new bank's id. The bank starts out unprobed.
    pub fn flash_bank_command<S: AsRef<str>>(&mut self, args: &[S]) -> Result<usize> {
        let bank = FlashBank::from_args(args)?;
        log::debug!(
            "flash bank #{}: {} ({}) base 0x{:08x} size 0x{:x}",
            self.banks.len(),
            bank.name,
            bank.driver,
            bank.base,
            bank.size
        );
        self.banks.push(bank);
        Ok(self.banks.len() - 1)
    }

    /// Defines every bank of a configuration file.
    pub fn add_banks(&mut self, config: &BankConfigFile) -> Result<()> {
        for bank in &config.banks {
            self.flash_bank_command(&bank.to_args())?;
        }
        Ok(())
    }

    pub fn banks(&self) -> &[FlashBank] {
        &self.banks
    }

    pub fn bank(&self, id: usize) -> Result<&FlashBank> {
        Ok(self.banks.get(id).ok_or(FlashError::NoSuchBank(id))?)
    }

    /// Drops a bank with its sector table and driver state. Ids of later
    /// banks shift down by one.
    pub fn remove_bank(&mut self, id: usize) -> Result<FlashBank> {
        anyhow::ensure!(id < self.banks.len(), FlashError::NoSuchBank(id));
        Ok(self.banks.remove(id))
    }

    fn split(&mut self, id: usize) -> Result<(&mut T, &mut FlashBank)> {
        let bank = self.banks.get_mut(id).ok_or(FlashError::NoSuchBank(id))?;
        Ok((&mut self.target, bank))
    }

    pub fn probe(&mut self, id: usize) -> Result<()> {
        let (target, bank) = self.split(id)?;
        probe::probe(target, bank)
    }

    pub fn auto_probe(&mut self, id: usize) -> Result<()> {
        let (target, bank) = self.split(id)?;
        probe::auto_probe(target, bank)
    }

    /// Erases sectors `first..=last`.
    pub fn erase(&mut self, id: usize, first: u32, last: u32) -> Result<()> {
        let (target, bank) = self.split(id)?;
        target.ensure_halted()?;
        probe::auto_probe(target, bank)?;
        erase::erase_pages(target, bank, first, last)
    }

    /// Programs `buffer` at `offset` from the bank base.
    ///
    /// On PAC55xx banks, bytes sharing a 16-byte row with the written range
    /// are programmed as 0xFF. See [`crate::write`].
    pub fn write(&mut self, id: usize, buffer: &[u8], offset: u32) -> Result<()> {
        let (target, bank) = self.split(id)?;
        target.ensure_halted()?;
        probe::auto_probe(target, bank)?;
        write::write(target, bank, buffer, offset)
    }

    pub fn erase_key(&mut self, id: usize, key: EraseKey) -> Result<()> {
        let (target, bank) = self.split(id)?;
        target.ensure_halted()?;
        probe::auto_probe(target, bank)?;
        erase::erase_key(target, bank, key)
    }

    pub fn mass_erase(&mut self, id: usize) -> Result<()> {
        let (target, bank) = self.split(id)?;
        target.ensure_halted()?;
        probe::auto_probe(target, bank)?;
        erase::mass_erase(target, bank)
    }

    // TODO: read the PAC55xx INFO2 write-protect bits once their layout is pinned down
    pub fn protect(&mut self, id: usize, set: bool, first: u32, last: u32) -> Result<()> {
        let bank = self.bank(id)?;
        log::debug!(
            "{}: protect {} {}..={} not implemented",
            bank.name,
            set,
            first,
            last
        );
        Ok(())
    }

    pub fn protect_check(&mut self, id: usize) -> Result<()> {
        let bank = self.bank(id)?;
        log::debug!("{}: protect_check not implemented", bank.name);
        Ok(())
    }

    /// Reads `len` bytes at `offset` from the bank base through word reads.
    pub fn read(&mut self, id: usize, offset: u32, len: u32) -> Result<Vec<u8>> {
        let (target, bank) = self.split(id)?;
        probe::auto_probe(target, bank)?;
        bank.check_range(offset, len)?;

        let start = bank.base + offset;
        let end = start + len;
        let mut data = Vec::with_capacity(len as usize + 8);
        let mut address = start & !0x3;
        while address < end {
            data.extend_from_slice(&target.read_u32(address)?.to_le_bytes());
            address += 4;
        }
        let skip = (start & 0x3) as usize;
        Ok(data[skip..skip + len as usize].to_vec())
    }

    /// Blank check: reads every sector back and records whether it is all
    /// 0xFF.
    pub fn erase_check(&mut self, id: usize) -> Result<()> {
        self.auto_probe(id)?;
        let sectors = self.bank(id)?.sectors().to_vec();
        for (index, sector) in sectors.iter().enumerate() {
            let data = self.read(id, sector.offset, sector.size)?;
            let state = if data.iter().all(|&b| b == 0xFF) {
                ErasedState::Yes
            } else {
                ErasedState::No
            };
            let (_, bank) = self.split(id)?;
            bank.set_erased(index as u32, state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::error::flash_error;
    use crate::protocol::{PAC52XX, PAC55XX};
    use crate::transport::{SimTarget, TargetState};

    fn flashing(device: Device) -> Flashing<SimTarget> {
        let mut f = Flashing::new(SimTarget::new(device.protocol()));
        f.add_banks(&device.default_config().unwrap()).unwrap();
        f
    }

    #[test]
    fn erase_auto_probes_first() {
        let mut f = flashing(Device::Pac52xx);
        assert!(!f.bank(0).unwrap().is_probed());
        f.erase(0, 3, 5).unwrap();
        let bank = f.bank(0).unwrap();
        assert!(bank.is_probed());
        for (i, s) in bank.sectors().iter().enumerate() {
            let expected = if (3..=5).contains(&i) {
                ErasedState::Yes
            } else {
                ErasedState::Unknown
            };
            assert_eq!(s.is_erased, expected, "sector {}", i);
        }
    }

    #[test]
    fn unknown_bank_id() {
        let mut f = flashing(Device::Pac55xx);
        let err = f.erase(3, 0, 0).unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::NoSuchBank(3)));
        assert!(f.remove_bank(1).is_err());
        assert!(f.remove_bank(0).is_ok());
        assert!(f.banks().is_empty());
    }

    #[test]
    fn halted_gate_precedes_auto_probe() {
        let mut f = flashing(Device::Pac55xx);
        f.target_mut().set_state(TargetState::Running);
        let err = f.write(0, &[1, 2, 3], 0).unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::TargetNotHalted));
        assert!(f.target().log().is_empty());
        assert!(!f.bank(0).unwrap().is_probed());
    }

    #[test]
    fn read_handles_unaligned_window() {
        let mut f = flashing(Device::Pac52xx);
        f.target_mut().preload(0x10, &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(f.read(0, 0x11, 5).unwrap(), vec![2, 3, 4, 5, 6]);
        assert!(f.read(0, 0x7FFF, 2).is_err());
    }

    #[test]
    fn blank_check_marks_dirty_sectors() {
        let mut f = flashing(Device::Pac52xx);
        f.target_mut().preload(PAC52XX.page_size * 2 + 5, &[0]);
        f.erase_check(0).unwrap();
        let bank = f.bank(0).unwrap();
        assert_eq!(bank.sectors()[1].is_erased, ErasedState::Yes);
        assert_eq!(bank.sectors()[2].is_erased, ErasedState::No);
    }

    #[test]
    fn protect_stubs_do_nothing() {
        let mut f = flashing(Device::Pac55xx);
        f.protect(0, true, 0, 3).unwrap();
        f.protect_check(0).unwrap();
        assert!(f.target().log().is_empty());
        assert_eq!(f.target().protocol(), &PAC55XX);
    }
}
