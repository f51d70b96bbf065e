//! Page, keyed and mass erase.
use anyhow::Result;

use crate::bank::{ErasedState, FlashBank};
use crate::constants::FLASH_ERASE_TIMEOUT;
use crate::error::FlashError;
use crate::poll::wait_idle;
use crate::protocol::{EraseKey, Protocol};
use crate::transport::Target;

/// Runs `op` against an unlocked controller and leaves FLASHLOCK at 0
/// afterwards, also when `op` fails. A failing re-lock on the error path is
/// logged and the error from `op` returned.
pub(crate) fn with_lockdown<T, F>(target: &mut T, protocol: &Protocol, op: F) -> Result<()>
where
    T: Target,
    F: FnOnce(&mut T) -> Result<()>,
{
    match op(target) {
        Ok(()) => target.transfer(protocol, protocol.lock()),
        Err(err) => {
            if let Err(lock_err) = target.transfer(protocol, protocol.lock()) {
                log::warn!("could not re-lock flash controller: {:#}", lock_err);
            }
            Err(err)
        }
    }
}

/// Erases pages `first..=last`, marking each one erased as it completes.
pub fn erase_pages<T: Target>(
    target: &mut T,
    bank: &mut FlashBank,
    first: u32,
    last: u32,
) -> Result<()> {
    target.ensure_halted()?;
    bank.check_sector_range(first, last)?;

    let protocol = bank.driver.protocol();
    with_lockdown(target, protocol, |target| {
        for page in first..=last {
            for cmd in protocol.page_erase(page) {
                target.transfer(protocol, cmd)?;
            }
            wait_idle(target, protocol, FLASH_ERASE_TIMEOUT)?;
            bank.set_erased(page, ErasedState::Yes);
            log::debug!("page {} erased", page);
        }
        Ok(())
    })?;
    log::info!("{}: erased pages {}..={}", bank.name, first, last);
    Ok(())
}

/// Starts a whole-array erase with one of the PAC55xx erase keys.
pub fn erase_key<T: Target>(target: &mut T, bank: &mut FlashBank, key: EraseKey) -> Result<()> {
    target.ensure_halted()?;

    let protocol = bank.driver.protocol();
    let seq = protocol.keyed_erase(key)?;
    with_lockdown(target, protocol, |target| {
        for cmd in seq {
            target.transfer(protocol, cmd)?;
        }
        wait_idle(target, protocol, FLASH_ERASE_TIMEOUT)?;
        if key.erases_program_flash() {
            bank.set_all_erased();
        }
        Ok(())
    })?;
    log::info!("{}: {:?} erase done", bank.name, key);
    Ok(())
}

/// Erases the whole bank: a keyed mass erase where the controller has one,
/// otherwise every page in turn.
pub fn mass_erase<T: Target>(target: &mut T, bank: &mut FlashBank) -> Result<()> {
    if bank.driver.protocol().keyed_erase {
        return erase_key(target, bank, EraseKey::MassProgInfo);
    }
    let last = bank
        .num_sectors()
        .checked_sub(1)
        .ok_or(FlashError::NotProbed)?;
    erase_pages(target, bank, 0, last)?;
    bank.set_all_erased();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::flash_error;
    use crate::probe::probe;
    use crate::protocol::{PAC52XX, PAC55XX};
    use crate::transport::{SimConfig, SimTarget, TargetState};

    fn probed(name: &str, sim: &mut SimTarget) -> FlashBank {
        let mut bank = FlashBank::from_args(&["b", name, "0", "0", "0", "0"]).unwrap();
        probe(sim, &mut bank).unwrap();
        sim.clear_log();
        bank
    }

    #[test]
    fn pac52xx_relocks_after_page_loop() {
        let mut sim = SimTarget::new(&PAC52XX);
        let mut bank = probed("pac52xx", &mut sim);
        erase_pages(&mut sim, &mut bank, 0, 1).unwrap();
        assert_eq!(
            sim.writes_to(PAC52XX.regs.flashlock),
            vec![0xAAAA_AAAA, 0xAAAA_AAAA, 0]
        );
        assert_eq!(sim.writes_to(PAC52XX.regs.flashpage), vec![0, 1]);
        assert_eq!(sim.writes_to(PAC52XX.regs.erase), vec![0xA5A5_5A5A; 2]);
    }

    #[test]
    fn keyed_erase_is_pac55xx_only() {
        let mut sim = SimTarget::new(&PAC52XX);
        let mut bank = probed("pac52xx", &mut sim);
        let err = erase_key(&mut sim, &mut bank, EraseKey::MassPage).unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::Unsupported("keyed erase")));
        assert!(sim.writes().is_empty());
    }

    #[test]
    fn info3_erase_leaves_sector_flags() {
        let mut sim = SimTarget::new(&PAC55XX);
        let mut bank = probed("pac55xx", &mut sim);
        erase_key(&mut sim, &mut bank, EraseKey::Info3).unwrap();
        assert_eq!(sim.writes_to(PAC55XX.regs.erase), vec![0x1266_FF45]);
        assert!(bank.sectors().iter().all(|s| s.is_erased == ErasedState::Unknown));
        assert_eq!(sim.flashlock(), 0);
    }

    #[test]
    fn timeout_midway_keeps_completed_pages_and_relocks() {
        let mut sim = SimTarget::new(&PAC55XX);
        let mut bank = probed("pac55xx", &mut sim);
        erase_pages(&mut sim, &mut bank, 2, 2).unwrap();
        sim.config_mut().stuck_busy = true;
        let err = erase_pages(&mut sim, &mut bank, 3, 4).unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::Timeout));
        assert_eq!(bank.sectors()[2].is_erased, ErasedState::Yes);
        assert_eq!(bank.sectors()[3].is_erased, ErasedState::Unknown);
        assert_eq!(sim.flashlock(), 0);
    }

    #[test]
    fn write_fault_stops_erase() {
        let mut sim = SimTarget::with_config(
            &PAC52XX,
            SimConfig {
                fail_write_at: Some(PAC52XX.regs.erase),
                ..Default::default()
            },
        );
        let mut bank = probed("pac52xx", &mut sim);
        let err = erase_pages(&mut sim, &mut bank, 0, 3).unwrap_err();
        assert_eq!(flash_error(&err), None);
        assert_eq!(sim.writes_to(PAC52XX.regs.flashpage), vec![0]);
        assert!(bank.sectors().iter().all(|s| s.is_erased == ErasedState::Unknown));
    }

    #[test]
    fn running_target_is_rejected() {
        let mut sim = SimTarget::new(&PAC52XX);
        let mut bank = probed("pac52xx", &mut sim);
        sim.set_state(TargetState::Running);
        let err = mass_erase(&mut sim, &mut bank).unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::TargetNotHalted));
        assert!(sim.log().is_empty());
    }
}
