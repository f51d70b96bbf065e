//! Bank probing and PAC55xx clock bring-up.
use anyhow::Result;

use crate::bank::FlashBank;
use crate::constants::PLL_LOCK_TIMEOUT;
use crate::erase::with_lockdown;
use crate::poll::wait_pll_lock;
use crate::protocol::Protocol;
use crate::transport::Target;

/// Rebuilds the sector table from the device geometry and runs device
/// setup. The bank counts as probed only if everything succeeded.
pub fn probe<T: Target>(target: &mut T, bank: &mut FlashBank) -> Result<()> {
    let protocol = bank.driver.protocol();

    bank.private.probed = false;
    bank.clear_sectors();

    bank.base = protocol.flash_base;
    bank.size = protocol.flash_size();
    bank.build_sectors(protocol.num_pages, protocol.page_size);

    if protocol.clock_init.is_some() {
        init(target, protocol)?;
    }

    bank.private.probed = true;
    log::info!(
        "{}: {} x {}B pages at 0x{:08x}",
        bank.name,
        protocol.num_pages,
        protocol.page_size,
        bank.base
    );
    Ok(())
}

pub fn auto_probe<T: Target>(target: &mut T, bank: &mut FlashBank) -> Result<()> {
    if bank.is_probed() {
        return Ok(());
    }
    probe(target, bank)
}

/// Clocks the core from the 150 MHz PLL and the flash controller at 30 MHz.
/// Flash timing is only valid after this.
pub fn init<T: Target>(target: &mut T, protocol: &Protocol) -> Result<()> {
    target.ensure_halted()?;

    for cmd in protocol.clock_init_start()? {
        target.transfer(protocol, cmd)?;
    }
    wait_pll_lock(target, protocol, PLL_LOCK_TIMEOUT)?;
    target.transfer(protocol, protocol.clock_switch_to_pll()?)?;

    let set_mclk = protocol.reset_write_word_count()?;
    with_lockdown(target, protocol, |target| {
        for cmd in set_mclk {
            target.transfer(protocol, cmd)?;
        }
        Ok(())
    })?;
    log::debug!("{}: clocks initialised", protocol.name);
    Ok(())
}
