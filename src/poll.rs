//! Bounded busy-waits on controller status.
use anyhow::Result;

use crate::error::FlashError;
use crate::protocol::{FlashStatus, PllControl, Protocol};
use crate::transport::Target;

/// Polls the status register until no erase or write is in progress.
///
/// Each busy sample costs one tick and a 1 ms sleep; the sample after the
/// last tick fails with [`FlashError::Timeout`]. A stuck controller therefore
/// sees `timeout` poll/sleep pairs followed by one final poll.
pub fn wait_idle<T: Target>(target: &mut T, protocol: &Protocol, timeout: u32) -> Result<()> {
    let mut remaining = timeout;
    loop {
        let status = FlashStatus::from(target.read_u32(protocol.regs.status)?);
        log::debug!("status: {:?}", status);

        if status.is_idle(protocol.idle_mask) {
            return Ok(());
        }
        if remaining == 0 {
            log::error!("timed out waiting for flash");
            anyhow::bail!(FlashError::Timeout);
        }
        remaining -= 1;
        target.sleep_ms(1);
    }
}

/// Polls CCSPLLCTL until the lock bit sets, with the same tick accounting as
/// [`wait_idle`].
pub fn wait_pll_lock<T: Target>(target: &mut T, protocol: &Protocol, timeout: u32) -> Result<()> {
    let address = protocol
        .regs
        .ccspllctl
        .ok_or(FlashError::Unsupported("CCSPLLCTL"))?;
    let mut remaining = timeout;
    loop {
        let pll = PllControl::from(target.read_u32(address)?);
        if pll.locked() {
            log::debug!("PLL locked: {:?}", pll);
            return Ok(());
        }
        if remaining == 0 {
            log::error!("timed out waiting for PLL lock");
            anyhow::bail!(FlashError::PllLockTimeout);
        }
        remaining -= 1;
        target.sleep_ms(1);
    }
}
