//! Abstract debug target interface.
use std::fmt;

use anyhow::Result;

use crate::error::FlashError;
use crate::protocol::{Command, Protocol, RegWrite};

pub use self::sim::{Access, SimConfig, SimTarget};

mod sim;

/// Execution state of the target core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetState {
    Halted,
    Running,
    Reset,
    #[default]
    Unknown,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetState::Halted => "halted",
            TargetState::Running => "running",
            TargetState::Reset => "reset",
            TargetState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// What the flash drivers need from the debug host: 32-bit accesses to the
/// target's memory space, the core state, and a cooperative sleep.
/// Might be SWD, JTAG, or a simulator.
pub trait Target {
    fn read_u32(&mut self, address: u32) -> Result<u32>;
    fn write_u32(&mut self, address: u32, value: u32) -> Result<()>;
    fn state(&self) -> TargetState;
    fn sleep_ms(&mut self, ms: u64);

    /// Fails with [`FlashError::TargetNotHalted`] unless the core is halted.
    fn ensure_halted(&self) -> Result<()> {
        if self.state() != TargetState::Halted {
            log::error!("Target not halted");
            anyhow::bail!(FlashError::TargetNotHalted);
        }
        Ok(())
    }

    fn transfer(&mut self, protocol: &Protocol, cmd: Command) -> Result<()> {
        let RegWrite { address, value } = cmd.into_raw(protocol)?;
        log::trace!("{:?} => [0x{:08x}] <- 0x{:08x}", cmd, address, value);
        self.write_u32(address, value)
    }
}

impl<T: Target + ?Sized> Target for &mut T {
    fn read_u32(&mut self, address: u32) -> Result<u32> {
        (**self).read_u32(address)
    }

    fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        (**self).write_u32(address, value)
    }

    fn state(&self) -> TargetState {
        (**self).state()
    }

    fn sleep_ms(&mut self, ms: u64) {
        (**self).sleep_ms(ms)
    }
}
