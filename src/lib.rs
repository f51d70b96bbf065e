//! NOR flash drivers for the PAC52xx and PAC55xx memory controllers, driven
//! through a debug target's 32-bit memory accesses.

pub mod bank;
pub mod command;
pub mod constants;
pub mod device;
pub mod erase;
pub mod error;
pub mod flashing;
pub mod format;
pub mod poll;
pub mod probe;
pub mod protocol;
pub mod transport;
pub mod write;

pub use self::bank::{ErasedState, FlashBank, Sector};
pub use self::device::Device;
pub use self::error::FlashError;
pub use self::flashing::Flashing;
pub use self::protocol::{Command, EraseKey, Protocol};
pub use self::transport::{SimTarget, Target, TargetState};
