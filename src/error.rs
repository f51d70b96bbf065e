//! Flash driver error codes.
//!
//! Every operation returns `anyhow::Result`. Failures the driver raises itself
//! carry a [`FlashError`], which callers recover with
//! `err.downcast_ref::<FlashError>()`. Transport errors are passed through
//! untouched.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashError {
    /// Bad argument count or malformed argument
    Syntax,
    TargetNotHalted,
    /// Destination offset is not a multiple of `required`
    DstBreaksAlignment { offset: u32, required: u32 },
    /// Controller stayed busy for the whole poll budget
    Timeout,
    PllLockTimeout,
    /// Access past the end of the bank
    OutOfRange { offset: u32, count: u32, size: u32 },
    InvalidSector { first: u32, last: u32, num_sectors: u32 },
    NotProbed,
    /// The device has no such register or command
    Unsupported(&'static str),
    NoSuchBank(usize),
}

impl FlashError {
    /// Host-level return code name.
    pub fn code(&self) -> &'static str {
        match self {
            FlashError::Syntax => "ERROR_COMMAND_SYNTAX_ERROR",
            FlashError::TargetNotHalted => "ERROR_TARGET_NOT_HALTED",
            FlashError::DstBreaksAlignment { .. } => "ERROR_FLASH_DST_BREAKS_ALIGNMENT",
            FlashError::OutOfRange { .. } => "ERROR_FLASH_DST_OUT_OF_BANK",
            FlashError::InvalidSector { .. } => "ERROR_FLASH_SECTOR_INVALID",
            FlashError::NoSuchBank(_) => "ERROR_FLASH_BANK_INVALID",
            FlashError::Timeout
            | FlashError::PllLockTimeout
            | FlashError::NotProbed
            | FlashError::Unsupported(_) => "ERROR_FAIL",
        }
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::Syntax => write!(f, "command syntax error"),
            FlashError::TargetNotHalted => write!(f, "target not halted"),
            FlashError::DstBreaksAlignment { offset, required } => write!(
                f,
                "offset 0x{:08x} breaks required {}-byte alignment",
                offset, required
            ),
            FlashError::Timeout => write!(f, "timed out waiting for flash"),
            FlashError::PllLockTimeout => write!(f, "timed out waiting for PLL lock"),
            FlashError::OutOfRange {
                offset,
                count,
                size,
            } => write!(
                f,
                "access of {} bytes at 0x{:08x} exceeds bank size 0x{:x}",
                count, offset, size
            ),
            FlashError::InvalidSector {
                first,
                last,
                num_sectors,
            } => write!(
                f,
                "invalid sector range {}..={} (bank has {} sectors)",
                first, last, num_sectors
            ),
            FlashError::NotProbed => write!(f, "flash bank not probed"),
            FlashError::Unsupported(what) => write!(f, "not supported by this device: {}", what),
            FlashError::NoSuchBank(id) => write!(f, "no flash bank #{}", id),
        }
    }
}

impl std::error::Error for FlashError {}

/// Extracts the driver error code from an `anyhow` error chain, if any.
pub fn flash_error(err: &anyhow::Error) -> Option<FlashError> {
    err.chain()
        .find_map(|e| e.downcast_ref::<FlashError>())
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_is_recovered_through_context() {
        let err = anyhow::Error::new(FlashError::TargetNotHalted).context("erase failed");
        assert_eq!(flash_error(&err), Some(FlashError::TargetNotHalted));
        assert_eq!(
            flash_error(&err).map(|e| e.code()),
            Some("ERROR_TARGET_NOT_HALTED")
        );
    }

    #[test]
    fn transport_errors_carry_no_code() {
        let err = anyhow::anyhow!("SWD ack fault");
        assert_eq!(flash_error(&err), None);
    }
}
