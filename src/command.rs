//! Driver registry and the per-driver command groups.
//!
//! Each driver registers a command group named after it with two exec
//! commands: `info` and `mass_erase <bank_id>`. `<group> help` lists them.
use anyhow::{Context, Result};

use crate::device::Device;
use crate::error::FlashError;
use crate::flashing::Flashing;
use crate::transport::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverInfo {
    pub device: Device,
    /// Command group, same as the driver name
    pub group: &'static str,
    pub help: &'static str,
    pub commands: &'static [CommandInfo],
}

const EXEC_COMMANDS: &[CommandInfo] = &[
    CommandInfo {
        name: "info",
        usage: "N/A",
        help: "Get chip info",
    },
    CommandInfo {
        name: "mass_erase",
        usage: "bank_id",
        help: "Erase entire device flash.",
    },
];

pub const DRIVERS: [DriverInfo; 2] = [
    DriverInfo {
        device: Device::Pac52xx,
        group: "pac52xx",
        help: "PAC52xx flash command group",
        commands: EXEC_COMMANDS,
    },
    DriverInfo {
        device: Device::Pac55xx,
        group: "pac55xx",
        help: "PAC55xx flash command group",
        commands: EXEC_COMMANDS,
    },
];

pub fn find_driver(name: &str) -> Option<&'static DriverInfo> {
    DRIVERS.iter().find(|d| d.group == name)
}

impl CommandInfo {
    /// One usage line, e.g. `pac55xx mass_erase <bank_id>`.
    pub fn usage_line(&self, group: &str) -> String {
        match self.usage {
            "N/A" => format!("{} {}", group, self.name),
            args => format!("{} {} <{}>", group, self.name, args),
        }
    }
}

impl DriverInfo {
    pub fn command(&self, name: &str) -> Option<&'static CommandInfo> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Group help followed by one `usage - help` line per command.
    pub fn help_text(&self) -> String {
        let mut text = String::from(self.help);
        for cmd in self.commands {
            text.push_str(&format!("\n  {} - {}", cmd.usage_line(self.group), cmd.help));
        }
        text
    }
}

impl<T: Target> Flashing<T> {
    /// Runs one driver command line such as `pac55xx mass_erase 0` and
    /// returns what it prints.
    pub fn run_command(&mut self, line: &str) -> Result<String> {
        let mut words = line.split_whitespace();
        let group = words.next().ok_or(FlashError::Syntax)?;
        let driver = find_driver(group).ok_or_else(|| {
            log::error!("unknown command group '{}'", group);
            FlashError::Syntax
        })?;
        let name = words.next().ok_or(FlashError::Syntax)?;
        let args: Vec<&str> = words.collect();

        match name {
            "help" => Ok(driver.help_text()),
            "info" => {
                log::debug!("{} info not implemented", driver.group);
                Ok(String::new())
            }
            "mass_erase" => self.handle_mass_erase(driver, &args),
            _ => {
                log::error!("unknown {} command '{}'", driver.group, name);
                log::info!("{}", driver.help_text());
                anyhow::bail!(FlashError::Syntax);
            }
        }
    }

    fn handle_mass_erase(&mut self, driver: &DriverInfo, args: &[&str]) -> Result<String> {
        let Some(arg) = args.first() else {
            let usage = driver
                .command("mass_erase")
                .map(|c| c.usage_line(driver.group))
                .unwrap_or_default();
            return Err(anyhow::Error::new(FlashError::Syntax)).context(usage);
        };
        let id: usize = arg
            .parse()
            .map_err(|_| anyhow::Error::new(FlashError::Syntax))
            .with_context(|| format!("bank id '{}' is not a number", arg))?;
        let bank = self.bank(id)?;
        anyhow::ensure!(
            bank.driver == driver.device,
            "flash bank #{} uses driver {}, not {}",
            id,
            bank.driver.name(),
            driver.group
        );

        match self.mass_erase(id) {
            Ok(()) => {
                log::info!("{} mass erase complete", driver.group);
                Ok(format!("{} mass erase complete", driver.group))
            }
            Err(err) => Err(err).with_context(|| format!("{} mass erase failed", driver.group)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bank::ErasedState;
    use crate::error::flash_error;
    use crate::transport::SimTarget;

    fn flashing(device: Device) -> Flashing<SimTarget> {
        let mut f = Flashing::new(SimTarget::new(device.protocol()));
        f.add_banks(&device.default_config().unwrap()).unwrap();
        f
    }

    #[test]
    fn registry_lists_both_groups() {
        assert_eq!(DRIVERS.len(), 2);
        for d in &DRIVERS {
            assert_eq!(d.group, d.device.name());
            assert!(d.commands.iter().any(|c| c.name == "mass_erase"));
        }
        assert!(find_driver("stm32f1x").is_none());
    }

    #[test]
    fn pac52xx_mass_erase_erases_every_page() {
        let mut f = flashing(Device::Pac52xx);
        let out = f.run_command("pac52xx mass_erase 0").unwrap();
        assert_eq!(out, "pac52xx mass erase complete");
        let flashpage = crate::protocol::PAC52XX.regs.flashpage;
        assert_eq!(f.target().writes_to(flashpage), (0..32u32).collect::<Vec<_>>());
        assert!(f
            .bank(0)
            .unwrap()
            .sectors()
            .iter()
            .all(|s| s.is_erased == ErasedState::Yes));
    }

    #[test]
    fn mass_erase_without_bank_is_syntax_error() {
        let mut f = flashing(Device::Pac55xx);
        let err = f.run_command("pac55xx mass_erase").unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::Syntax));
        assert_eq!(err.to_string(), "pac55xx mass_erase <bank_id>");
        let err = f.run_command("pac55xx mass_erase zero").unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::Syntax));
    }

    #[test]
    fn help_lists_registered_commands() {
        let mut f = flashing(Device::Pac52xx);
        let help = f.run_command("pac52xx help").unwrap();
        assert_eq!(
            help,
            "PAC52xx flash command group\n  \
             pac52xx info - Get chip info\n  \
             pac52xx mass_erase <bank_id> - Erase entire device flash."
        );
        assert!(f.target().log().is_empty());
    }

    #[test]
    fn mass_erase_of_missing_bank() {
        let mut f = flashing(Device::Pac55xx);
        let err = f.run_command("pac55xx mass_erase 4").unwrap_err();
        assert_eq!(flash_error(&err), Some(FlashError::NoSuchBank(4)));
    }

    #[test]
    fn group_must_match_bank_driver() {
        let mut f = flashing(Device::Pac55xx);
        assert!(f.run_command("pac52xx mass_erase 0").is_err());
        assert!(f.target().log().is_empty());
    }

    #[test]
    fn info_and_unknown_commands() {
        let mut f = flashing(Device::Pac52xx);
        assert_eq!(f.run_command("pac52xx info").unwrap(), "");
        for line in ["", "pac52xx", "pac52xx unlock 0", "flash info 0"] {
            let err = f.run_command(line).unwrap_err();
            assert_eq!(flash_error(&err), Some(FlashError::Syntax), "{:?}", line);
        }
    }

    #[test]
    fn failed_mass_erase_reports_failure() {
        let mut f = flashing(Device::Pac55xx);
        f.auto_probe(0).unwrap();
        f.target_mut().config_mut().stuck_busy = true;
        let err = f.run_command("pac55xx mass_erase 0").unwrap_err();
        assert_eq!(err.to_string(), "pac55xx mass erase failed");
        assert_eq!(flash_error(&err), Some(FlashError::Timeout));
    }
}
