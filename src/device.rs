//! Supported devices and bank configuration files.
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::protocol::{self, Protocol};

/// A flash driver, one per device family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// 32 x 1KiB pages, word programming
    Pac52xx,
    /// 128 x 1KiB pages, 16-byte row programming, PLL bring-up before use
    Pac55xx,
}

impl Device {
    pub const ALL: [Device; 2] = [Device::Pac52xx, Device::Pac55xx];

    pub const fn protocol(&self) -> &'static Protocol {
        match self {
            Device::Pac52xx => &protocol::PAC52XX,
            Device::Pac55xx => &protocol::PAC55XX,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.protocol().name
    }

    /// Built-in bank definition for this device.
    pub fn default_config(&self) -> Result<BankConfigFile> {
        let raw = match self {
            Device::Pac52xx => include_str!("../devices/pac52xx.yaml"),
            Device::Pac55xx => include_str!("../devices/pac55xx.yaml"),
        };
        BankConfigFile::from_yaml(raw)
    }
}

impl ::std::fmt::Display for Device {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        let p = self.protocol();
        write!(
            f,
            "{}({} x {}B pages @ 0x{:08x})",
            p.name, p.num_pages, p.page_size, p.flash_base
        )
    }
}

impl FromStr for Device {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Device::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| anyhow::format_err!("flash driver '{}' not found", s))
    }
}

/// Contents of a bank configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfigFile {
    pub banks: Vec<BankConfig>,
}

/// One `flash bank` definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankConfig {
    pub name: String,
    pub driver: Device,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub base: u32,
    #[serde(deserialize_with = "parse_address_and_offset")]
    pub size: u32,
    #[serde(default)]
    pub chip_width: u32,
    #[serde(default)]
    pub bus_width: u32,
    pub target: String,
}

impl BankConfigFile {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let file: BankConfigFile = serde_yaml::from_str(raw)?;
        anyhow::ensure!(!file.banks.is_empty(), "no flash banks defined");
        Ok(file)
    }

    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loading bank config from {}", path.as_ref().display());
        Self::from_yaml(&raw)
    }
}

impl BankConfig {
    /// Positional arguments of the equivalent
    /// `flash bank <name> <driver> <base> <size> <chip_width> <bus_width> <target>`.
    pub fn to_args(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.driver.name().to_string(),
            format!("0x{:08x}", self.base),
            format!("0x{:x}", self.size),
            self.chip_width.to_string(),
            self.bus_width.to_string(),
            self.target.clone(),
        ]
    }
}

/// Parses `0x..` hex, plain decimal, or a decimal with a `K`, `KB` or `KiB`
/// suffix.
pub fn parse_number(s: &str) -> Result<u32> {
    let s = s.trim();
    let n = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)?
    } else if let Some(kib) = s
        .strip_suffix("KiB")
        .or_else(|| s.strip_suffix("KB"))
        .or_else(|| s.strip_suffix('K'))
    {
        kib.parse::<u32>()?
            .checked_mul(1024)
            .ok_or_else(|| anyhow::format_err!("{} overflows u32", s))?
    } else {
        s.parse()?
    };
    Ok(n)
}

fn parse_address_and_offset<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u32),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Str(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}
