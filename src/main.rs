use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use pacflash::command::find_driver;
use pacflash::device::{self, BankConfigFile};
use pacflash::error::flash_error;
use pacflash::{Device, ErasedState, Flashing, SimTarget, TargetState};

#[derive(clap::Parser)]
#[command(
    name = "pacflash",
    about = "PAC52xx/PAC55xx flash programming against a simulated memory controller",
    version
)]
struct Cli {
    /// Flash driver of the simulated target
    #[arg(long, short, default_value = "pac55xx")]
    device: Device,
    /// YAML bank definitions, defaults to the device's single built-in bank
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Bank id to operate on
    #[arg(long, short, default_value_t = 0)]
    bank: usize,
    /// Raw image copied into the simulated flash before running
    #[arg(long)]
    preload: Option<PathBuf>,
    /// Leave the simulated core running instead of halted
    #[arg(long)]
    running: bool,
    /// Print every register access afterwards
    #[arg(long)]
    trace: bool,
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// List flash banks, their sector state and the driver commands
    Info {},
    /// Probe the bank, bringing up clocks where needed
    Probe {},
    /// Erase sectors first..=last
    Erase { first: u32, last: u32 },
    /// Erase the whole bank
    MassErase {},
    /// Program a firmware file (bin, hex, ihex, elf)
    Write {
        path: PathBuf,
        /// Bank offset, defaults to the image's load address
        #[arg(long, value_parser = parse_u32)]
        offset: Option<u32>,
    },
    /// Hexdump part of the bank
    Dump {
        #[arg(value_parser = parse_u32)]
        offset: u32,
        #[arg(value_parser = parse_u32)]
        len: u32,
    },
    /// Read every sector back and record which ones are blank
    BlankCheck {},
    /// Run a driver command, e.g. `pac55xx mass_erase 0`
    Exec {
        #[arg(required = true, num_args = 1..)]
        words: Vec<String>,
    },
}

fn parse_u32(s: &str) -> Result<u32> {
    device::parse_number(s)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        simplelog::LevelFilter::Debug
    } else {
        simplelog::LevelFilter::Info
    };
    let _ = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let result = run(cli);
    if let Err(err) = &result {
        if let Some(code) = flash_error(err).map(|e| e.code()) {
            log::error!("{}: {:#}", code, err);
        }
    }
    result
}

fn run(cli: Cli) -> Result<()> {
    let mut target = SimTarget::new(cli.device.protocol());
    if cli.running {
        target.set_state(TargetState::Running);
    }
    if let Some(path) = &cli.preload {
        let raw = std::fs::read(path)?;
        let size = cli.device.protocol().flash_size() as usize;
        anyhow::ensure!(raw.len() <= size, "preload image larger than {} bytes", size);
        target.preload(0, &raw);
    }

    let config = match &cli.config {
        Some(path) => BankConfigFile::load(path)?,
        None => cli.device.default_config()?,
    };
    if let Some(other) = config.banks.iter().find(|b| b.driver != cli.device) {
        anyhow::bail!(
            "bank {} uses driver {}, but the simulated target is a {}",
            other.name,
            other.driver.name(),
            cli.device.name()
        );
    }

    let mut flashing = Flashing::new(target);
    flashing.add_banks(&config)?;
    let id = cli.bank;

    match cli.command {
        Cmd::Info {} => {
            dump_info(&flashing);
            if let Some(driver) = find_driver(cli.device.name()) {
                for line in driver.help_text().lines() {
                    log::info!("{}", line);
                }
            }
        }
        Cmd::Probe {} => {
            flashing.probe(id)?;
            dump_info(&flashing);
        }
        Cmd::Erase { first, last } => {
            flashing.auto_probe(id)?;
            flashing.bank(id)?.check_sector_range(first, last)?;
            let pb = progress(u64::from(last - first) + 1, "pages")?;
            for page in first..=last {
                flashing.erase(id, page, page)?;
                pb.inc(1);
            }
            pb.finish_with_message("erased");
        }
        Cmd::MassErase {} => {
            flashing.mass_erase(id)?;
            log::info!("Mass erase complete");
        }
        Cmd::Write { path, offset } => {
            let image = pacflash::format::read_firmware_from_file(&path)?;
            flashing.auto_probe(id)?;
            let bank = flashing.bank(id)?;
            let offset = match (offset, image.address) {
                (Some(offset), _) => offset,
                (None, Some(address)) => address.checked_sub(bank.base).ok_or_else(|| {
                    anyhow::format_err!("image at 0x{:08x} is below the bank", address)
                })?,
                (None, None) => 0,
            };
            let page_size = bank.sectors().first().map(|s| s.size).unwrap_or(1024);
            log::info!("Firmware size: {}", image.data.len());

            let pb = progress(image.data.len() as u64, "bytes")?;
            let mut written = 0usize;
            while written < image.data.len() {
                let at = offset + written as u32;
                let room = (page_size - at % page_size) as usize;
                let chunk = &image.data[written..image.data.len().min(written + room)];
                flashing.write(id, chunk, at)?;
                written += chunk.len();
                pb.inc(chunk.len() as u64);
            }
            pb.finish_with_message("written");
        }
        Cmd::Dump { offset, len } => {
            let data = flashing.read(id, offset, len)?;
            let mut out = Vec::new();
            hxdmp::hexdump(&data, &mut out)?;
            println!("{}", String::from_utf8_lossy(&out));
        }
        Cmd::BlankCheck {} => {
            flashing.erase_check(id)?;
            dump_info(&flashing);
        }
        Cmd::Exec { words } => {
            let out = flashing.run_command(&words.join(" "))?;
            if !out.is_empty() {
                println!("{}", out);
            }
        }
    }

    if cli.trace {
        for access in flashing.target().log() {
            println!("{}", access);
        }
        println!("{}ms spent sleeping", flashing.target().elapsed_ms());
    }

    Ok(())
}

fn progress(len: u64, unit: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template(&format!(
            "[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {} {{msg}}",
            unit
        ))?
        .progress_chars("#>-"),
    );
    Ok(pb)
}

fn dump_info(flashing: &Flashing<SimTarget>) {
    for (id, bank) in flashing.banks().iter().enumerate() {
        log::info!(
            "#{} {}: {} base 0x{:08x} size {}KiB, probed: {}",
            id,
            bank.name,
            bank.driver,
            bank.base,
            bank.size / 1024,
            bank.is_probed()
        );
        let count = |state: ErasedState| {
            bank.sectors()
                .iter()
                .filter(|s| s.is_erased == state)
                .count()
        };
        if !bank.sectors().is_empty() {
            log::info!(
                "  {} sectors: {} erased, {} dirty, {} unknown",
                bank.num_sectors(),
                count(ErasedState::Yes),
                count(ErasedState::No),
                count(ErasedState::Unknown)
            );
        }
    }
}
