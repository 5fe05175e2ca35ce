/*
 * This file is part of QiTech Control.
 *
 * Copyright (C) 2025 QiTech Control contributors
 *
 * QiTech Control is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * QiTech Control is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with QiTech Control. If not, see <https://www.gnu.org/licenses/>.
 */

//! Command Line Interface
//!
//! Offline access to the device registry, commissioning checks, event replay
//! and mutation encoding.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context};
use clap::{Args, Parser, Subcommand};
use qc_core::addressing::parse_serial;
use qc_core::registry::group_devices_by_identification;
use qc_core::{
    check_assignment, get_cached_settings, match_roles, matching_roles, registry,
    DeviceFingerprint, DiscoveredDevice, LineTransport, MachineIdentificationUnique,
    MachineNamespace, MutationDispatcher, TestEl2008Machine, TestMachine,
};
use serde_json::Value;

use crate::replay::replay;

#[derive(Parser)]
#[command(name = "qcctl")]
#[command(version)]
#[command(about = "QiTech Control - machine registry and state sync client")]
#[command(long_about = "QiTech Control - machine registry and state sync client

Inspects the machine catalog, validates field-bus device fingerprints and
commissioning assignments, replays recorded event streams through the
namespace runtime and encodes mutation requests.

EXAMPLES:
    qcctl machines                                 List known machine types
    qcctl roles winder2                            Show a machine's device roles
    qcctl match winder2 --vendor-id 2 --product-id 0x1b813052 --revision 0x100034
    qcctl check devices.json                       Check discovered device assignments
    qcctl replay events.jsonl --machine testmachine --serial 1
    qcctl send testel2008machine 7 SetMode '{\"mode\":\"Automatic\"}'
    qcctl settings show                            Show all settings as JSON

ENVIRONMENT VARIABLES:
    RUST_LOG=debug         Enable debug logging
    QC_CONFIG_DIR=<dir>    Override the settings directory

FILES:
    ~/.config/qitech-control/settings.json   Client settings")]
#[command(propagate_version = true)]
pub struct Cli {
    /// JSON registry replacing the built-in machine table
    #[arg(long, global = true)]
    pub registry: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List every machine type in the registry
    Machines,

    /// Show the device roles a machine type declares
    Roles {
        /// Machine slug, e.g. winder2
        slug: String,
    },

    /// Match a device fingerprint against a machine's roles
    Match(MatchArgs),

    /// Check the machine assignments of discovered devices
    Check {
        /// JSON array of discovered devices
        devices: PathBuf,
    },

    /// Replay a recorded event stream through the namespace runtime
    Replay(ReplayArgs),

    /// Encode a mutation request as one JSON line on stdout
    Send(SendArgs),

    /// Settings management
    #[command(subcommand, about = "View client settings")]
    Settings(SettingsCommands),
}

#[derive(Args)]
pub struct MatchArgs {
    /// Machine slug
    pub slug: String,
    /// Vendor id (decimal or 0x hex)
    #[arg(long, value_parser = parse_u32)]
    pub vendor_id: u32,
    /// Product id (decimal or 0x hex)
    #[arg(long, value_parser = parse_u32)]
    pub product_id: u32,
    /// Revision (decimal or 0x hex)
    #[arg(long, value_parser = parse_u32)]
    pub revision: u32,
}

#[derive(Args)]
pub struct ReplayArgs {
    /// Newline-delimited JSON recording
    pub events: PathBuf,
    /// Machine slug (testmachine or testel2008machine)
    #[arg(long)]
    pub machine: String,
    /// Serial number of the recorded machine
    #[arg(long)]
    pub serial: String,
    /// Throttle interval in milliseconds (defaults to the configured value)
    #[arg(long)]
    pub interval_ms: Option<u64>,
}

#[derive(Args)]
pub struct SendArgs {
    /// Machine slug
    pub slug: String,
    /// Serial number of the target machine
    pub serial: String,
    /// Mutation action name
    pub action: String,
    /// Mutation value as JSON (null when omitted)
    pub value: Option<String>,
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show all settings as JSON
    Show,
    /// Show the settings file path
    Path,
}

/// Accepts decimal or `0x`-prefixed hexadecimal
pub fn parse_u32(text: &str) -> Result<u32, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", text, e))
}

pub fn run_cli(cli: &Cli) -> anyhow::Result<()> {
    execute_command(&cli.command)
}

fn execute_command(cmd: &Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Machines => cmd_machines(),
        Commands::Roles { slug } => cmd_roles(slug),
        Commands::Match(args) => cmd_match(args),
        Commands::Check { devices } => cmd_check(devices),
        Commands::Replay(args) => cmd_replay(args),
        Commands::Send(args) => cmd_send(args),
        Commands::Settings(sub) => cmd_settings(sub),
    }
}

fn lookup(slug: &str) -> anyhow::Result<&'static qc_core::MachineProperties> {
    registry()
        .lookup_slug(slug)
        .ok_or_else(|| anyhow!("Unknown machine slug: {}", slug))
}

// ============================================================================
// Registry Commands
// ============================================================================

fn cmd_machines() -> anyhow::Result<()> {
    let registry = registry();
    println!("{:<24} {:<10} {:<8} {:<6} Name", "Slug", "Id", "Version", "Roles");
    println!("{}", "-".repeat(72));
    for machine in registry.machines() {
        println!(
            "{:<24} {:<10} {:<8} {:<6} {}",
            machine.slug,
            machine.machine_identification.to_string(),
            machine.version,
            machine.device_roles.len(),
            machine.name
        );
    }
    println!();
    println!("{} machine types", registry.len());
    Ok(())
}

fn cmd_roles(slug: &str) -> anyhow::Result<()> {
    let machine = lookup(slug)?;
    let vendor = registry()
        .lookup_vendor(machine.machine_identification.vendor)
        .map(|v| v.name.as_str())
        .unwrap_or("unknown vendor");

    println!("{} {} ({})", machine.name, machine.version, vendor);
    if machine.device_roles.is_empty() {
        println!("  no device roles");
        return Ok(());
    }
    for role in &machine.device_roles {
        println!("  [{}] {}", role.role, role.role_label);
        for allowed in &role.allowed_devices {
            println!("      {}", allowed);
        }
    }
    Ok(())
}

fn cmd_match(args: &MatchArgs) -> anyhow::Result<()> {
    let machine = lookup(&args.slug)?;
    let fingerprint = DeviceFingerprint::new(args.vendor_id, args.product_id, args.revision);

    let matches = match_roles(&fingerprint, Some(&machine.device_roles));
    for (role, fits) in machine.device_roles.iter().zip(&matches) {
        let mark = if *fits { "yes" } else { "no" };
        println!("  [{}] {:<32} {}", role.role, role.role_label, mark);
    }

    let assignable = matching_roles(&fingerprint, &machine.device_roles);
    if assignable.is_empty() {
        println!("{} fits no role of {}", fingerprint, machine.slug);
    } else {
        println!("{} fits {} role(s) of {}", fingerprint, assignable.len(), machine.slug);
    }
    Ok(())
}

fn cmd_check(path: &Path) -> anyhow::Result<()> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let devices: Vec<DiscoveredDevice> = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;

    let grouping = group_devices_by_identification(&devices);
    let mut complete = true;

    for group in &grouping.device_groups {
        let report = check_assignment(registry(), group)?;
        let name = registry()
            .lookup_machine(&report.machine_identification_unique.machine_identification)
            .map(|m| m.name.as_str())
            .unwrap_or("unknown machine");

        println!("{} ({})", report.machine_identification_unique, name);
        for device in &report.devices {
            let status = match (device.role_declared, device.accepted) {
                (false, _) => "undeclared role",
                (true, false) => "rejected",
                (true, true) => "ok",
            };
            println!(
                "  address {:<5} role {:<3} {}",
                device.configured_address, device.role, status
            );
        }
        for role in &report.missing_roles {
            println!("  role {:<3} missing", role);
        }
        complete &= report.is_complete();
    }

    if !grouping.unidentified_devices.is_empty() {
        println!("Unidentified devices:");
        for device in &grouping.unidentified_devices {
            println!(
                "  address {:<5} {} {}",
                device.configured_address, device.name, device.fingerprint
            );
        }
    }

    if !complete {
        bail!("device assignments are incomplete");
    }
    Ok(())
}

// ============================================================================
// Namespace Commands
// ============================================================================

fn cmd_replay(args: &ReplayArgs) -> anyhow::Result<()> {
    let slug = args.machine.as_str();
    if slug == TestEl2008Machine::SLUG {
        replay_machine::<TestEl2008Machine>(args)
    } else if slug == TestMachine::SLUG {
        replay_machine::<TestMachine>(args)
    } else {
        bail!("Replay is not available for machine type {}", slug)
    }
}

fn replay_machine<M: MachineNamespace>(args: &ReplayArgs) -> anyhow::Result<()> {
    let serial = parse_serial(&args.serial)?;
    let key = MachineIdentificationUnique::new(M::MACHINE_IDENTIFICATION, serial);
    let interval = match args.interval_ms {
        Some(ms) => qc_core::settings::SyncSettings {
            throttle_interval_ms: ms,
        }
        .throttle_interval(),
        None => get_cached_settings().sync.throttle_interval(),
    };

    let file = fs::File::open(&args.events)
        .with_context(|| format!("opening {}", args.events.display()))?;
    let report = replay::<M, _>(BufReader::new(file), key, interval)?;

    for commit in &report.commits {
        let state = serde_json::to_string(commit.value.as_ref())?;
        let mark = if commit.changed { "" } else { " (unchanged)" };
        println!("#{} {}{}", commit.sequence, state, mark);
    }
    for error in &report.errors {
        eprintln!("line {}: {}", error.line, error.error);
    }
    println!(
        "{} events, {} commits, {} errors",
        report.events,
        report.commits.len(),
        report.errors.len()
    );

    if report.has_fatal_errors() {
        bail!("recording contains events that fail schema validation");
    }
    Ok(())
}

fn cmd_send(args: &SendArgs) -> anyhow::Result<()> {
    let machine = lookup(&args.slug)?;
    let serial = parse_serial(&args.serial)?;
    let target = MachineIdentificationUnique::new(machine.machine_identification, serial);
    let value = match &args.value {
        Some(text) => serde_json::from_str(text).context("parsing mutation value")?,
        None => Value::Null,
    };

    let dispatcher = MutationDispatcher::new(LineTransport::new(std::io::stdout()));
    dispatcher.send_raw(target, &args.action, value)?;
    Ok(())
}

// ============================================================================
// Settings Commands
// ============================================================================

fn cmd_settings(cmd: &SettingsCommands) -> anyhow::Result<()> {
    match cmd {
        SettingsCommands::Show => {
            let settings = qc_core::load_settings()?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsCommands::Path => {
            let path = qc_core::settings::get_settings_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_u32_accepts_hex_and_decimal() {
        assert_eq!(parse_u32("0x1b813052"), Ok(0x1b813052));
        assert_eq!(parse_u32("0X2"), Ok(2));
        assert_eq!(parse_u32(" 42 "), Ok(42));
        assert!(parse_u32("0xzz").is_err());
        assert!(parse_u32("-1").is_err());
    }

    #[test]
    fn test_match_arguments_parse() {
        let cli = Cli::try_parse_from([
            "qcctl",
            "match",
            "winder2",
            "--vendor-id",
            "2",
            "--product-id",
            "0x1b813052",
            "--revision",
            "0x100034",
        ])
        .unwrap();
        match cli.command {
            Commands::Match(args) => {
                assert_eq!(args.slug, "winder2");
                assert_eq!(args.product_id, 0x1b813052);
                assert_eq!(args.revision, 0x100034);
            }
            _ => panic!("expected match command"),
        }
    }

    #[test]
    fn test_global_registry_flag() {
        let cli = Cli::try_parse_from(["qcctl", "machines", "--registry", "custom.json"]).unwrap();
        assert_eq!(cli.registry, Some(PathBuf::from("custom.json")));
    }
}
