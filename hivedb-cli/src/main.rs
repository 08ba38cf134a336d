//! HiveDB maintenance tool
//!
//! Offline operations against a storage root: inspect tenants, scan and
//! clean the legacy single-file layout, run health checks and repair.

use anyhow::{bail, Context};
use hivedb_core::storage::{StorageConfig, StorageEngine};
use std::path::PathBuf;

const USAGE: &str = "\
hivedb-admin - HiveDB maintenance tool

USAGE:
    hivedb-admin [--data-dir DIR] <COMMAND>

COMMANDS:
    tenants              List cataloged tenants
    legacy               List legacy single-file store artifacts
    legacy --clean       Delete legacy artifacts (one-way migration)
    health [TENANT]      Health report for a tenant, or the catalog
    health --all         Health report for every cataloged tenant
    repair [TENANT]      Auto-repair a tenant, or the catalog + orphan sweep
";

fn main() -> anyhow::Result<()> {
    let mut args: Vec<String> = std::env::args().skip(1).collect();

    let mut data_dir = PathBuf::from("data");
    if args.first().map(String::as_str) == Some("--data-dir") {
        if args.len() < 2 {
            bail!("--data-dir requires a value\n\n{USAGE}");
        }
        data_dir = PathBuf::from(args.remove(1));
        args.remove(0);
    }

    let Some(command) = args.first().cloned() else {
        bail!("missing command\n\n{USAGE}");
    };

    let engine = StorageEngine::new(StorageConfig {
        data_dir: data_dir.clone(),
        ..Default::default()
    })
    .with_context(|| format!("failed to open storage root {data_dir:?}"))?;

    match command.as_str() {
        "tenants" => {
            let tenants = engine.list_tenants()?;
            if tenants.is_empty() {
                println!("no tenants");
            }
            for tenant in tenants {
                let marker = if tenant.is_test { " [test]" } else { "" };
                println!("{}  {}{}", tenant.id, tenant.name, marker);
            }
        }
        "legacy" => {
            if args.get(1).map(String::as_str) == Some("--clean") {
                let removed = engine.clean_legacy()?;
                println!("removed {removed} legacy artifact(s)");
            } else {
                let artifacts = engine.legacy_artifacts()?;
                if artifacts.is_empty() {
                    println!("no legacy artifacts");
                }
                for path in artifacts {
                    println!("{}", path.display());
                }
            }
        }
        "health" => match args.get(1).map(String::as_str) {
            Some("--all") => {
                let reports = engine.check_all()?;
                println!("{}", serde_json::to_string_pretty(&reports)?);
            }
            tenant => {
                let report = engine.check_health(tenant);
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        },
        "repair" => {
            let outcome = engine.auto_fix(args.get(1).map(String::as_str));
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        other => bail!("unknown command {other:?}\n\n{USAGE}"),
    }

    engine.shutdown();
    Ok(())
}
