use std::collections::BTreeMap;
use std::thread;
use std::time::Instant;

use anyhow::{bail, Context};
use colored::Colorize;
use tessera_backend::{open_backend, BackendConfig};
use tessera_registry::{ErrorKind, Registry, RegistryConfig, RegistryError, SaveOptions};
use tessera_types::{Version, VersionSelector};

use crate::cli::*;
use crate::settings::Settings;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let backend_config = settings.backend_config(cli.backend.as_deref())?;
    tracing::debug!(backend = %backend_config, "selected backend");

    let open = || -> anyhow::Result<Registry> {
        let backend = open_backend(&backend_config).with_context(|| format!("opening {backend_config}"))?;
        Ok(Registry::new(backend, settings.registry.clone()))
    };
    match cli.command {
        Command::List(args) => cmd_list(&open()?, args),
        Command::Versions(args) => cmd_versions(&open()?, args),
        Command::Dump(args) => {
            print!("{}", open()?.dump(args.latest_only)?);
            Ok(())
        }
        Command::Metadata(args) => cmd_metadata(&open()?, args),
        Command::Delete(args) => cmd_delete(&open()?, args),
        Command::LockStatus(args) => cmd_lock_status(&open()?, args),
        Command::Put(args) => cmd_put(&open()?, args),
        Command::Get(args) => cmd_get(&open()?, args),
        Command::Stress(args) => cmd_stress(args, &backend_config, &settings.registry),
    }
}

fn cmd_list(registry: &Registry, args: ListArgs) -> anyhow::Result<()> {
    let names = registry.list_objects()?;
    let mut shown = 0;
    for name in names
        .iter()
        .filter(|n| args.prefix.as_deref().map_or(true, |p| n.as_str().starts_with(p)))
    {
        println!("{name}");
        shown += 1;
    }
    if shown == 0 {
        println!("No objects.");
    }
    Ok(())
}

fn cmd_versions(registry: &Registry, args: VersionsArgs) -> anyhow::Result<()> {
    let versions = registry.list_versions(&args.name)?;
    if versions.is_empty() {
        println!("No versions of {}.", args.name.bold());
        return Ok(());
    }
    let latest = registry.latest_version(&args.name)?;
    for version in &versions {
        if latest.as_ref() == Some(version) {
            println!("{}  ({})", version.to_string().yellow().bold(), "latest".green());
        } else {
            println!("{}", version.to_string().yellow());
        }
    }
    Ok(())
}

fn cmd_metadata(registry: &Registry, args: MetadataArgs) -> anyhow::Result<()> {
    let selector: VersionSelector = args.version.parse()?;
    let metadata = registry.fetch_metadata(&args.name, selector)?;
    println!("{}", String::from_utf8_lossy(&metadata.to_json()?));
    Ok(())
}

fn cmd_delete(registry: &Registry, args: DeleteArgs) -> anyhow::Result<()> {
    let selector: VersionSelector = args.version.parse()?;
    let removed = registry.delete(&args.name, selector)?;
    if removed.is_empty() {
        println!("Nothing to delete for {}.", args.name.bold());
    }
    for version in removed {
        println!("{} Deleted {}@{}", "✓".green(), args.name.bold(), version.to_string().yellow());
    }
    Ok(())
}

fn cmd_lock_status(registry: &Registry, args: LockStatusArgs) -> anyhow::Result<()> {
    let status = registry.lock_status(&args.name)?;
    match status.holder {
        Some(holder) if status.is_locked => {
            println!("{} is {} by {}", args.name.bold(), "locked".red(), holder.cyan())
        }
        _ => println!("{} is {}", args.name.bold(), "unlocked".green()),
    }
    Ok(())
}

fn cmd_put(registry: &Registry, args: PutArgs) -> anyhow::Result<()> {
    let data = std::fs::read(&args.file).with_context(|| format!("reading {}", args.file.display()))?;
    let mut options = SaveOptions::new().extra("source_file", args.file.display().to_string());
    if let Some(version) = args.version {
        options = options.version(version);
    }
    for tag in args.tag {
        options = options.tag(tag);
    }
    let version = registry.save_with(&args.name, &data, options)?;
    println!(
        "{} Stored {} bytes as {}@{}",
        "✓".green().bold(),
        data.len(),
        args.name.bold(),
        version.to_string().yellow()
    );
    Ok(())
}

fn cmd_get(registry: &Registry, args: GetArgs) -> anyhow::Result<()> {
    let selector: VersionSelector = args.version.parse()?;
    let value = registry.load_dyn(&args.name, selector)?;
    let data: &[u8] = if let Some(bytes) = value.downcast_ref::<Vec<u8>>() {
        bytes
    } else if let Some(text) = value.downcast_ref::<String>() {
        text.as_bytes()
    } else {
        let metadata = registry.fetch_metadata(&args.name, args.version.parse()?)?;
        bail!("{} holds {}, which has no byte representation", args.name, metadata.type_tag);
    };
    std::fs::write(&args.file, data).with_context(|| format!("writing {}", args.file.display()))?;
    println!("{} Wrote {} bytes to {}", "✓".green().bold(), data.len(), args.file.display());
    Ok(())
}

// ---- stress ----

#[derive(Debug, Default)]
struct WorkerReport {
    committed: Vec<Version>,
    failures: BTreeMap<ErrorKind, usize>,
    retryable: usize,
}

/// Each worker opens its own backend from `config`, so locking is exercised
/// through storage rather than shared memory.
fn cmd_stress(args: StressArgs, config: &BackendConfig, registry_config: &RegistryConfig) -> anyhow::Result<()> {
    if matches!(config, BackendConfig::Memory) {
        bail!("stress needs storage shared between backend instances; memory:// is per instance");
    }
    if args.workers == 0 || args.ops == 0 {
        bail!("--workers and --ops must be positive");
    }

    let setup = Registry::new(open_backend(config)?, registry_config.clone());
    if args.reset {
        let removed = setup.delete(&args.name, VersionSelector::All)?;
        println!("Reset {}: removed {} versions", args.name.bold(), removed.len());
    }
    let before = setup.list_versions(&args.name)?.len();

    println!(
        "Stressing {} on {} with {} workers x {} ops",
        args.name.bold(),
        config.to_string().cyan(),
        args.workers,
        args.ops
    );
    let start = Instant::now();
    let reports = thread::scope(|scope| {
        let handles: Vec<_> = (0..args.workers)
            .map(|worker| {
                let name = args.name.as_str();
                scope.spawn(move || stress_worker(worker, name, args.ops, config, registry_config))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow::anyhow!("stress worker panicked")).and_then(|r| r))
            .collect::<anyhow::Result<Vec<_>>>()
    })?;
    let elapsed = start.elapsed();

    let committed: usize = reports.iter().map(|r| r.committed.len()).sum();
    let retryable: usize = reports.iter().map(|r| r.retryable).sum();
    let mut failures: BTreeMap<ErrorKind, usize> = BTreeMap::new();
    for report in &reports {
        for (kind, count) in &report.failures {
            *failures.entry(*kind).or_default() += count;
        }
    }
    let fatal: usize = failures.values().sum::<usize>() - retryable;

    let versions = setup.list_versions(&args.name)?;
    let latest: Option<i64> = match setup.latest_version(&args.name)? {
        Some(v) => Some(setup.load(&args.name, VersionSelector::Exact(v))?),
        None => None,
    };

    println!("  Committed: {} in {:.2?}", committed.to_string().green(), elapsed);
    println!("  Versions:  {} (was {})", versions.len(), before);
    if let Some(value) = latest {
        println!("  Latest:    {}", value.to_string().yellow());
    }
    for (kind, count) in &failures {
        println!("  {} {kind:?}: {count}", "✗".red());
    }

    if versions.len() != before + committed {
        bail!(
            "version count {} does not match {} committed writes",
            versions.len(),
            committed
        );
    }
    if fatal > 0 {
        bail!("{fatal} non-retryable failures");
    }
    println!("{} No conflicts between writers.", "✓".green().bold());
    Ok(())
}

fn stress_worker(
    worker: usize,
    name: &str,
    ops: usize,
    config: &BackendConfig,
    registry_config: &RegistryConfig,
) -> anyhow::Result<WorkerReport> {
    let registry = Registry::new(open_backend(config)?, registry_config.clone());
    let mut report = WorkerReport::default();

    for op in 0..ops {
        let outcome = if op % 2 == 0 {
            let seed = i64::try_from(worker * 1000 + op).unwrap_or(i64::MAX);
            registry.save(name, &seed)
        } else {
            update(&registry, name)
        };
        match outcome {
            Ok(version) => {
                tracing::debug!(worker, op, version = %version, "stress write");
                report.committed.push(version);
            }
            Err(e) => {
                tracing::warn!(worker, op, error = %e, "stress write failed");
                if e.is_retryable() {
                    report.retryable += 1;
                }
                *report.failures.entry(e.kind()).or_default() += 1;
            }
        }
    }
    Ok(report)
}

/// Read the latest value and write it back incremented.
fn update(registry: &Registry, name: &str) -> Result<Version, RegistryError> {
    let current = match registry.load::<i64>(name, VersionSelector::Latest) {
        Ok(value) => value,
        Err(RegistryError::ObjectNotFound { .. }) => 0,
        Err(e) => return Err(e),
    };
    registry.save_with(name, &(current + 1), SaveOptions::new().tag("update"))
}
