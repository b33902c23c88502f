//! Subcommand implementations.

use cf_core::config::loader::load_config;
use cf_core::config::models::AppConfig;
use cf_core::serialization::{registry, VersionLocks};
use cf_core::Workflow;
use cf_protocol::{ItemStatus, ItemSummary};
use color_eyre::eyre::{bail, eyre, Result, WrapErr};
use colored::{ColoredString, Colorize};
use std::path::Path;

pub const TRACING_TARGET: &str = "cf_cli::commands";

/// Parse `tag=version`.
pub fn parse_lock(arg: &str) -> Result<(String, u32), String> {
    let (tag, version) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected TAG=VERSION, got '{arg}'"))?;
    let version = version
        .parse()
        .map_err(|e| format!("bad version in '{arg}': {e}"))?;
    if tag.is_empty() {
        return Err(format!("empty tag in '{arg}'"));
    }
    Ok((tag.to_string(), version))
}

async fn config(root: &Path) -> Result<AppConfig> {
    load_config(root)
        .await
        .wrap_err_with(|| format!("failed to load configuration from {}", root.display()))
}

/// Load and run one workflow as the configuration asks.
fn load_and_run(path: &Path, config: &AppConfig) -> Result<Workflow> {
    let mut workflow = Workflow::load(path, registry())
        .wrap_err_with(|| format!("failed to load {}", path.display()))?;
    workflow.set_auto_plot(config.global.workflow.plot);
    if config.global.workflow.estimate_on_load {
        workflow.run_all()?;
    } else {
        workflow.apply_all()?;
    }
    Ok(workflow)
}

fn colored_status(status: ItemStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        ItemStatus::Valid => text.green(),
        ItemStatus::Invalid => text.red().bold(),
        ItemStatus::Loading | ItemStatus::Waiting => text.yellow(),
        ItemStatus::Estimating | ItemStatus::Applying => text.cyan(),
    }
}

fn print_summary(item: &ItemSummary) {
    let name = item.name.as_deref().unwrap_or("");
    println!(
        "{:>3}  {:<20} {:<12} {}",
        item.index,
        item.operation,
        name,
        colored_status(item.status)
    );
    for (kind, diagnostic) in &item.diagnostics {
        let line = format!("{kind}: {}", diagnostic.message);
        if kind.ends_with("error") {
            println!("     {}", line.red());
        } else {
            println!("     {}", line.yellow());
        }
    }
}

pub async fn run(root: &Path, file: &Path, json: bool) -> Result<()> {
    let config = config(root).await?;
    let workflow = load_and_run(file, &config)?;
    let summaries = workflow.summaries();

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        println!("{}", file.display().to_string().bold());
        for item in &summaries {
            print_summary(item);
        }
    }
    Ok(())
}

pub fn notebook(file: &Path, output: Option<&Path>) -> Result<()> {
    let workflow = Workflow::load(file, registry())
        .wrap_err_with(|| format!("failed to load {}", file.display()))?;
    let text = serde_json::to_string_pretty(&workflow.notebook().to_json())?;
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            tracing::info!(target: TRACING_TARGET, path = %path.display(), "wrote notebook");
        }
        None => println!("{text}"),
    }
    Ok(())
}

pub async fn upgrade(
    root: &Path,
    input: &Path,
    output: &Path,
    locks: Vec<(String, u32)>,
) -> Result<()> {
    let config = config(root).await?;
    let mut pins = config.global.serialization.lock_versions.clone();
    pins.extend(locks);
    for (tag, version) in &pins {
        let known = registry()
            .tags()
            .into_iter()
            .any(|info| &info.tag == tag && info.dump_versions.contains(version));
        if !known {
            bail!("tag '{tag}' cannot be written at version {version}");
        }
    }

    let workflow = Workflow::load(input, registry())
        .wrap_err_with(|| format!("failed to load {}", input.display()))?;
    workflow
        .save(output, registry(), &VersionLocks::from(pins))
        .wrap_err_with(|| format!("failed to save {}", output.display()))?;
    println!(
        "{} {} -> {}",
        "upgraded".green(),
        input.display(),
        output.display()
    );
    Ok(())
}

pub async fn batch(root: &Path) -> Result<()> {
    let config = config(root).await?;
    if config.workflows.is_empty() {
        println!("no workflows under {}", root.join(".cytoflow/workflows").display());
        return Ok(());
    }

    let mut failed = 0;
    for path in &config.workflows {
        match load_and_run(path, &config) {
            Ok(workflow) => {
                let summaries = workflow.summaries();
                let invalid = summaries
                    .iter()
                    .filter(|s| s.status == ItemStatus::Invalid)
                    .count();
                let verdict = if invalid == 0 {
                    "ok".green()
                } else {
                    failed += 1;
                    format!("{invalid} invalid").red()
                };
                println!("{}  {} items  {verdict}", path.display(), summaries.len());
            }
            Err(err) => {
                failed += 1;
                tracing::warn!(target: TRACING_TARGET, path = %path.display(), error = %err, "workflow failed");
                println!("{}  {}", path.display(), format!("{err:#}").red());
            }
        }
    }

    if failed > 0 {
        return Err(eyre!("{failed} of {} workflows failed", config.workflows.len()));
    }
    Ok(())
}

pub fn tags() {
    for info in registry().tags() {
        let join = |versions: &[u32]| {
            versions
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        let load = if info.loads_any_version {
            "any".to_string()
        } else {
            join(&info.load_versions)
        };
        println!(
            "{:<24} dump: {:<8} load: {}",
            info.tag.bold(),
            join(&info.dump_versions),
            load
        );
    }
}
