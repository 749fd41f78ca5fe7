//! Runs per-brand command lists against an inventory of devices.
//!
//! ```text
//! cargo run --example batch_run -- device_list.txt device_conf.yaml [ssh_conf.yaml]
//! ```
//!
//! Inventory lines are `host user password brand`; blank lines and lines
//! starting with `#` are skipped. The commands file (TOML or YAML) holds one
//! list per brand, matched case-insensitively:
//!
//! ```yaml
//! Huawei:
//!   - display version
//!   - display interface brief
//! H3C:
//!   - display version
//! ```
//!
//! Each device's output is written to `<brand>/<YYYY-MM-DD>/<host>.txt`.
//! Logs go to every entry of `LogOutputPaths` (`stdout` and `stderr` name the
//! standard streams), or to stderr when the list is empty.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use log::{error, info, warn};
use netmux::config::SshConfig;
use netmux::device::DeviceFamily;
use netmux::session::{SessionPool, Target};
use tokio::task::JoinSet;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Command lists keyed by brand.
type CommandBook = HashMap<String, Vec<String>>;

type OutputLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Debug)]
struct InventoryEntry {
    target: Target,
    brand: String,
}

fn print_usage() {
    eprintln!(
        "Usage: cargo run --example batch_run -- <inventory.txt> <commands.(toml|yaml)> [ssh-config.(json|toml|yaml)]"
    );
}

fn parse_inventory(raw: &str) -> anyhow::Result<Vec<InventoryEntry>> {
    let mut entries = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [host, user, password, brand] = fields[..] else {
            bail!(
                "inventory line {}: expected `host user password brand`, got {} field(s)",
                idx + 1,
                fields.len()
            );
        };
        let target = Target::from_host_port(user, password, host)
            .with_context(|| format!("inventory line {}", idx + 1))?
            .with_family(DeviceFamily::from_hint(brand));
        entries.push(InventoryEntry {
            target,
            brand: brand.to_lowercase(),
        });
    }
    Ok(entries)
}

fn load_commands(path: &Path) -> anyhow::Result<CommandBook> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading commands '{}'", path.display()))?;
    let book: CommandBook = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(&raw)?,
        Some("toml") => toml::from_str(&raw)?,
        _ => bail!("unsupported commands file: {}", path.display()),
    };
    Ok(book
        .into_iter()
        .map(|(brand, commands)| (brand.to_lowercase(), commands))
        .collect())
}

/// One formatting layer per configured output.
fn output_layers(paths: &[String]) -> anyhow::Result<Vec<OutputLayer>> {
    let mut outputs: Vec<OutputLayer> = Vec::new();
    for path in paths {
        let layer = match path.as_str() {
            "stdout" => fmt::layer().with_writer(std::io::stdout).boxed(),
            "stderr" => fmt::layer().with_writer(std::io::stderr).boxed(),
            path => {
                let parent = Path::new(path).parent();
                if let Some(dir) = parent.filter(|d| !d.as_os_str().is_empty()) {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("creating log directory '{}'", dir.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file '{path}'"))?;
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .boxed()
            }
        };
        outputs.push(layer);
    }
    if outputs.is_empty() {
        outputs.push(fmt::layer().with_writer(std::io::stderr).boxed());
    }
    Ok(outputs)
}

fn init_logging(config: &SshConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(output_layers(&config.log_output_paths)?)
        .with(filter)
        .try_init()?;
    Ok(())
}

fn write_result(
    root: &Path,
    brand: &str,
    date: &str,
    host: &str,
    output: &str,
) -> anyhow::Result<PathBuf> {
    let dir = root.join(brand).join(date);
    fs::create_dir_all(&dir).with_context(|| format!("creating '{}'", dir.display()))?;
    let path = dir.join(format!("{host}.txt"));
    fs::write(&path, output).with_context(|| format!("writing '{}'", path.display()))?;
    Ok(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        process::exit(2);
    }

    let config = match args.get(3) {
        Some(path) => SshConfig::load(path)?,
        None => SshConfig::default(),
    };
    init_logging(&config)?;

    let inventory = fs::read_to_string(&args[1])
        .with_context(|| format!("reading inventory '{}'", args[1]))?;
    let entries = parse_inventory(&inventory)?;
    let book = load_commands(Path::new(&args[2]))?;

    let pool = Arc::new(SessionPool::new(config)?);
    let sweep = pool.spawn_idle_sweep();

    let mut jobs = JoinSet::new();
    for entry in entries {
        let Some(commands) = book.get(&entry.brand).cloned() else {
            warn!("{} No commands for brand '{}', skipping", entry.target.host, entry.brand);
            continue;
        };
        let pool = pool.clone();
        jobs.spawn(async move {
            let result = pool.run(&entry.target, &commands).await;
            (entry, result)
        });
    }

    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    while let Some(joined) = jobs.join_next().await {
        let (entry, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!("Device task panicked: {e}");
                continue;
            }
        };
        let host = &entry.target.host;
        match result {
            Ok(output) => match write_result(Path::new("."), &entry.brand, &date, host, &output) {
                Ok(path) => info!("{} Output saved to {}", host, path.display()),
                Err(e) => error!("{} {:#}", host, e),
            },
            Err(e) => error!("{} Batch failed: {}", host, e),
        }
    }

    pool.close_all().await;
    sweep.abort();
    Ok(())
}
