//! bram-server - serve RFSoC BRAM regions over TCP.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use rfsoc_bram::logging::{init_logging, LogConfig, LogLevel};
use rfsoc_bram::{AcceptPolicy, BramConfig, BramContext, BramServer, RegionTable, TablePreset};

#[derive(Clone, Copy, ValueEnum)]
enum LogPreset {
    /// Debug level, pretty output with source locations
    Development,
    /// Info level, JSON output
    Production,
    /// Errors only
    Quiet,
}

impl LogPreset {
    fn config(self) -> LogConfig {
        match self {
            LogPreset::Development => LogConfig::development(),
            LogPreset::Production => LogConfig::production(),
            LogPreset::Quiet => LogConfig::quiet(),
        }
    }
}

/// Expose memory-mapped BRAM regions to TCP clients.
#[derive(Parser)]
#[command(name = "bram-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (overrides the search path)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind
    #[arg(short = 'H', long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Serve a single client, then exit
    #[arg(long)]
    once: bool,

    /// Serve zero-filled in-memory regions instead of /dev/mem
    #[arg(long)]
    simulate: bool,

    /// Use a built-in address table instead of the configured one
    #[arg(long, value_enum)]
    preset: Option<TablePreset>,

    /// Replace the configured logging settings with a preset
    #[arg(long, value_enum)]
    log_preset: Option<LogPreset>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Print the effective configuration as YAML and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => BramConfig::load_from(path)?,
        None => BramConfig::load()?,
    };

    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.once {
        config.server.accept_policy = AcceptPolicy::Once;
    }
    if cli.simulate {
        config.device.simulate = true;
    }
    if let Some(preset) = cli.preset {
        config.use_preset(preset);
    }
    if let Some(preset) = cli.log_preset {
        config.logging = preset.config();
    }
    config.logging.level = LogLevel::from_verbosity(config.logging.level, cli.verbose);

    config.validate().context("invalid configuration")?;

    if cli.print_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    init_logging(&config.logging);

    let table = config.region_table()?;
    tracing::info!(regions = table.len(), "Loaded address table");

    if config.device.simulate {
        tracing::warn!("Simulation mode: serving zero-filled regions");
        return run(&config, BramContext::simulated(table));
    }

    serve_device(&config, table)
}

#[cfg(feature = "devmem")]
fn serve_device(config: &BramConfig, table: RegionTable) -> Result<()> {
    use rfsoc_bram::RegionMapper;

    let mut mapper = RegionMapper::new(config.device.path.clone());
    if let Err(e) = mapper.map_all(&table) {
        if e.is_permission_error() {
            tracing::error!("Mapping physical memory needs root; --simulate runs without hardware");
        }
        return Err(anyhow::Error::new(e).context(format!(
            "failed to map regions from {}",
            config.device.path.display()
        )));
    }
    tracing::info!(
        mapped = mapper.len(),
        "Mapped regions from {}",
        mapper.device_path().display()
    );

    let ctx = BramContext::from_mapper(table, &mapper);
    let result = run(config, ctx);

    mapper.unmap_all();
    result
}

#[cfg(not(feature = "devmem"))]
fn serve_device(_config: &BramConfig, _table: RegionTable) -> Result<()> {
    anyhow::bail!("built without the `devmem` feature; use --simulate")
}

fn run(config: &BramConfig, ctx: BramContext) -> Result<()> {
    let server = BramServer::bind(&config.server, Arc::new(ctx))?;
    let served = server.serve()?;
    tracing::info!(connections = served, "BRAM server terminated");
    Ok(())
}
