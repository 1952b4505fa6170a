use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use depotfs_core::depot::MirrorDepot;
use depotfs_core::traits::FileSystem;
use depotfs_core::types::{DepotFsConfig, DepotPath, FileKind, LogLevel};
use depotfs_core::OverlayFs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "depotfs")]
#[command(about = "Mount a depot changelist with a writable local overlay")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Settings shared by every subcommand. Flags override the config file.
#[derive(Args)]
struct EngineArgs {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Depot search root, e.g. //depot/main/...
    #[arg(long, global = true)]
    search_root: Option<String>,

    /// Writable directory that shadows the depot
    #[arg(long, global = true)]
    override_root: Option<PathBuf>,

    /// Pin this changelist instead of the most recent one
    #[arg(long, global = true)]
    changelist: Option<u64>,

    /// Serve this directory as the depot
    #[arg(long, global = true)]
    mirror: Option<PathBuf>,

    /// Depot path the mirror directory appears under
    #[arg(long, global = true)]
    depot_root: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount the overlay and serve it until interrupted
    Mount {
        /// Mount point (defaults to mount.mountpoint from the config)
        mountpoint: Option<PathBuf>,
    },

    /// List a directory of the unified tree
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },

    /// Show the attributes of a path
    Stat { path: String },

    /// Print the content of a file
    Cat { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.engine)?;

    // Initialize tracing
    let level = config.log_level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("depotfs={level},depotfs_core={level},depotfs_linux={level}").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let fs = Arc::new(build_engine(&config)?);

    match cli.command {
        Commands::Mount { mountpoint } => {
            let mountpoint = mountpoint
                .or_else(|| config.mount.mountpoint.clone())
                .ok_or_else(|| anyhow!("no mount point given and none configured"))?;
            mount_filesystem(fs, &mountpoint, &config).await?;
        }
        Commands::Ls { path } => list(&fs, &path)?,
        Commands::Stat { path } => stat(&fs, &path)?,
        Commands::Cat { path } => cat(&fs, &path)?,
    }

    Ok(())
}

fn load_config(args: &EngineArgs) -> Result<DepotFsConfig> {
    let mut config = match &args.config {
        Some(path) => DepotFsConfig::load(path)?,
        None => DepotFsConfig::default(),
    };

    if let Some(search_root) = &args.search_root {
        config.engine.search_root = search_root.clone();
    }
    if let Some(override_root) = &args.override_root {
        config.engine.override_root = override_root.clone();
    }
    if let Some(changelist) = args.changelist {
        config.engine.changelist = Some(changelist);
    }
    if let Some(mirror) = &args.mirror {
        config.mirror.directory = Some(mirror.clone());
    }
    if let Some(depot_root) = &args.depot_root {
        config.mirror.depot_root = depot_root.clone();
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    if config.engine.search_root.is_empty() {
        config.engine.search_root = format!("{}/...", config.mirror.depot_root.trim_end_matches('/'));
    }

    config
        .engine
        .validate()
        .map_err(|errors| anyhow!("invalid configuration:\n  {}", errors.join("\n  ")))?;
    Ok(config)
}

fn build_engine(config: &DepotFsConfig) -> Result<OverlayFs> {
    let Some(directory) = &config.mirror.directory else {
        bail!("no depot transport configured; pass --mirror <dir> or set mirror.directory");
    };
    if !directory.is_dir() {
        bail!("mirror directory does not exist: {}", directory.display());
    }

    let transport = MirrorDepot::new(directory, &config.mirror.depot_root, config.mirror.changelist);
    Ok(OverlayFs::new(Arc::new(transport), config.engine.clone()))
}

fn list(fs: &OverlayFs, path: &str) -> Result<()> {
    let path = DepotPath::new(path);
    let entries = fs
        .list_directory(&path)
        .with_context(|| format!("cannot list {path}"))?;

    let mut out = std::io::stdout().lock();
    for entry in entries {
        let marker = match entry.kind {
            FileKind::Directory => 'd',
            FileKind::File => '-',
        };
        writeln!(out, "{marker} {}", entry.name)?;
    }
    Ok(())
}

fn stat(fs: &OverlayFs, path: &str) -> Result<()> {
    let path = DepotPath::new(path);
    let attributes = fs
        .get_attributes(&path)
        .with_context(|| format!("cannot stat {path}"))?;
    let backing = match fs.namespace().lookup(&path)? {
        Some(entry) if entry.is_remote() => "depot",
        Some(_) => "override",
        None => "implied",
    };

    println!("  Path: {path}");
    println!("  Type: {:?}", attributes.kind);
    println!("  Size: {}", attributes.size);
    println!("  Mode: {:o}", attributes.mode);
    println!("Source: {backing}");
    if let Some(changelist) = fs.changelist() {
        println!("    CL: {changelist}");
    }
    Ok(())
}

fn cat(fs: &OverlayFs, path: &str) -> Result<()> {
    let path = DepotPath::new(path);
    let attributes = fs
        .get_attributes(&path)
        .with_context(|| format!("cannot read {path}"))?;
    let content = fs
        .read_at(&path, 0, attributes.size as usize)
        .with_context(|| format!("cannot read {path}"))?;
    std::io::stdout().lock().write_all(&content)?;
    Ok(())
}

#[cfg(target_os = "linux")]
async fn mount_filesystem(fs: Arc<OverlayFs>, mountpoint: &Path, config: &DepotFsConfig) -> Result<()> {
    use depotfs_linux::FuseOptions;

    let changelist = fs
        .ensure_initialized()
        .context("failed to resolve the depot changelist")?;
    let options = FuseOptions::owned_by(&config.engine.override_root)
        .context("failed to read override root ownership")?;

    let handle = depotfs_linux::mount(Arc::clone(&fs), mountpoint, &config.mount, options)?;
    info!(
        "Serving {} at changelist {} on {} (Ctrl-C to unmount)",
        config.engine.search_root,
        changelist,
        mountpoint.display()
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    handle.unmount();

    println!("{}", serde_json::to_string_pretty(&fs.stats())?);
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn mount_filesystem(_fs: Arc<OverlayFs>, _mountpoint: &Path, _config: &DepotFsConfig) -> Result<()> {
    anyhow::bail!("Mounting is only supported on Linux");
}
