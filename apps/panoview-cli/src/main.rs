use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use panoview_assets::{BackendConfig, Catalog, CatalogBackend};
use panoview_common::{TextureBackend, Variant, room_key};
use panoview_stream::{LoaderConfig, RoomSwitcher, TextureLoader};
use serde::Deserialize;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "panoview-cli", about = "CLI tool for panoview texture delivery")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config with `loader` and `backend` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Scan a directory of room textures and write a catalog
    Catalog {
        /// Directory holding the texture files
        dir: PathBuf,
        /// Output file (defaults to <dir>/catalog.json)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Fetch textures by key through the loader
    Fetch {
        /// Keys to fetch; repeated keys share one fetch
        #[arg(required = true)]
        keys: Vec<String>,
        #[command(flatten)]
        source: SourceArgs,
        /// Clear the loader and download caches afterwards
        #[arg(long)]
        clear: bool,
    },
    /// Walk through rooms, toggling day and night in each
    Walk {
        /// Rooms to visit (defaults to every room in the catalog)
        rooms: Vec<String>,
        #[command(flatten)]
        source: SourceArgs,
        /// Start in night mode
        #[arg(long)]
        night: bool,
        /// Preload both variants of every room before walking
        #[arg(long)]
        preload: bool,
    },
}

#[derive(Args)]
struct SourceArgs {
    /// Catalog file
    #[arg(long, default_value = "catalog.json")]
    catalog: PathBuf,
    /// Source root (defaults to the catalog's directory)
    #[arg(long)]
    source: Option<PathBuf>,
    /// Download cache directory
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Worker threads
    #[arg(long)]
    workers: Option<usize>,
    /// Pump interval in milliseconds
    #[arg(long, default_value = "16")]
    tick_ms: u64,
    /// Give up after this many seconds
    #[arg(long, default_value = "30")]
    timeout_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppConfig {
    loader: LoaderConfig,
    backend: Option<BackendConfig>,
}

impl AppConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let file = std::fs::File::open(path)
            .with_context(|| format!("opening config {}", path.display()))?;
        serde_yaml::from_reader(file).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Backend settings from the config file, overridden by command line flags.
    fn backend_for(&self, args: &SourceArgs) -> BackendConfig {
        let catalog_dir = match args.catalog.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut config = self
            .backend
            .clone()
            .unwrap_or_else(|| BackendConfig::new(catalog_dir));
        if let Some(source) = &args.source {
            config.source_root = source.clone();
        }
        if let Some(cache_dir) = &args.cache_dir {
            config.cache_dir = Some(cache_dir.clone());
        }
        if let Some(workers) = args.workers {
            config.workers = workers;
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let app = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("panoview-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", panoview_common::crate_info());
            println!("stream: {}", panoview_stream::crate_info());
            println!("assets: {}", panoview_assets::crate_info());
            println!("catalog format: v{}", panoview_assets::CATALOG_VERSION);
        }
        Commands::Catalog { dir, out } => {
            let out = out.unwrap_or_else(|| dir.join("catalog.json"));
            let catalog = write_catalog(&dir, &out)?;
            println!(
                "Catalog: {} entries, {} rooms, {} bytes -> {}",
                catalog.len(),
                catalog.rooms().len(),
                catalog.total_size(),
                out.display()
            );
        }
        Commands::Fetch {
            keys,
            source,
            clear,
        } => {
            let mut loader = open_loader(&app, &source)?;
            let failures = Rc::new(Cell::new(0usize));
            for key in &keys {
                let shown = key.clone();
                let failures = Rc::clone(&failures);
                loader.load_async(
                    key,
                    move |t| {
                        println!(
                            "{shown}: {}x{} ({} bytes)",
                            t.width(),
                            t.height(),
                            t.byte_size()
                        )
                    },
                    move |e| {
                        eprintln!("error: {e}");
                        failures.set(failures.get() + 1);
                    },
                );
            }
            pump(&mut loader, &source)?;

            let stats = loader.stats();
            println!(
                "Fetched: requests={}, fetches={}, coalesced={}, failed={}, ticks={}",
                keys.len(),
                stats.fetches_issued,
                stats.coalesced,
                failures.get(),
                stats.tick
            );
            if clear {
                loader.clear_cache();
                println!("Caches cleared: {} textures cached", loader.cached_count());
            }
        }
        Commands::Walk {
            rooms,
            source,
            night,
            preload,
        } => {
            let mut loader = open_loader(&app, &source)?;
            let rooms = if rooms.is_empty() {
                loader.backend().catalog().rooms()
            } else {
                rooms
            };
            if rooms.is_empty() {
                anyhow::bail!("catalog has no room textures");
            }

            if preload {
                let keys: Vec<String> = rooms
                    .iter()
                    .flat_map(|r| [room_key(r, Variant::Day), room_key(r, Variant::Night)])
                    .collect();
                let failed = Rc::new(Cell::new(0usize));
                let f = Rc::clone(&failed);
                let total = keys.len();
                loader.preload_many(
                    keys,
                    || tracing::info!("preload finished"),
                    move |key, e| {
                        tracing::warn!(key, error = %e, "preload failed");
                        f.set(f.get() + 1);
                    },
                );
                pump(&mut loader, &source)?;
                println!("Preloaded: {} keys, {} failed", total, failed.get());
            }

            let variant = if night { Variant::Night } else { Variant::Day };
            let switcher = RoomSwitcher::new(variant);
            for room in &rooms {
                switcher.switch_to(&mut loader, room);
                pump(&mut loader, &source)?;
                report(&switcher);

                switcher.toggle_variant(&mut loader);
                pump(&mut loader, &source)?;
                report(&switcher);
            }

            let stats = loader.stats();
            println!(
                "Walk: rooms={}, fetches={}, cache_hits={}, failed={}, cached={}",
                rooms.len(),
                stats.fetches_issued,
                stats.cache_hits,
                stats.failed,
                loader.cached_count()
            );
        }
    }

    Ok(())
}

fn write_catalog(dir: &Path, out: &Path) -> Result<Catalog> {
    let catalog =
        Catalog::build(dir).with_context(|| format!("cataloging {}", dir.display()))?;
    catalog
        .save(out)
        .with_context(|| format!("writing {}", out.display()))?;
    Ok(catalog)
}

fn open_loader(app: &AppConfig, args: &SourceArgs) -> Result<TextureLoader<CatalogBackend>> {
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("loading catalog {}", args.catalog.display()))?;
    let backend = CatalogBackend::new(catalog, app.backend_for(args))?;
    let mut loader = TextureLoader::with_config(backend, app.loader.clone());
    loader.add_progress_observer(|key, progress| {
        tracing::debug!(key, progress, "fetch progress");
    });
    Ok(loader)
}

/// Run the loader until every fetch has finished.
fn pump<B: TextureBackend>(loader: &mut TextureLoader<B>, args: &SourceArgs) -> Result<()> {
    let tick = Duration::from_millis(args.tick_ms);
    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    while !loader.is_idle() {
        if Instant::now() >= deadline {
            anyhow::bail!(
                "timed out with {} fetches still running",
                loader.in_flight_count()
            );
        }
        loader.update();
        std::thread::sleep(tick);
    }
    Ok(())
}

fn report(switcher: &RoomSwitcher) {
    let room = switcher.current_room().unwrap_or_default();
    let variant = switcher.variant();
    match (switcher.applied_key(), switcher.last_error()) {
        (applied, Some(e)) => println!(
            "{room} [{variant}]: {e} (showing {})",
            applied.as_deref().unwrap_or("nothing")
        ),
        (Some(applied), None) => println!("{room} [{variant}]: {applied}"),
        (None, None) => println!("{room} [{variant}]: nothing applied"),
    }
}
