use std::{error::Error, process, sync::Arc};

use clap::{command, Parser, ValueHint};
use futures_util::future::join_all;
use log::{debug, error, info, LevelFilter};
use tokio_util::sync::CancellationToken;

use trackfill::{
    catalog::{Catalogs, DeezerCatalog},
    config::{self, Config},
    coordinator::DownloadCoordinator,
    http,
    library::{LocalCopies, MemoryLibrary, Metadata, NoScan, NoTags, Scanner},
    provider::{
        deezer::{self, DeezerProvider},
        tidal::{self, TidalProvider},
        Provider,
    },
    scan::SubsonicScanner,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// Ensure that this file is kept secure and not shared publicly, as it
    /// may contain credentials that grant access to your accounts.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("trackfill.toml"))]
    config: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    /// Provider to download from, such as `deezer`
    provider: String,

    /// Track ids at the provider
    #[arg(required = true)]
    ids: Vec<String>,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module("trackfill", level);
    }

    logger.init();
}

/// Wires the configured providers and collaborators into a coordinator.
fn coordinator(config: &Config) -> Result<DownloadCoordinator, Box<dyn Error>> {
    let user_agent = config::user_agent()?;
    let http = Arc::new(http::Client::new(&user_agent)?);

    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    let mut catalogs = Catalogs::new().with(
        deezer::NAME,
        Arc::new(DeezerCatalog::new(
            Arc::clone(&http),
            DeezerCatalog::DEFAULT_BASE_URL,
            config.metadata_throttle(),
            config.retry_policy(),
        )?),
    );

    if let Some(section) = &config.deezer {
        providers.push(Arc::new(DeezerProvider::new(
            section,
            config.quality,
            &user_agent,
            config.metadata_throttle(),
        )?));
    }
    if let Some(section) = &config.tidal {
        // The mirrors are their own catalog.
        let mirrors = Arc::new(TidalProvider::new(section, config.quality, &user_agent)?);
        catalogs = catalogs.with(tidal::NAME, Arc::clone(&mirrors) as Arc<dyn Metadata>);
        providers.push(mirrors);
    }

    let scanner: Arc<dyn Scanner> = match &config.server {
        Some(server) => Arc::new(SubsonicScanner::new(
            Arc::clone(&http),
            &server.url,
            &server.username,
            &server.password,
        )?),
        None => Arc::new(NoScan),
    };

    let library = Arc::new(MemoryLibrary::new());
    let mut builder = DownloadCoordinator::builder(config.download_root.clone(), Arc::new(catalogs))
        .local_copies(Arc::clone(&library) as Arc<dyn LocalCopies>)
        .registry(library)
        .scanner(scanner)
        .tags(Arc::new(NoTags))
        .http(http)
        .retry(config.retry_policy())
        .download_albums(config.download_albums);
    for provider in providers {
        builder = builder.provider(provider);
    }

    Ok(builder.build()?)
}

/// Acquires every requested track and waits for album cascades.
///
/// # Errors
///
/// Returns an error when the configuration cannot be loaded, or when any of
/// the tracks could not be acquired.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = Config::from_file(&args.config)?;
    let coordinator = coordinator(&config)?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down gracefully");
            interrupt.cancel();
        }
    });

    let results = join_all(args.ids.iter().map(|id| {
        let coordinator = coordinator.clone();
        let (provider, cancel) = (&args.provider, &cancel);
        async move { (id, coordinator.acquire(provider, id, cancel).await) }
    }))
    .await;

    let mut failures = 0;
    for (id, result) in results {
        match result {
            Ok(path) => println!("{}", path.display()),
            Err(e) => {
                error!("{}:{id}: {e}", args.provider);
                failures += 1;
            }
        }
    }

    tokio::select! {
        () = cancel.cancelled() => {}
        () = coordinator.drain() => {}
    }
    coordinator.shutdown().await;

    if failures > 0 {
        return Err(format!("{failures} of {} tracks failed", args.ids.len()).into());
    }
    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and acquires the requested tracks.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
