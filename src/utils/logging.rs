use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Targets raised to debug by `--verbose`
const CRATE_TARGETS: [&str; 2] = ["extract_runner", "extractor"];

/// Initialize the logging system
///
/// Events go to stderr so job results printed on stdout stay machine readable.
/// With a log file, the same events are appended to it without ANSI colors.
pub fn init_logging(verbose: bool, log_file: Option<PathBuf>) -> Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = open_log_file(&path)?;
            Some(fmt::layer().with_ansi(false).with_writer(file))
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(verbose)?)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Logging was already initialized")?;

    Ok(())
}

/// `RUST_LOG` directives plus the crate's own level; everything else stays at warn
fn env_filter(verbose: bool) -> Result<EnvFilter> {
    let level = if verbose { "debug" } else { "info" };

    let mut filter = EnvFilter::from_default_env().add_directive("warn".parse()?);
    for target in CRATE_TARGETS {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }

    Ok(filter)
}

fn open_log_file(path: &Path) -> Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .context(format!("Failed to create log directory: {}", parent.display()))?;
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context(format!("Failed to open log file: {}", path.display()))
}

/// Log file under the platform data directory
pub fn default_log_file() -> PathBuf {
    let mut path = match directories::ProjectDirs::from("com", "extract-runner", "extract-runner") {
        Some(proj_dirs) => proj_dirs.data_dir().to_path_buf(),
        None => PathBuf::from("./logs"),
    };

    path.push("extractor.log");
    path
}
