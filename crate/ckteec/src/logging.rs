use std::{env, fs, fs::OpenOptions, path::PathBuf, sync::Once};

use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, Registry, filter::Directive, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Extra filter directives, in the `RUST_LOG` syntax, applied on top of the
/// configured level.
pub const ENV_LOG_FILTER: &str = "CKTEEC_LOG_FILTER";

/// Targets logged at the configured level. Anything else, such as the host
/// application, is limited to warnings.
const LIBRARY_TARGETS: [&str; 2] = ["cosmian_ckteec", "cosmian_teec_loader"];

static TRACING_INIT: Once = Once::new();

/// Filter logging the library targets at `level` and every other target at
/// `warn`, refined by the comma separated `directives`.
///
/// Invalid directives are skipped.
pub fn library_filter(level: LevelFilter, directives: Option<&str>) -> EnvFilter {
    let mut filter = EnvFilter::new("warn");
    for target in LIBRARY_TARGETS {
        if let Ok(directive) = format!("{target}={level}").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    for directive in directives.unwrap_or_default().split(',') {
        let directive = directive.trim();
        if directive.is_empty() {
            continue;
        }
        match directive.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("ignoring the log directive {directive:?}: {e}"),
        }
    }
    filter
}

/// Append the library traces to `log_home/log_name` once per process.
///
/// Errors are reported on stderr: the token stays usable without a log.
pub fn initialize_logging(log_name: &str, log_home: Option<PathBuf>, level: LevelFilter) {
    TRACING_INIT.call_once(|| {
        init(log_name, log_home, level).unwrap_or_else(|e| {
            eprintln!("ckteec: cannot log to {log_name}: {e}");
        });
    });
}

fn init(
    log_name: &str,
    log_home: Option<PathBuf>,
    level: LevelFilter,
) -> Result<(), Box<dyn std::error::Error>> {
    let log_home = match log_home {
        Some(log_home) => log_home,
        None => etcetera::home_dir()
            .map_err(|e| format!("no home directory: {e}"))?
            .join(".cosmian"),
    };
    fs::create_dir_all(&log_home)?;
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(log_home.join(log_name))?;
    let directives = env::var(ENV_LOG_FILTER).ok();
    _ = Registry::default()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true),
        )
        .with(library_filter(level, directives.as_deref()))
        .with(ErrorLayer::default())
        .try_init();
    Ok(())
}

#[cfg(test)]
static LOG_INIT: Once = Once::new();

/// Compact stderr logging for tests, honoring `RUST_LOG` when set.
#[cfg(test)]
pub(crate) fn log_init(default_level: LevelFilter) {
    LOG_INIT.call_once(|| {
        let directives = env::var("RUST_LOG").ok();
        let format = tracing_subscriber::fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_line_number(true)
            .with_test_writer()
            .compact();
        _ = tracing_subscriber::registry()
            .with(library_filter(default_level, directives.as_deref()))
            .with(format)
            .try_init();
    });
}
