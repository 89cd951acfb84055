use crate::config::Config;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Clone, PartialEq)]
enum LogTarget {
    Stderr,
    File(PathBuf),
}

fn resolve_target(config: &Config) -> LogTarget {
    let trimmed = config.log_file.trim();
    if trimmed.is_empty() || trimmed == "-" {
        LogTarget::Stderr
    } else {
        LogTarget::File(PathBuf::from(trimmed))
    }
}

fn filter_directive(config: &Config) -> String {
    let level = config.log_level.trim();
    if level.is_empty() {
        // Keep dependency chatter down unless asked for.
        "info,reqwest=warn,rusqlite=warn".to_string()
    } else {
        level.to_string()
    }
}

pub fn init(config: &Config) -> Option<WorkerGuard> {
    if !config.log_enabled {
        return None;
    }

    let directive = filter_directive(config);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match resolve_target(config) {
        LogTarget::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogTarget::File(path) => {
            ensure_parent(&path);
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => tracing_appender::non_blocking(file),
                Err(err) => {
                    eprintln!(
                        "flight-live: cannot open log file {} ({err}); logging to stderr",
                        path.display()
                    );
                    tracing_appender::non_blocking(std::io::stderr())
                }
            }
        }
    };

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_level(true)
        .with_target(true)
        .with_thread_names(true)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
    Some(guard)
}

fn ensure_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            let _ = fs::create_dir_all(parent);
        }
    }
}
