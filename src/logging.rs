use std::{fs::remove_file, path::Path, sync::OnceLock};

use tracing_appender::{
    non_blocking,
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

static GUARD: OnceLock<Option<WorkerGuard>> = OnceLock::new();

/// install the log sink once per process
///
/// a subscriber already installed by the host process is kept
pub fn setup(config: &Config) {
    GUARD.get_or_init(|| install(config));
}

fn filter(config: &Config) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if config.debug { "drm_cursor=debug" } else { "drm_cursor=info" })
    })
}

fn install(config: &Config) -> Option<WorkerGuard> {
    let path = config.log_file.as_path();
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();

    remove_file(path).ok();

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir);

    match appender {
        Ok(appender) => {
            let (log, guard) = non_blocking(appender);
            tracing_subscriber::fmt()
                .with_writer(log)
                .with_env_filter(filter(config))
                .with_ansi(false)
                .try_init()
                .ok();
            Some(guard)
        }
        Err(err) => {
            let installed = tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter(config))
                .try_init()
                .is_ok();
            if installed {
                tracing::warn!("cannot log to {}: {err}", path.display());
            }
            None
        }
    }
}
