use chrono::Local;
use std::io;
use std::path::{Path, PathBuf};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "info";

/// Initialize tracing to stdout, plus a timestamp-named file under `log_dir`
/// when one is given. The filter comes from `RUST_LOG`, defaulting to `info`.
///
/// Returns the log file path, if any.
pub fn init_tracing(log_dir: Option<&Path>) -> io::Result<Option<PathBuf>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, log_path) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_name = format!("{}.log", Local::now().format("%Y%m%d_%H%M%S"));
            let file_appender = rolling::never(dir, &file_name);
            let layer = fmt::Layer::new()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(dir.join(file_name)))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::Layer::default().with_target(true))
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(io::Error::other)?;

    if let Some(path) = &log_path {
        tracing::debug!(
            target: "fleet::utils::tracing",
            path = %path.display(),
            "Tracing initialized with file output"
        );
    }

    Ok(log_path)
}
