use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging based on output mode and debug flag
///
/// With a log file, JSON lines are written through a non-blocking writer;
/// keep the returned guard alive until exit so buffered lines are flushed.
pub fn init_logging(
    debug: bool,
    quiet: bool,
    log_file: Option<&Path>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = if debug {
        EnvFilter::new("stepflow=debug")
    } else if quiet {
        EnvFilter::new("stepflow=error")
    } else {
        EnvFilter::new("stepflow=info")
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_file {
        Some(log_path) => {
            let (dir, name) = split_log_path(log_path)?;
            std::fs::create_dir_all(&dir)?;

            let appender = tracing_appender::rolling::never(&dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(writer)
                .with_target(true)
                .with_line_number(true)
                .with_file(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

fn split_log_path(path: &Path) -> anyhow::Result<(PathBuf, &std::ffi::OsStr)> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("log file path '{}' has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((dir, name))
}

/// Get default log file path for a graph run
pub fn default_log_path(graph_name: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("stepflow")
        .join("logs");

    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{}-{}.log", graph_name, timestamp);

    Ok(log_dir.join(filename))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_path() {
        let (dir, name) = split_log_path(Path::new("/tmp/logs/run.log")).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/logs"));
        assert_eq!(name, "run.log");

        let (dir, _) = split_log_path(Path::new("run.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));

        assert!(split_log_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_default_log_path() {
        if let Ok(path) = default_log_path("retrain") {
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("retrain-"));
            assert!(name.ends_with(".log"));
            assert!(path.parent().unwrap().ends_with("stepflow/logs"));
        }
    }
}
