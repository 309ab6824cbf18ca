pub mod agent_core;
pub mod config;
pub mod inference;
pub mod server;
pub mod tokens;
pub mod tools;
pub mod upstream;

use std::path::Path;

use config::{LogFormat, LoggingConfig};

/// Number of rotated log files kept next to the active one.
const LOG_KEEP: u32 = 3;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides the configured filter. With `logging.file` set, the
/// previous logs are rotated (`toolchat.log` → `.1` → … → `.3`) and a fresh
/// file is opened behind a line-flushing writer; otherwise logs go to stdout.
pub fn init_tracing(config: &LoggingConfig) -> std::io::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let writer = match &config.file {
        Some(path) => Some(open_log_file(path)?),
        None => None,
    };

    let builder = fmt::fmt().with_env_filter(filter).with_target(true).with_thread_ids(false);
    match (config.format, writer) {
        (LogFormat::Json, Some(w)) => builder.json().with_writer(w).with_ansi(false).init(),
        (LogFormat::Json, None) => builder.json().init(),
        (LogFormat::Pretty, Some(w)) => builder.with_writer(w).with_ansi(false).init(),
        (LogFormat::Pretty, None) => builder.init(),
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?config.file,
        pid = std::process::id(),
        "=== toolchat starting ==="
    );
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<FlushingWriter> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    rotate_log_file(path, LOG_KEEP);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok(FlushingWriter::new(file))
}

/// Rotate log files: `toolchat.log` → `toolchat.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// File writer that flushes after every write, so each log line is on disk
/// even if the process dies.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_rotate_log_file_keeps_three() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("toolchat.log");
        for generation in 0..5 {
            std::fs::write(&base, format!("gen {generation}")).unwrap();
            rotate_log_file(&base, 3);
        }

        assert!(!base.exists());
        let read = |suffix: u32| std::fs::read_to_string(format!("{}.{suffix}", base.display())).unwrap();
        assert_eq!(read(1), "gen 4");
        assert_eq!(read(2), "gen 3");
        assert_eq!(read(3), "gen 2");
        assert!(!dir.path().join("toolchat.log.4").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("toolchat.log");
        let mut writer = open_log_file(&path).unwrap();
        writer.write_all(b"line one\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line one\n");
    }
}
