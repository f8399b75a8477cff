#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use updraft_platform::AppPaths;

const MAX_LOG_SIZE_BYTES: u64 = 2 * 1024 * 1024;

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    File::options().create(true).append(true).open(path)
}

/// Log sink that recreates its file if it is deleted mid-run.
struct ReopeningFileWriter {
    path: PathBuf,
    file: File,
}

impl ReopeningFileWriter {
    fn open(path: PathBuf) -> io::Result<Self> {
        let file = open_append(&path)?;
        Ok(Self { path, file })
    }

    fn current(&mut self) -> io::Result<&mut File> {
        if !self.path.exists() {
            self.file = open_append(&self.path)?;
        }
        Ok(&mut self.file)
    }
}

impl Write for ReopeningFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.current()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.current()?.flush()
    }
}

/// Drop the older half of a log larger than `max_size`, starting the kept
/// tail at a line boundary.
fn trim_if_oversized(log_path: &Path, max_size: u64) {
    let Ok(mut file) = File::open(log_path) else {
        return;
    };
    let Ok(len) = file.metadata().map(|metadata| metadata.len()) else {
        return;
    };
    if len <= max_size {
        return;
    }

    let mut tail = Vec::new();
    if file.seek(SeekFrom::Start(len / 2)).is_err() || file.read_to_end(&mut tail).is_err() {
        return;
    }
    drop(file);
    let line_start = tail
        .iter()
        .position(|&byte| byte == b'\n')
        .map_or(0, |newline| newline + 1);
    let _ = std::fs::write(log_path, &tail[line_start..]);
}

fn default_log_path() -> Option<PathBuf> {
    AppPaths::new().ok().map(|paths| paths.apply_log_file())
}

/// Install the global logger, writing to `log_file` or the default apply log.
///
/// Returns the file being written to, if one could be opened.
pub fn init_logging(log_file: Option<&Path>) -> Option<PathBuf> {
    let log_path = log_file.map(Path::to_path_buf).or_else(default_log_path);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("updraft")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ));

    let opened = log_path.and_then(|path| {
        trim_if_oversized(&path, MAX_LOG_SIZE_BYTES);
        let writer = ReopeningFileWriter::open(path.clone()).ok()?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer));
        Some(path)
    });

    let _ = CombinedLogger::init(loggers);
    if let Some(path) = &opened {
        log::info!("Applier logging to {}", path.display());
    }
    opened
}
