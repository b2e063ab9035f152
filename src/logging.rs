use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message written to stderr.
/// Also writes to the log file when file logging is enabled.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let msg = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        if $crate::logging::ECHO_STDERR.load(std::sync::atomic::Ordering::Relaxed) {
            eprintln!("{}", msg);
        }
        if let Ok(mut guard) = $crate::logging::LOG_FILE.lock() {
            if let Some(ref mut f) = *guard {
                let _ = writeln!(f, "{}", msg);
            }
        }
    }};
}

/// Global log file handle. When `Some`, `tlog!` writes to this file as well.
pub(crate) static LOG_FILE: Mutex<Option<std::fs::File>> = Mutex::new(None);

/// Whether `tlog!` also writes to stderr. Cleared while the terminal UI owns the screen.
pub(crate) static ECHO_STDERR: AtomicBool = AtomicBool::new(true);

/// Initialise file logging to the given directory.
/// Creates a timestamped log file and a `canterm.log` symlink (Unix only).
pub fn init_file_logging(log_dir: &Path) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-canterm.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join("canterm.log");
        let _ = std::fs::remove_file(&symlink_path);
        if let Err(e) = std::os::unix::fs::symlink(&filename, &symlink_path) {
            tlog!("[logging] Failed to create canterm.log symlink: {}", e);
        }
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    tlog!("[logging] File logging started: {}", log_path.display());

    Ok(())
}

/// Stop file logging and close the log file.
pub fn stop_file_logging() {
    let was_open = LOG_FILE
        .lock()
        .map(|mut guard| guard.take().is_some())
        .unwrap_or(false);
    if was_open && ECHO_STDERR.load(Ordering::Relaxed) {
        eprintln!(
            "{} [logging] File logging stopped",
            chrono::Local::now().format("%H:%M:%S%.3f")
        );
    }
}

/// Enable or disable the stderr copy of every log line.
pub fn set_stderr_echo(enabled: bool) {
    ECHO_STDERR.store(enabled, Ordering::Relaxed);
}
