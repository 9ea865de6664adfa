//! Log bridge for the freshness binary.
//!
//! Routes every `log::*!` call from this crate and its sub-crates to
//! `freshness_debug.log` in the system temp dir, so interactive output on
//! stdout stays clean. When `RUST_LOG` is set, records are mirrored to stderr.
//!
//! Level precedence: CLI `--log-level`, then `RUST_LOG`, then `info`.

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Path of the debug log file.
pub fn log_path() -> PathBuf {
    std::env::temp_dir().join("freshness_debug.log")
}

struct LogBridge {
    level: LevelFilter,
    file: Mutex<Option<File>>,
    mirror_stderr: bool,
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{:<5}] [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        );
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.write_all(line.as_bytes());
        }
        if self.mirror_stderr {
            eprint!("{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.flush();
        }
    }
}

static BRIDGE: OnceLock<LogBridge> = OnceLock::new();

fn level_from_env() -> Option<LevelFilter> {
    let raw = std::env::var("RUST_LOG").ok()?;
    // Accept a bare level; module directives fall back to debug.
    match raw.trim().parse::<LevelFilter>() {
        Ok(level) => Some(level),
        Err(_) if !raw.trim().is_empty() => Some(LevelFilter::Debug),
        Err(_) => None,
    }
}

/// Install the bridge as the global logger. Later calls are no-ops.
pub fn init_log_bridge(level_override: Option<LevelFilter>) {
    let env_level = level_from_env();
    let level = level_override.or(env_level).unwrap_or(LevelFilter::Info);

    let bridge = BRIDGE.get_or_init(|| {
        // Silently fall back to stderr-only if the file can't be opened.
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(log_path())
            .ok();
        LogBridge {
            level,
            file: Mutex::new(file),
            mirror_stderr: env_level.is_some(),
        }
    });

    if log::set_logger(bridge).is_ok() {
        log::set_max_level(bridge.level);
        log::info!(
            "freshness {} log session started (level={})",
            crate::VERSION,
            bridge.level
        );
    }
}
