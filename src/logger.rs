/*
 * This file is part of Flexline.
 *
 * Copyright (C) 2025 Flexline contributors
 *
 * Flexline is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Flexline is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Flexline. If not, see <https://www.gnu.org/licenses/>.
 */

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use fl_core::constants::logging::LOG_FILE_PREFIX;
use tracing::warn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// `camera_operations_YYYYMMDD_HHMMSS.log`
pub fn log_file_name(started: DateTime<Local>) -> String {
    format!("{}_{}.log", LOG_FILE_PREFIX, started.format("%Y%m%d_%H%M%S"))
}

fn open_log_file(dir: &Path) -> io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(Local::now()));
    let file = File::create(&path)?;
    Ok((path, file))
}

/// `RUST_LOG` wins over the configured level
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(fl_core::constants::logging::DEFAULT_LOG_LEVEL))
}

/// Install the global subscriber
///
/// With a `log_dir` the session logs to stdout and to a timestamped file in
/// that directory; without one it logs to stderr so command output stays clean.
/// Returns the log file path when one was opened.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> Option<PathBuf> {
    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::registry()
            .with(build_filter(level))
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .try_init();
        return None;
    };

    let (path, file_layer, file_error) = match open_log_file(dir) {
        Ok((path, file)) => (
            Some(path),
            Some(fmt::layer().with_ansi(false).with_target(false).with_writer(Mutex::new(file))),
            None,
        ),
        Err(e) => (None, None, Some(e)),
    };

    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_target(false).with_level(true))
        .with(file_layer)
        .try_init();

    if let Some(e) = file_error {
        warn!("Could not open log file in {}: {}; logging to stdout only", dir.display(), e);
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_name() {
        let started = Local.with_ymd_and_hms(2025, 3, 7, 14, 5, 9).unwrap();
        assert_eq!(log_file_name(started), "camera_operations_20250307_140509.log");
    }

    #[test]
    fn test_open_log_file_creates_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("logs");
        let (path, _file) = open_log_file(&dir).unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("camera_operations_"));
    }
}
