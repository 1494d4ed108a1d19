// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bridge the [`log`] crate to [`ReopenFile`]s.
//!
//! # Examples
//!
//! ```
//! use log::LevelFilter;
//! use logforth_append_reopen::ReopenFile;
//! use logforth_append_reopen::bridge::ReopenLogger;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let all = ReopenFile::open(dir.path().join("app.log")).unwrap();
//! let errors = ReopenFile::open(dir.path().join("app.log.wf")).unwrap();
//!
//! ReopenLogger::new()
//!     .dispatch(LevelFilter::Debug, all)
//!     .dispatch(LevelFilter::Error, errors)
//!     .apply()
//!     .unwrap();
//!
//! log::error!("This goes to both files.");
//! ```

use std::fmt::Write as _;
use std::io::Write as _;

use jiff::Timestamp;
use jiff::tz::TimeZone;
use log::LevelFilter;

use crate::Error;
use crate::ReopenFile;
use crate::Trap;
use crate::trap::DefaultTrap;

/// A [`log::Log`] implementation writing plain text lines to [`ReopenFile`]s.
///
/// Output format:
///
/// ```text
/// 2025-01-10T15:22:37.868815+08:00 ERROR app: Failed to fetch URL url=www.example.com attempt=3
/// 2025-01-10T15:22:37.868843+08:00  INFO app: Operation execution successful attempt=1
/// ```
#[derive(Debug)]
pub struct ReopenLogger {
    dispatches: Vec<(LevelFilter, ReopenFile)>,
    timezone: TimeZone,
    trap: Box<dyn Trap>,
}

impl Default for ReopenLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl ReopenLogger {
    /// Create a logger without any destination.
    pub fn new() -> Self {
        Self {
            dispatches: vec![],
            timezone: TimeZone::system(),
            trap: Box::new(DefaultTrap::default()),
        }
    }

    /// Send records at or above `level` to `file`.
    pub fn dispatch(mut self, level: LevelFilter, file: ReopenFile) -> Self {
        self.dispatches.push((level, file));
        self
    }

    /// Set the timezone for timestamps.
    ///
    /// Defaults to the system timezone if not set.
    pub fn timezone(mut self, tz: TimeZone) -> Self {
        self.timezone = tz;
        self
    }

    /// Set the trap for errors raised while writing records.
    ///
    /// Default to [`DefaultTrap`].
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = trap.into();
        self
    }

    /// The most verbose level any dispatch accepts.
    pub fn max_level(&self) -> LevelFilter {
        self.dispatches
            .iter()
            .map(|(level, _)| *level)
            .max()
            .unwrap_or(LevelFilter::Off)
    }

    /// Install this logger as the global logger of the `log` crate.
    ///
    /// # Errors
    ///
    /// Return an error if a global logger has already been set.
    pub fn apply(self) -> Result<(), Error> {
        let max_level = self.max_level();
        log::set_boxed_logger(Box::new(self))
            .map_err(|err| Error::new("failed to set global logger").with_source(err))?;
        log::set_max_level(max_level);
        Ok(())
    }

    fn format(&self, record: &log::Record) -> String {
        let ts = Timestamp::now();
        let offset = self.timezone.to_offset(ts);

        let mut text = format!("{:.6}", ts.display_with_offset(offset));
        // SAFETY: write to a string always succeeds
        write!(
            &mut text,
            " {:>5} {}: {}",
            record.level(),
            record.target(),
            record.args()
        )
        .unwrap();

        let mut visitor = KvWriter { text };
        if let Err(err) = record.key_values().visit(&mut visitor) {
            let err = Error::new("failed to format key-values").with_source(err);
            self.trap.trap(&err);
        }

        let mut text = visitor.text;
        text.push('\n');
        text
    }
}

struct KvWriter {
    text: String,
}

impl<'kvs> log::kv::VisitSource<'kvs> for KvWriter {
    fn visit_pair(
        &mut self,
        key: log::kv::Key<'kvs>,
        value: log::kv::Value<'kvs>,
    ) -> Result<(), log::kv::Error> {
        // SAFETY: write to a string always succeeds
        write!(&mut self.text, " {key}={value}").unwrap();
        Ok(())
    }
}

impl log::Log for ReopenLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = self.format(record);
        for (level, file) in self.dispatches.iter() {
            if record.level() > *level {
                continue;
            }
            let mut file = file;
            if let Err(err) = file.write_all(line.as_bytes()) {
                let err = Error::from_io_error(err).with_context("path", file.path().display());
                self.trap.trap(&err);
            }
        }
    }

    fn flush(&self) {
        for (_, file) in self.dispatches.iter() {
            if let Err(err) = file.sync() {
                let err = Error::new("failed to sync log file")
                    .with_context("path", file.path().display())
                    .with_source(err);
                self.trap.trap(&err);
            }
        }
    }
}
