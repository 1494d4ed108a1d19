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

//! A log file appender that survives external rotation.
//!
//! # Overview
//!
//! Tools like `logrotate` move the log file away and then tell the process, usually with a
//! signal, to start writing to a fresh file at the same path. [`ReopenFile`] keeps writing to
//! the file it holds until such a signal arrives, then opens the path again and atomically
//! switches all subsequent writes to the new file. Writes already in progress finish on the old
//! file, which is closed after a grace period.
//!
//! [`ReopenFile`] is a plain byte sink implementing [`std::io::Write`] for shared references, so
//! any number of threads can write to it concurrently. With the `bridge-log` feature,
//! [`bridge::ReopenLogger`] plugs it into the [`log`](https://docs.rs/log) crate.
//!
//! # Examples
//!
//! ```
//! use std::io::Write;
//!
//! use logforth_append_reopen::ReopenFileBuilder;
//! use signal_hook::consts::SIGHUP;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let file = ReopenFileBuilder::new(dir.path().join("app.log"))
//!     .mode(0o640)
//!     .signal(SIGHUP)
//!     .build()
//!     .unwrap();
//!
//! writeln!(&file, "This line goes to the current app.log.").unwrap();
//!
//! // a rotation agent would send SIGHUP; a handle does the same from within the process
//! file.handle().reopen().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

#[cfg(feature = "bridge-log")]
pub mod bridge;
pub mod trap;

mod error;
mod file;
mod state;
mod watcher;

pub use self::error::Error;
pub use self::file::DEFAULT_GRACE_PERIOD;
pub use self::file::DEFAULT_MODE;
pub use self::file::ReopenFile;
pub use self::file::ReopenFileBuilder;
pub use self::file::ReopenHandle;
pub use self::trap::Trap;
