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

use std::fmt;
use std::io;
use std::io::IoSlice;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;
use crossbeam_channel::bounded;

use crate::Error;
use crate::Trap;
use crate::state::FileState;
use crate::state::close_generation;
use crate::trap::DefaultTrap;
use crate::watcher::Watcher;
use crate::watcher::forward_signals;

/// How long a superseded file is kept open before it is closed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Permission bits of a log file created by [`ReopenFile`].
pub const DEFAULT_MODE: u32 = 0o644;

/// A builder to configure and create a [`ReopenFile`].
#[derive(Debug)]
pub struct ReopenFileBuilder {
    // required
    path: PathBuf,

    // has default
    mode: u32,
    signals: Vec<i32>,
    grace_period: Duration,
    thread_name: String,
    trap: Box<dyn Trap>,
}

impl ReopenFileBuilder {
    /// Create a new builder for a file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: DEFAULT_MODE,
            signals: vec![],
            grace_period: DEFAULT_GRACE_PERIOD,
            thread_name: "logforth-reopen".to_string(),
            trap: Box::new(DefaultTrap::default()),
        }
    }

    /// Set the permission bits used when the file has to be created.
    ///
    /// Default to `0o644`. The process umask still applies.
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    /// Add a signal that triggers a reopen.
    ///
    /// If no signal is added, `SIGUSR1` is used.
    ///
    /// # Examples
    ///
    /// ```
    /// use logforth_append_reopen::ReopenFileBuilder;
    /// use signal_hook::consts::SIGHUP;
    ///
    /// let builder = ReopenFileBuilder::new("app.log").signal(SIGHUP);
    /// ```
    pub fn signal(mut self, signal: i32) -> Self {
        self.signals.push(signal);
        self
    }

    /// Add several signals that trigger a reopen.
    pub fn signals(mut self, signals: impl IntoIterator<Item = i32>) -> Self {
        self.signals.extend(signals);
        self
    }

    /// Set how long a superseded file stays open for writes already in progress.
    ///
    /// Default to 10 seconds.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Set the name of the background thread that performs reopens.
    ///
    /// Default to `logforth-reopen`.
    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Set the trap for errors raised by background reopens and closes.
    ///
    /// Default to [`DefaultTrap`].
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = trap.into();
        self
    }

    /// Build the [`ReopenFile`].
    ///
    /// # Errors
    ///
    /// Return an error if either:
    ///
    /// * The configured path is empty.
    /// * The file cannot be opened or created.
    /// * One of the signals cannot be registered.
    /// * The background threads cannot be spawned.
    pub fn build(self) -> Result<ReopenFile, Error> {
        let Self {
            path,
            mode,
            mut signals,
            grace_period,
            thread_name,
            trap,
        } = self;

        if path.as_os_str().is_empty() {
            return Err(Error::new("path must not be empty"));
        }
        if signals.is_empty() {
            signals.push(signal_hook::consts::SIGUSR1);
        }
        if let Some(signal) = signals
            .iter()
            .find(|&&signal| signal_hook::consts::FORBIDDEN.contains(&signal))
        {
            return Err(Error::new("signal cannot trigger a reopen").with_context("signal", signal));
        }

        let state = FileState::open(path, mode, grace_period, thread_name, trap)?;
        let state = Arc::new(state);

        let (requests, requests_receiver) = bounded(1);
        let (closing, closing_receiver) = bounded(0);

        forward_signals(&signals, requests.clone(), state.thread_name())?;
        let handle = Watcher::new(state.clone(), requests_receiver, closing_receiver).make_thread()?;

        Ok(ReopenFile {
            state,
            requests,
            guard: Mutex::new(Some(WatcherGuard { closing, handle })),
        })
    }
}

#[derive(Debug)]
struct WatcherGuard {
    closing: Sender<()>,
    handle: JoinHandle<()>,
}

impl WatcherGuard {
    fn shutdown(self) -> Result<(), Error> {
        let WatcherGuard { closing, handle } = self;

        // dropping the only sender disconnects the channel, which the watcher observes
        drop(closing);

        handle
            .join()
            .map_err(|_| Error::new("reopen watcher thread panicked"))
    }
}

/// A log file that follows its path across external rotation.
///
/// All writes go to the file currently opened at the configured path. When one of the
/// configured signals arrives (`SIGUSR1` by default), or [`ReopenHandle::reopen`] is called, a
/// background thread opens the path again and publishes the new file; writes that already
/// started keep going to the old file, which is closed after a grace period.
///
/// This is the counterpart of `logrotate`'s `postrotate` hook:
///
/// ```text
/// /var/log/app.log {
///     daily
///     rotate 7
///     postrotate
///         /bin/kill -USR1 $(cat /run/app.pid)
///     endscript
/// }
/// ```
///
/// # Examples
///
/// ```
/// use std::io::Write;
///
/// use logforth_append_reopen::ReopenFile;
///
/// let dir = tempfile::tempdir().unwrap();
/// let file = ReopenFile::open(dir.path().join("app.log")).unwrap();
/// writeln!(&file, "hello").unwrap();
/// file.close().unwrap();
/// ```
pub struct ReopenFile {
    state: Arc<FileState>,
    requests: Sender<()>,
    guard: Mutex<Option<WatcherGuard>>,
}

impl fmt::Debug for ReopenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReopenFile")
            .field("path", &self.state.path())
            .field("generation", &self.state.generation())
            .field("retired", &self.state.retired())
            .finish()
    }
}

impl ReopenFile {
    /// Open `path` for appending with the default mode, signal and grace period.
    ///
    /// See [`ReopenFileBuilder`] for the defaults.
    pub fn open(path: impl Into<PathBuf>) -> Result<ReopenFile, Error> {
        ReopenFileBuilder::new(path).build()
    }

    /// Create a [`ReopenFileBuilder`].
    pub fn builder(path: impl Into<PathBuf>) -> ReopenFileBuilder {
        ReopenFileBuilder::new(path)
    }

    /// The path this file is bound to.
    pub fn path(&self) -> &Path {
        self.state.path()
    }

    /// Return a handle that can request reopens from anywhere.
    pub fn handle(&self) -> ReopenHandle {
        ReopenHandle {
            requests: self.requests.clone(),
        }
    }

    /// Id of the current file, counting successful reopens from 0.
    ///
    /// Return `None` once the file is closed.
    pub fn generation(&self) -> Option<u64> {
        self.state.generation()
    }

    /// Number of superseded files still waiting for their grace period to end.
    pub fn retired(&self) -> usize {
        self.state.retired()
    }

    /// Sync all data and metadata of the current file to disk.
    pub fn sync(&self) -> io::Result<()> {
        self.state.with_current(|f| f.sync_all())
    }

    /// Stop reopening and close the current file.
    ///
    /// Does not wait for writes in progress; the descriptor they hold is released when they
    /// finish. Superseded files still waiting for their grace period are closed on schedule.
    ///
    /// # Errors
    ///
    /// Return an error if the file was already closed, or if closing the current file fails.
    pub fn close(&self) -> Result<(), Error> {
        let guard = {
            let mut guard = self.guard.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };
        let Some(guard) = guard else {
            return Err(Error::closed().with_context("path", self.path().display()));
        };

        if let Err(err) = guard.shutdown() {
            self.state.trap(&err);
        }

        match self.state.detach() {
            None => Ok(()),
            Some(current) => close_generation(current).map_err(|err| {
                Error::new("failed to close log file")
                    .with_context("path", self.path().display())
                    .with_source(err)
            }),
        }
    }
}

impl Write for &ReopenFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state.with_current(|mut f| f.write(buf))
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        self.state.with_current(|mut f| f.write_vectored(bufs))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.state.with_current(|mut f| f.write_all(buf))
    }

    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        self.state.with_current(|mut f| f.write_fmt(args))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.state.with_current(|mut f| f.flush())
    }
}

impl Write for ReopenFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self).write(buf)
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        (&*self).write_vectored(bufs)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        (&*self).write_all(buf)
    }

    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> io::Result<()> {
        (&*self).write_fmt(args)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self).flush()
    }
}

impl Drop for ReopenFile {
    fn drop(&mut self) {
        let open = self
            .guard
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        if open && let Err(err) = self.close() {
            self.state.trap(&err);
        }
    }
}

/// A cloneable handle to request reopening a [`ReopenFile`].
///
/// Requests are handled by the same background thread as signals and coalesce the same way: a
/// request made while another one is still pending is merged into it.
#[derive(Debug, Clone)]
pub struct ReopenHandle {
    requests: Sender<()>,
}

impl ReopenHandle {
    /// Ask the background thread to reopen the file.
    ///
    /// Returns as soon as the request is queued; the reopen itself happens asynchronously.
    ///
    /// # Errors
    ///
    /// Return an error if the file has been closed.
    pub fn reopen(&self) -> Result<(), Error> {
        match self.requests.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => Ok(()),
            Err(TrySendError::Disconnected(())) => Err(Error::closed()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::thread;
    use std::time::Instant;

    use tempfile::TempDir;

    use super::*;

    fn wait_until(what: &str, cond: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    // SIGURG is ignored by default, so no test here can be disturbed by a stray delivery
    fn builder(dir: &TempDir) -> ReopenFileBuilder {
        ReopenFileBuilder::new(dir.path().join("app.log"))
            .signal(signal_hook::consts::SIGURG)
            .grace_period(Duration::from_millis(100))
    }

    #[test]
    fn test_write_and_sync() {
        let dir = TempDir::new().unwrap();
        let file = builder(&dir).build().unwrap();

        assert_eq!((&file).write(b"one\n").unwrap(), 4);
        writeln!(&file, "two {}", 2).unwrap();
        file.sync().unwrap();

        let content = fs::read_to_string(file.path()).unwrap();
        assert_eq!(content, "one\ntwo 2\n");
    }

    #[test]
    fn test_reopen_after_rename() {
        let dir = TempDir::new().unwrap();
        let file = builder(&dir).build().unwrap();
        let rotated = dir.path().join("app.log.1");

        (&file).write_all(b"1\n").unwrap();
        fs::rename(file.path(), &rotated).unwrap();

        // not reopened yet, so writes still follow the renamed file
        (&file).write_all(b"1b\n").unwrap();
        assert!(!file.path().exists());

        file.handle().reopen().unwrap();
        wait_until("reopen", || file.generation() == Some(1));
        (&file).write_all(b"2\n").unwrap();

        assert_eq!(fs::read_to_string(&rotated).unwrap(), "1\n1b\n");
        assert_eq!(fs::read_to_string(file.path()).unwrap(), "2\n");
    }

    #[test]
    fn test_superseded_file_is_retired_after_grace_period() {
        let dir = TempDir::new().unwrap();
        let file = builder(&dir)
            .grace_period(Duration::from_millis(300))
            .build()
            .unwrap();

        file.handle().reopen().unwrap();
        wait_until("reopen", || file.generation() == Some(1));
        wait_until("superseded", || file.retired() == 1);

        wait_until("retire", || file.retired() == 0);
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let file = builder(&dir).build().unwrap();
        let handle = file.handle();

        file.close().unwrap();
        let err = file.close().unwrap_err();
        assert_eq!(err.message(), "reopen file is already closed");

        assert_eq!(file.generation(), None);
        assert!(handle.reopen().is_err());

        let err = (&file).write(b"late\n").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(file.sync().is_err());
    }

    #[test]
    fn test_build_rejects_empty_path() {
        let err = ReopenFileBuilder::new("").build().unwrap_err();
        assert_eq!(err.message(), "path must not be empty");
    }

    #[test]
    fn test_build_rejects_forbidden_signal() {
        let dir = TempDir::new().unwrap();
        let err = builder(&dir)
            .signal(signal_hook::consts::SIGKILL)
            .build()
            .unwrap_err();
        assert_eq!(err.message(), "signal cannot trigger a reopen");
        assert_eq!(
            err.context("signal"),
            Some(signal_hook::consts::SIGKILL.to_string().as_str())
        );
    }

    #[test]
    fn test_requests_coalesce() {
        let dir = TempDir::new().unwrap();
        let file = builder(&dir).build().unwrap();
        let handle = file.handle();

        for _ in 0..50 {
            handle.reopen().unwrap();
        }
        wait_until("reopen", || file.generation() >= Some(1));

        let generation = file.generation().unwrap();
        assert!((1..=50).contains(&generation), "generation: {generation}");
    }
}
