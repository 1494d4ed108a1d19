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

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::os::fd::IntoRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use arc_swap::ArcSwapOption;

use crate::Error;
use crate::Trap;

/// One opened incarnation of the log file.
#[derive(Debug)]
pub(crate) struct Generation {
    id: u64,
    file: File,
}

impl Generation {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn file(&self) -> &File {
        &self.file
    }

    fn close(self) -> io::Result<()> {
        let fd = self.file.into_raw_fd();
        // SAFETY: `fd` was just released by the owning `File` and is closed exactly once here.
        if unsafe { libc::close(fd) } == -1 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Close a generation if nobody else holds it.
///
/// A writer that loaded the generation before it was superseded may still be inside a write
/// call; in that case the descriptor is released when that writer lets go of it.
pub(crate) fn close_generation(generation: Arc<Generation>) -> io::Result<()> {
    match Arc::try_unwrap(generation) {
        Ok(generation) => generation.close(),
        Err(_) => Ok(()),
    }
}

pub(crate) fn closed_io_error() -> io::Error {
    io::Error::other("reopen file is closed")
}

/// State shared by writers, the watcher thread and the retire threads.
#[derive(Debug)]
pub(crate) struct FileState {
    path: PathBuf,
    mode: u32,
    grace_period: Duration,
    thread_name: String,
    current: ArcSwapOption<Generation>,
    retired: AtomicUsize,
    trap: Box<dyn Trap>,
}

impl FileState {
    pub(crate) fn open(
        path: PathBuf,
        mode: u32,
        grace_period: Duration,
        thread_name: String,
        trap: Box<dyn Trap>,
    ) -> Result<Self, Error> {
        let file = open_file(&path, mode)?;
        let current = ArcSwapOption::from_pointee(Generation { id: 0, file });

        Ok(Self {
            path,
            mode,
            grace_period,
            thread_name,
            current,
            retired: AtomicUsize::new(0),
            trap,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub(crate) fn trap(&self, err: &Error) {
        self.trap.trap(err);
    }

    /// Run `f` against the current file.
    ///
    /// The current generation is loaded exactly once, so everything `f` writes lands in the same
    /// file even if a reopen is published meanwhile.
    pub(crate) fn with_current<R>(&self, f: impl FnOnce(&File) -> io::Result<R>) -> io::Result<R> {
        let current = self.current.load();
        match current.as_deref() {
            Some(generation) => f(generation.file()),
            None => Err(closed_io_error()),
        }
    }

    pub(crate) fn generation(&self) -> Option<u64> {
        self.current.load().as_deref().map(Generation::id)
    }

    pub(crate) fn retired(&self) -> usize {
        self.retired.load(Ordering::Acquire)
    }

    /// Open a fresh file at the bound path and publish it as generation `id`.
    ///
    /// Returns the superseded generation, or `None` if the file was closed meanwhile, in which
    /// case the fresh file is dropped unpublished. On failure the current generation stays in
    /// service.
    pub(crate) fn reopen(&self, id: u64) -> Result<Option<Arc<Generation>>, Error> {
        let current = self.current.load_full();
        if current.is_none() {
            return Ok(None);
        }

        let file = open_file(&self.path, self.mode)
            .map_err(|err| Error::new("failed to reopen log file").with_source(err))?;
        let next = Arc::new(Generation { id, file });

        let previous = self.current.compare_and_swap(&current, Some(next));
        let published = match ((*previous).as_ref(), current.as_ref()) {
            (Some(previous), Some(current)) => Arc::ptr_eq(previous, current),
            _ => false,
        };
        Ok(if published { current } else { None })
    }

    /// Take the current generation out of service for good.
    pub(crate) fn detach(&self) -> Option<Arc<Generation>> {
        self.current.swap(None)
    }

    /// Close a superseded generation once the grace period has elapsed.
    pub(crate) fn retire(self: &Arc<Self>, generation: Arc<Generation>) {
        self.retired.fetch_add(1, Ordering::AcqRel);

        let state = self.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-retire", self.thread_name))
            .spawn(move || {
                thread::sleep(state.grace_period);
                let id = generation.id();
                if let Err(err) = close_generation(generation) {
                    let err = Error::new("failed to close superseded log file")
                        .with_context("path", state.path.display())
                        .with_context("generation", id)
                        .with_source(err);
                    state.trap(&err);
                }
                state.retired.fetch_sub(1, Ordering::AcqRel);
            });

        // the generation moved into the closure is dropped right away in this case
        if let Err(err) = spawned {
            self.retired.fetch_sub(1, Ordering::AcqRel);
            let err = Error::new("failed to spawn retire thread").with_source(err);
            self.trap(&err);
        }
    }
}

fn open_file(path: &Path, mode: u32) -> Result<File, Error> {
    OpenOptions::new()
        .append(true)
        .create(true)
        .mode(mode)
        .open(path)
        .map_err(|err| {
            Error::new("failed to open log file")
                .with_context("path", path.display())
                .with_source(err)
        })
}
