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

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Receiver;
use crossbeam_channel::Sender;
use crossbeam_channel::TryRecvError;
use crossbeam_channel::TrySendError;
use signal_hook::iterator::Signals;

use crate::Error;
use crate::state::FileState;

/// The background loop that serializes reopen requests.
pub(crate) struct Watcher {
    state: Arc<FileState>,
    requests: Receiver<()>,
    closing: Receiver<()>,
    generation: u64,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum WatcherState {
    Continue,
    Shutdown,
}

impl Watcher {
    pub(crate) fn new(state: Arc<FileState>, requests: Receiver<()>, closing: Receiver<()>) -> Self {
        Self {
            state,
            requests,
            closing,
            generation: 0,
        }
    }

    fn recv(&mut self) -> WatcherState {
        let requested = crossbeam_channel::select! {
            recv(self.closing) -> _ => false,
            recv(self.requests) -> msg => msg.is_ok(),
        };

        // select picks randomly among ready operations; closing always wins
        if !requested || self.closing.try_recv() == Err(TryRecvError::Disconnected) {
            return WatcherState::Shutdown;
        }

        self.reopen();
        WatcherState::Continue
    }

    fn reopen(&mut self) {
        match self.state.reopen(self.generation + 1) {
            Ok(superseded) => {
                self.generation += 1;
                if let Some(superseded) = superseded {
                    self.state.retire(superseded);
                }
            }
            Err(err) => {
                let err = err
                    .with_context("path", self.state.path().display())
                    .with_context("generation", self.generation);
                self.state.trap(&err);
            }
        }
    }

    pub(crate) fn make_thread(mut self) -> Result<JoinHandle<()>, Error> {
        std::thread::Builder::new()
            .name(self.state.thread_name().to_string())
            .spawn(move || while self.recv() == WatcherState::Continue {})
            .map_err(|err| Error::new("failed to spawn reopen watcher thread").with_source(err))
    }
}

/// Forward deliveries of `signums` as reopen requests.
///
/// The forwarding thread exits on the first delivery after the request queue is gone. The
/// subscription itself is never unregistered before that, so late signals are dropped silently.
pub(crate) fn forward_signals(
    signums: &[i32],
    requests: Sender<()>,
    thread_name: &str,
) -> Result<(), Error> {
    let mut signals = Signals::new(signums).map_err(|err| {
        Error::new("failed to register reopen signals")
            .with_context("signals", format!("{signums:?}"))
            .with_source(err)
    })?;

    std::thread::Builder::new()
        .name(format!("{thread_name}-signal"))
        .spawn(move || {
            for _ in signals.forever() {
                match requests.try_send(()) {
                    // a full queue means a reopen is already pending
                    Ok(()) | Err(TrySendError::Full(())) => {}
                    Err(TrySendError::Disconnected(())) => break,
                }
            }
        })
        .map_err(|err| Error::new("failed to spawn reopen signal thread").with_source(err))?;

    Ok(())
}
