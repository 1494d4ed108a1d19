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

//! Traps for errors that no caller is waiting on.
//!
//! A failed reopen or a failed close of a superseded file happens on a background thread, so
//! there is nobody to return the error to. Such errors are handed to a [`Trap`] instead.

use std::fmt;
use std::io;
use std::io::Write;

use crate::Error;

/// A trap for handling errors raised off the caller's path.
pub trait Trap: fmt::Debug + Send + Sync + 'static {
    /// Handle an error.
    fn trap(&self, err: &Error);
}

impl<T: Trap> From<T> for Box<dyn Trap> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

/// A default trap that sends errors to standard error if possible.
///
/// If standard error is not available, it does nothing.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct DefaultTrap {}

impl Trap for DefaultTrap {
    fn trap(&self, err: &Error) {
        let _ = writeln!(io::stderr(), "{err}");
    }
}

/// A trap that forwards errors to a closure.
///
/// # Examples
///
/// ```
/// use logforth_append_reopen::trap::FnTrap;
///
/// let trap = FnTrap::new(|err| eprintln!("reopen: {err}"));
/// ```
pub struct FnTrap<F>(F);

impl<F> FnTrap<F>
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    /// Create a trap from the given closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> fmt::Debug for FnTrap<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTrap").finish_non_exhaustive()
    }
}

impl<F> Trap for FnTrap<F>
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    fn trap(&self, err: &Error) {
        (self.0)(err)
    }
}
