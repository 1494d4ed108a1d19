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

//! An example of logging to files that are rotated by logrotate.
//!
//! Add a logrotate configuration like the following, replacing `{{dir}}` with the directory this
//! example runs in:
//!
//! ```text
//! {{dir}}/example.log {{dir}}/example.log.wf {
//!     hourly
//!     rotate 8
//!     size 1M
//!     missingok
//!     notifempty
//!     compress
//!     sharedscripts
//!     postrotate
//!         /bin/killall -USR1 rotated_file
//!     endscript
//! }
//! ```
//!
//! Then run this example and run logrotate periodically:
//!
//! ```shell
//! logrotate $HOME/.config/logrotate.conf --state $HOME/.config/logrotate-state --verbose
//! ```
//!
//! The example stops after five minutes or on SIGINT, SIGTERM or SIGQUIT.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use log::LevelFilter;
use logforth_append_reopen::ReopenFile;
use logforth_append_reopen::bridge::ReopenLogger;
use rand::Rng;
use signal_hook::consts::TERM_SIGNALS;

fn main() {
    let terminate = Arc::new(AtomicBool::new(false));
    for signal in TERM_SIGNALS {
        signal_hook::flag::register(*signal, terminate.clone())
            .expect("failed to register termination signals");
    }

    let all = ReopenFile::open("example.log").expect("failed to open example.log");
    let errors = ReopenFile::open("example.log.wf").expect("failed to open example.log.wf");

    ReopenLogger::new()
        .dispatch(LevelFilter::Debug, all)
        .dispatch(LevelFilter::Error, errors)
        .apply()
        .expect("failed to set up logger");

    let url = "www.google.com";
    let deadline = Instant::now() + Duration::from_secs(5 * 60);
    let mut rng = rand::rng();

    while !terminate.load(Ordering::Relaxed) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));

        let backoff = Duration::from_nanos(1);
        log::info!(url, attempt = 1, backoff:? = backoff; "Operation execution successful");
        if rng.random_range(0..10) >= 5 {
            log::error!(url, attempt = 3, backoff:? = backoff; "Failed to fetch URL");
        }
    }

    log::logger().flush();
}
