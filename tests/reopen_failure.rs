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


use std::fs;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use logforth_append_reopen::ReopenFileBuilder;
use logforth_append_reopen::trap::FnTrap;
use signal_hook::consts::SIGURG;
use tempfile::TempDir;

#[test]
fn test_failed_reopen_keeps_old_file() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let logs = temp_dir.path().join("logs");
    let moved = temp_dir.path().join("logs.old");
    fs::create_dir(&logs).unwrap();

    let trapped = Arc::new(Mutex::new(vec![]));
    let file = {
        let trapped = trapped.clone();
        ReopenFileBuilder::new(logs.join("app.log"))
            .signal(SIGURG)
            .trap(FnTrap::new(move |err| {
                trapped.lock().unwrap().push(err.message().to_string())
            }))
            .build()
            .unwrap()
    };

    (&file).write_all(b"before\n").unwrap();

    // the directory is gone, so opening the path again fails
    fs::rename(&logs, &moved).unwrap();
    file.handle().reopen().unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while trapped.lock().unwrap().is_empty() {
        assert!(Instant::now() < deadline, "failed reopen was not trapped");
        thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        trapped.lock().unwrap().as_slice(),
        &["failed to reopen log file".to_string()]
    );
    assert_eq!(file.generation(), Some(0));
    assert_eq!(file.retired(), 0);

    (&file).write_all(b"after\n").unwrap();
    file.sync().unwrap();
    assert_eq!(
        fs::read_to_string(moved.join("app.log")).unwrap(),
        "before\nafter\n"
    );

    // once the directory is back, the next request succeeds
    fs::create_dir(&logs).unwrap();
    file.handle().reopen().unwrap();
    while file.generation() != Some(1) {
        assert!(Instant::now() < deadline, "file was not reopened");
        thread::sleep(Duration::from_millis(5));
    }
    (&file).write_all(b"fresh\n").unwrap();
    assert_eq!(fs::read_to_string(logs.join("app.log")).unwrap(), "fresh\n");
    file.close().unwrap();
}

#[test]
fn test_open_failure_is_returned() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let err = ReopenFileBuilder::new(temp_dir.path().join("missing").join("app.log"))
        .signal(SIGURG)
        .build()
        .unwrap_err();
    assert_eq!(err.message(), "failed to open log file");
    assert_eq!(err.sources().len(), 1);
}
