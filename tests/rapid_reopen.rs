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


use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use logforth_append_reopen::ReopenFileBuilder;
use signal_hook::consts::SIGUSR2;
use signal_hook::low_level::raise;
use tempfile::TempDir;

// Signals are process-wide, so this file holds a single test.
#[test]
fn test_rapid_signals_lose_no_writes() {
    let temp_dir = TempDir::new().expect("failed to create a temporary directory");
    let path = temp_dir.path().join("a.log");

    let file = ReopenFileBuilder::new(&path)
        .signal(SIGUSR2)
        .grace_period(Duration::from_millis(50))
        .build()
        .unwrap();
    let file = Arc::new(file);
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let file = file.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let mut written = 0usize;
            while !stop.load(Ordering::Acquire) {
                let line = format!("line-{written:08}\n");
                (&*file).write_all(line.as_bytes()).unwrap();
                written += 1;
                thread::sleep(Duration::from_millis(1));
            }
            written
        })
    };

    for i in 0..100 {
        // a.log is missing when the previous reopen has not happened yet
        let _ = fs::rename(&path, temp_dir.path().join(format!("a.log.{i}")));
        raise(SIGUSR2).unwrap();
        thread::sleep(Duration::from_millis(1));
    }

    thread::sleep(Duration::from_millis(100));
    stop.store(true, Ordering::Release);
    let written = writer.join().unwrap();
    assert!(file.generation().unwrap() >= 1);
    file.close().unwrap();

    let lines = collect_lines(temp_dir.path(), "a.log");
    assert_eq!(lines.len(), written, "every write lands exactly once");

    let ids = lines
        .iter()
        .map(|line| {
            let id = line.strip_prefix("line-").expect("write was split");
            id.parse::<usize>().expect("write was split")
        })
        .collect::<BTreeSet<_>>();
    assert_eq!(ids, (0..written).collect::<BTreeSet<_>>());
}

fn collect_lines(dir: &Path, prefix: &str) -> Vec<String> {
    let mut lines = vec![];
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let filename = entry.file_name().to_str().unwrap().to_string();
        if !filename.starts_with(prefix) {
            continue;
        }
        let content = fs::read_to_string(entry.path()).unwrap();
        assert!(content.is_empty() || content.ends_with('\n'));
        lines.extend(content.lines().map(str::to_string));
    }
    lines
}
