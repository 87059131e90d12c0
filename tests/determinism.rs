// Copyright 2026 Evidex Authors
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
use std::path::Path;

use assert_cmd::Command;
use serde_json::json;
use tempfile::TempDir;

fn evidex_cmd(config_root: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("evidex"));
    cmd.env("XDG_CONFIG_HOME", config_root);
    cmd.env("HOME", config_root);
    cmd.env("APPDATA", config_root);
    cmd
}

fn run_stdout(cmd: &mut Command, cwd: &Path) -> Vec<u8> {
    let output = cmd.current_dir(cwd).output().expect("run command");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    output.stdout
}

fn assert_repeatable(config_root: &Path, args: &[&str], runs: usize, cwd: &Path) {
    let mut baseline: Option<Vec<u8>> = None;
    for _ in 0..runs {
        let mut cmd = evidex_cmd(config_root);
        cmd.args(args);
        let stdout = run_stdout(&mut cmd, cwd);
        if let Some(ref expected) = baseline {
            assert_eq!(&stdout, expected, "{args:?}");
        } else {
            baseline = Some(stdout);
        }
    }
}

#[test]
fn deterministic_outputs() {
    let config_temp = TempDir::new().expect("config tempdir");
    let config_root = config_temp.path();
    let temp = TempDir::new().expect("tempdir");
    let root = temp.path();

    let mut records = Vec::new();
    for (i, label) in ["Gun", "Knife", "Rifle", "Gun"].iter().enumerate() {
        records.push(json!({
            "file_id": format!("case/{i}.jpg"),
            "category": "weapons",
            "result": {"detections": [{"label": label, "confidence": 0.9}]},
            "filename": format!("{i}.jpg"),
            "image_data": "AAAA"
        }));
        records.push(json!({
            "file_id": format!("case/{i}.jpg"),
            "category": "object",
            "result": {"assets": [{"class": "watch"}, {"class": label}]},
            "filename": format!("{i}.jpg")
        }));
    }
    fs::write(root.join("batch.json"), json!(records).to_string()).expect("write batch");

    let mut cmd = evidex_cmd(config_root);
    cmd.args(["init", "."]);
    assert!(cmd.current_dir(root).output().unwrap().status.success());

    let mut cmd = evidex_cmd(config_root);
    cmd.args(["import", "batch.json"]);
    assert!(cmd.current_dir(root).output().unwrap().status.success());

    assert_repeatable(config_root, &["results", "--query", "gun", "--json"], 10, root);
    assert_repeatable(config_root, &["results", "--facet", "watch", "--json"], 10, root);
    assert_repeatable(config_root, &["facets", "--json"], 10, root);

    let mut summaries = Vec::new();
    for run in 0..3 {
        let out = format!("out{run}");
        let mut cmd = evidex_cmd(config_root);
        cmd.args(["export", "--out", &out, "--facet", "Gun"]);
        run_stdout(&mut cmd, root);
        let summary = root.join(&out).join("results/analysis_results.json");
        summaries.push(fs::read(summary).expect("summary"));
    }
    assert!(summaries.windows(2).all(|pair| pair[0] == pair[1]));
}
