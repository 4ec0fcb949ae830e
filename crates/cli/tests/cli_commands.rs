use std::fs;
use std::path::{Path, PathBuf};

use predicates::prelude::*;
use serde_json::json;
use tempfile::tempdir;

/// Write a two-assembly snapshot plus a host application rooted at `data_dir`.
fn write_snapshot(root: &Path, version: &str, data_dir: &Path) -> PathBuf {
    let snapshot = json!({
        "vm_version": version,
        "module_base": 0x1000_0000u64,
        "assemblies": [
            {
                "image": "A.dll",
                "classes": [{
                    "name": "C0",
                    "methods": [{ "name": "M0", "address": 0x1000_1234u64 }]
                }]
            },
            {
                "image": "B.dll",
                "classes": [{
                    "namespace": "Game",
                    "name": "C1",
                    "generic_parameters": ["T"],
                    "methods": [{ "name": "M1", "address": 0x1000_5678u64 }]
                }]
            },
            {
                "image": "UnityEngine.CoreModule.dll",
                "classes": [{
                    "namespace": "UnityEngine",
                    "name": "Application",
                    "methods": [
                        { "name": "get_persistentDataPath", "return_type": "string",
                          "is_static": true, "result": data_dir.to_string_lossy() },
                        { "name": "get_identifier", "return_type": "string",
                          "is_static": true, "result": "com.x.y" },
                        { "name": "get_version", "return_type": "string",
                          "is_static": true, "result": "1.0" }
                    ]
                }]
            }
        ]
    });
    let path = root.join("vm.json");
    fs::write(&path, serde_json::to_string_pretty(&snapshot).expect("json")).expect("write");
    path
}

#[test]
fn dump_methods_writes_to_the_host_data_directory() {
    let dir = tempdir().expect("tempdir");
    let data_dir = dir.path().join("data");
    let snapshot = write_snapshot(dir.path(), "2019.4.31f1", &data_dir);

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("dump")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--kind")
        .arg("methods")
        .assert()
        .success()
        .stdout(predicate::str::contains("Dumping A"))
        .stdout(predicate::str::contains("Dumping B"))
        .stdout(predicate::str::contains("com.x.y_1.0.ms"));

    let written = fs::read_to_string(data_dir.join("com.x.y_1.0.ms")).expect("dump file");
    assert_eq!(written, "0x00001234 C0.M0\n0x00005678 Game.C1<System.Object>.M1\n");
}

#[test]
fn dump_classes_honours_explicit_destination() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "2017.4.40f1", &dir.path().join("unused"));
    let out_dir = dir.path().join("out");

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("dump")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--kind")
        .arg("classes")
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--file-name")
        .arg("classes")
        .assert()
        .success();

    let written = fs::read_to_string(out_dir.join("classes.cs")).expect("dump file");
    assert!(written.starts_with("// A.dll\nclass C0\n{\n"));
    assert!(written.contains("// B.dll\nclass Game.C1<T>\n"));
    assert!(written.contains("static System.String get_identifier();"));
    assert!(!dir.path().join("unused").exists());
}

#[test]
fn dump_reads_destination_from_config() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "2019.4.31f1", &dir.path().join("data"));
    let config = dir.path().join("config.json");
    let configured = dir.path().join("configured");
    fs::write(
        &config,
        serde_json::to_string(&json!({
            "output": { "directory": configured.to_string_lossy(), "file_name": "nightly" }
        }))
        .expect("json"),
    )
    .expect("write config");

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("dump")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--kind")
        .arg("methods")
        .arg("--config")
        .arg(&config)
        .assert()
        .success();

    assert!(configured.join("nightly.ms").exists());
}

#[test]
fn dump_rejects_unknown_kinds() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "2019.4.31f1", dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("dump")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--kind")
        .arg("fields")
        .assert()
        .failure();
}

#[test]
fn dump_fails_for_missing_snapshot() {
    let dir = tempdir().expect("tempdir");

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("dump")
        .arg("--snapshot")
        .arg(dir.path().join("missing.json"))
        .arg("--kind")
        .arg("methods")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load VM snapshot"));
}

#[test]
fn info_reports_layout_and_assemblies() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "2017.4.40f1", dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("info")
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .success()
        .stdout(predicate::str::contains("Version: 2017.4.40f1"))
        .stdout(predicate::str::contains("Layout: legacy"))
        .stdout(predicate::str::contains("Assemblies (3):"))
        .stdout(predicate::str::contains("  - A (1 classes)"));
}

#[test]
fn info_json_is_machine_readable() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "2019.4.31f1", dir.path());

    let output = assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("info")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--json")
        .output()
        .expect("run info");
    assert!(output.status.success());

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json output");
    assert_eq!(info["tool_version"], vmscope_core::version());
    assert_eq!(info["layout"], "current");
    assert_eq!(info["pointer_size"], 8);
    assert_eq!(info["corlib"], "mscorlib.dll");
    let names: Vec<&str> = info["assemblies"]
        .as_array()
        .expect("assemblies")
        .iter()
        .map(|assembly| assembly["name"].as_str().expect("name"))
        .collect();
    assert_eq!(names, ["A", "B", "UnityEngine.CoreModule"]);
}

#[test]
fn info_rejects_unsupported_builds() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "5.2.0f1", dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("info")
        .arg("--snapshot")
        .arg(&snapshot)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported VM layout"));
}

#[test]
fn find_class_prints_the_declaration() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "2019.4.31f1", dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("find-class")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--name")
        .arg("Game.C1")
        .assert()
        .success()
        .stdout(predicate::str::contains("// B.dll\nclass Game.C1<T>\n{\n"));
}

#[test]
fn find_class_fails_when_absent() {
    let dir = tempdir().expect("tempdir");
    let snapshot = write_snapshot(dir.path(), "2019.4.31f1", dir.path());

    assert_cmd::cargo::cargo_bin_cmd!("vmscope")
        .arg("find-class")
        .arg("--snapshot")
        .arg(&snapshot)
        .arg("--name")
        .arg("Game.Missing")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Class Game.Missing not found"));
}
