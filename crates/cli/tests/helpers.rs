use std::fs;

use tempfile::tempdir;
use vmscope::{canonicalize_or_current, load_config, open_session};

#[test]
fn canonicalize_or_current_returns_cwd_for_dot() {
    let original = std::env::current_dir().expect("cwd");
    let tmp = tempdir().expect("tempdir");
    std::env::set_current_dir(tmp.path()).expect("chdir tmp");

    let result = canonicalize_or_current(".").expect("canonicalize").canonicalize().expect("canon");
    let expected = tmp.path().canonicalize().expect("canon tmp");
    assert_eq!(result, expected);

    std::env::set_current_dir(original).expect("restore cwd");
}

#[test]
fn canonicalize_or_current_keeps_missing_absolute_paths() {
    let tmp = tempdir().expect("tempdir");
    let missing = tmp.path().join("not-created-yet");
    let result = canonicalize_or_current(missing.to_str().expect("utf8 path")).expect("resolve");
    assert_eq!(result, missing);
}

#[test]
fn load_config_defaults_without_a_path() {
    let config = load_config(None).expect("default config");
    assert_eq!(config, vmscope_core::config::DumperConfig::default());
}

#[test]
fn load_config_reports_the_offending_file() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("bad.json");
    fs::write(&path, "{ \"output\": 5 }").expect("write");

    let err = load_config(Some(path.to_str().expect("utf8 path"))).expect_err("invalid config");
    assert!(format!("{err:#}").contains("bad.json"));
}

#[test]
fn open_session_attaches_to_yaml_snapshots() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("vm.yml");
    fs::write(&path, "vm_version: 2018.4.36f1\nassemblies:\n  - image: Game.dll\n").expect("write");

    let session = open_session(path.to_str().expect("utf8 path"), &Default::default())
        .expect("session");
    assert_eq!(session.layout().name(), "current");
    assert_eq!(session.domain().expect("domain").assemblies().expect("assemblies").len(), 1);
}
