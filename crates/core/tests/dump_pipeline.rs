mod common;

use std::cell::RefCell;
use std::fs;

use common::{
    host_assembly, scenario_assemblies, scenario_session, session, snapshot, CURRENT_VERSION,
    LEGACY_VERSION, MODULE_BASE,
};
use serde_json::json;
use tempfile::tempdir;
use vmscope_core::config::OutputConfig;
use vmscope_core::services::dump::{DumpKind, Dumper};
use vmscope_core::MetaError;

const C0_BLOCK: &str = "// A.dll
class C0
{
    System.Int32 count; // 0x10

    System.Void M0(); // 0x00001234
}

";

const C1_BLOCK: &str = "// B.dll
class C1<T>
{
    T item; // 0x10

    System.Void M1(T value);
}

";

fn collect(lines: impl Iterator<Item = vmscope_core::MetaResult<String>>) -> Vec<String> {
    lines.collect::<Result<_, _>>().expect("dump lines")
}

#[test]
fn methods_dump_lists_relative_addresses() {
    let session = scenario_session();
    let lines = collect(Dumper::new(&session).methods().lines());
    assert_eq!(lines, ["0x00001234 C0.M0\n", "0x00005678 C1<System.Object>.M1\n"]);
}

#[test]
fn classes_dump_reports_progress_per_assembly() {
    let session = scenario_session();
    let progress = RefCell::new(Vec::new());
    let target = Dumper::new(&session)
        .on_progress(|assembly| progress.borrow_mut().push(assembly.to_string()))
        .classes();
    assert_eq!(target.kind(), DumpKind::Classes);

    let blocks = collect(target.lines());
    assert_eq!(blocks, [C0_BLOCK, C1_BLOCK]);
    assert_eq!(progress.into_inner(), ["A", "B"]);
}

#[test]
fn progress_is_reported_lazily() {
    let session = scenario_session();
    let progress = RefCell::new(Vec::new());
    let mut lines = Dumper::new(&session)
        .on_progress(|assembly| progress.borrow_mut().push(assembly.to_string()))
        .methods()
        .lines();
    assert!(progress.borrow().is_empty());

    lines.next().expect("first line").expect("ok");
    assert_eq!(*progress.borrow(), ["A"]);
    lines.next().expect("second line").expect("ok");
    assert_eq!(*progress.borrow(), ["A", "B"]);
    assert!(lines.next().is_none());
}

#[test]
fn methods_without_a_body_are_skipped() {
    let session = session(snapshot(
        CURRENT_VERSION,
        vec![json!({
            "image": "Shapes.dll",
            "classes": [{
                "namespace": "Shapes",
                "name": "Shape",
                "is_abstract": true,
                "methods": [
                    { "name": "Area", "return_type": "double", "is_abstract": true },
                    { "name": "Describe", "return_type": "string", "address": MODULE_BASE + 0x40 },
                    { "name": "Extern", "address": 0x500 }
                ]
            }]
        })],
    ));
    let lines = collect(Dumper::new(&session).methods().lines());
    assert_eq!(
        lines,
        ["0x00000040 Shapes.Shape.Describe\n", "abs:0x0000000000000500 Shapes.Shape.Extern\n"]
    );

    let shape = session
        .domain()
        .expect("domain")
        .find_class("Shapes.Shape")
        .expect("lookup")
        .expect("Shape");
    let external = shape.method("Extern", None).expect("lookup").expect("Extern");
    assert_eq!(external.virtual_address().expect("va"), Some(0x500));
    assert_eq!(external.relative_virtual_address().expect("rva"), None);
    assert!(external.to_string().ends_with("System.Void Extern(); // abs:0x0000000000000500"));
}

#[test]
fn legacy_and_current_layouts_dump_identically() {
    let legacy = session(snapshot(LEGACY_VERSION, scenario_assemblies()));
    let current = session(snapshot(CURRENT_VERSION, scenario_assemblies()));
    assert_eq!(
        collect(Dumper::new(&legacy).methods().lines()),
        collect(Dumper::new(&current).methods().lines())
    );
    assert_eq!(
        collect(Dumper::new(&legacy).classes().lines()),
        collect(Dumper::new(&current).classes().lines())
    );
}

#[test]
fn classes_dump_is_idempotent() {
    let dir = tempdir().expect("tempdir");
    let session = scenario_session();

    let run = || {
        Dumper::new(&session).directory(dir.path()).file_name("classes").classes().run()
    };
    let first_path = run().expect("first run");
    let first = fs::read(&first_path).expect("read first");
    let second_path = run().expect("second run");
    let second = fs::read(&second_path).expect("read second");

    assert_eq!(first_path, dir.path().join("classes.cs"));
    assert_eq!(first_path, second_path);
    assert_eq!(first, second);
    assert_eq!(String::from_utf8(first).expect("utf8"), format!("{C0_BLOCK}{C1_BLOCK}"));
}

#[test]
fn default_destination_comes_from_the_host() {
    let dir = tempdir().expect("tempdir");
    let data_path = dir.path().join("persistent");
    let mut assemblies = scenario_assemblies();
    assemblies.push(host_assembly(&data_path.to_string_lossy(), "com.x.y", "1.0"));
    let session = session(snapshot(CURRENT_VERSION, assemblies));

    let path = Dumper::new(&session).methods().run().expect("dump");
    assert_eq!(path, data_path.join("com.x.y_1.0.ms"));

    let written = fs::read_to_string(&path).expect("read dump");
    assert!(written.starts_with("0x00001234 C0.M0\n0x00005678 C1<System.Object>.M1\n"));
}

#[test]
fn missing_host_identity_falls_back_to_a_timestamp() {
    let dir = tempdir().expect("tempdir");
    let mut assemblies = scenario_assemblies();
    assemblies.push(host_assembly(&dir.path().to_string_lossy(), "", "1.0"));
    let session = session(snapshot(CURRENT_VERSION, assemblies));

    let path = Dumper::new(&session).methods().path().expect("path");
    assert_eq!(path.parent(), Some(dir.path()));
    let stem = path.file_stem().and_then(|stem| stem.to_str()).expect("stem");
    assert_eq!(stem.len(), "2024-01-31_23-59-59".len());
    assert!(stem.chars().all(|c| c.is_ascii_digit() || c == '-' || c == '_'), "{stem}");
    assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("ms"));
}

#[test]
fn missing_host_falls_back_to_the_current_directory() {
    let session = scenario_session();
    let path = Dumper::new(&session).file_name("out").classes().path().expect("path");
    assert_eq!(path, std::path::Path::new(".").join("out.cs"));
}

#[test]
fn explicit_settings_override_config_defaults() {
    let session = scenario_session();
    let output = OutputConfig {
        directory: Some("configured".into()),
        file_name: Some("from-config".into()),
    };

    let path = Dumper::new(&session).file_name("explicit").with_config(&output).methods().path();
    assert_eq!(path.expect("path"), std::path::Path::new("configured").join("explicit.ms"));
}

#[test]
fn unwritable_destination_is_an_io_error() {
    let dir = tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"file").expect("write blocker");

    let session = scenario_session();
    let result =
        Dumper::new(&session).directory(blocker.join("nested")).file_name("x").methods().run();
    match result {
        Err(MetaError::Io { path, .. }) => assert!(path.starts_with(&blocker)),
        other => panic!("expected Io error, got {other:?}"),
    }
}
