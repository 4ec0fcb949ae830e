mod common;

use std::fs;

use common::{host_assembly, scenario_assemblies, session, snapshot, CURRENT_VERSION, MODULE_BASE};
use serde_json::json;
use tempfile::tempdir;
use vmscope_core::config::DumperConfig;
use vmscope_core::model::{Class, ClassKind, Session, TypeEnum};
use vmscope_core::native::{SnapshotAccessor, VmSnapshot};
use vmscope_core::services::host::HostApplication;
use vmscope_core::MetaError;

fn inventory_session() -> Session {
    session(snapshot(
        CURRENT_VERSION,
        vec![json!({
            "image": "Inventory.dll",
            "classes": [
                { "namespace": "Inventory", "name": "IStackable", "kind": "interface", "methods": [
                    { "name": "Merge", "return_type": "bool", "is_abstract": true,
                      "parameters": [{ "name": "other", "type": "Inventory.IStackable" }] }
                ]},
                { "namespace": "Inventory", "name": "Item", "is_abstract": true,
                  "interfaces": ["Inventory.IStackable"],
                  "fields": [
                      { "name": "MaxStack", "type": "int", "is_literal": true },
                      { "name": "Registry", "type": "System.Object", "is_static": true,
                        "offset": 0 },
                      { "name": "id", "type": "string", "is_read_only": true, "offset": 16 }
                  ],
                  "methods": [
                      { "name": "Merge", "return_type": "bool", "is_virtual": true,
                        "parameters": [{ "name": "other", "type": "Inventory.IStackable" }],
                        "address": MODULE_BASE + 0x100 },
                      { "name": "Create", "return_type": "Inventory.Item", "is_static": true,
                        "parameters": [
                            { "name": "id", "type": "string" },
                            { "name": "count", "type": "int" }
                        ],
                        "address": MODULE_BASE + 0x200 }
                  ]},
                { "namespace": "Inventory", "name": "Sword", "parent": "Inventory.Item",
                  "is_sealed": true },
                { "namespace": "Inventory", "name": "Slot", "kind": "struct",
                  "fields": [{ "name": "index", "type": "int", "offset": 16 }] },
                { "namespace": "Inventory", "name": "Rarity", "kind": "enum",
                  "fields": [{ "name": "value__", "type": "int", "offset": 16 }] },
                { "namespace": "Inventory", "name": "Util",
                  "is_abstract": true, "is_sealed": true },
                { "name": "Entry", "declaring_type": "Inventory.Item" }
            ]
        })],
    ))
}

fn class<'a>(session: &'a Session, full_name: &str) -> Class<'a> {
    session
        .domain()
        .expect("domain")
        .find_class(full_name)
        .expect("lookup")
        .unwrap_or_else(|| panic!("{full_name} should exist"))
}

#[test]
fn class_kinds_follow_the_vm_flags() {
    let session = inventory_session();
    let stackable = class(&session, "Inventory.IStackable");
    assert_eq!(stackable.kind().expect("kind"), ClassKind::Interface);
    assert_eq!(class(&session, "Inventory.Item").kind().expect("kind"), ClassKind::Class);
    assert_eq!(class(&session, "Inventory.Rarity").kind().expect("kind"), ClassKind::Enum);

    let slot = class(&session, "Inventory.Slot");
    assert!(slot.is_struct().expect("struct"));
    assert!(slot.is_value_type().expect("value type"));
    let parent = slot.parent().expect("parent").expect("ValueType");
    assert_eq!(parent.type_name().expect("name"), "System.ValueType");
    assert_eq!(slot.ty().expect("type").type_enum().expect("enum"), TypeEnum::ValueType);

    let item = class(&session, "Inventory.Item");
    assert!(item.is_abstract().expect("abstract"));
    assert!(!item.is_sealed().expect("sealed"));
    assert_eq!(item.assembly_name().expect("assembly"), "Inventory");
    let domain = session.domain().expect("domain");
    let assembly = &domain.assemblies().expect("assemblies")[0];
    assert_eq!(assembly.name().expect("name"), item.assembly_name().expect("assembly"));
    assert_eq!(item.ty().expect("type").type_enum().expect("enum"), TypeEnum::Class);
}

#[test]
fn class_declaration_lists_inheritance_and_members() {
    let session = inventory_session();
    let item = class(&session, "Inventory.Item");
    assert_eq!(
        item.to_string(),
        "// Inventory.dll
abstract class Inventory.Item : Inventory.IStackable
{
    const System.Int32 MaxStack;
    static System.Object Registry; // 0x0
    readonly System.String id; // 0x10

    virtual System.Boolean Merge(Inventory.IStackable other); // 0x00000100
    static Inventory.Item Create(System.String id, System.Int32 count); // 0x00000200
}"
    );

    let sword = class(&session, "Inventory.Sword");
    assert!(sword.to_string().contains("sealed class Inventory.Sword : Inventory.Item\n{\n}"));
    let util = class(&session, "Inventory.Util");
    assert!(util.to_string().contains("static class Inventory.Util\n"));
    let slot = class(&session, "Inventory.Slot");
    assert!(slot
        .to_string()
        .contains("struct Inventory.Slot\n{\n    System.Int32 index; // 0x10\n}"));
}

#[test]
fn interface_methods_have_no_body() {
    let session = inventory_session();
    let stackable = class(&session, "Inventory.IStackable");
    let merge = stackable.method("Merge", Some(1)).expect("lookup").expect("Merge");
    assert!(merge.is_abstract().expect("abstract"));
    assert!(merge.is_virtual().expect("virtual"));
    assert_eq!(merge.virtual_address().expect("va"), None);
    assert_eq!(merge.to_string(), "abstract System.Boolean Merge(Inventory.IStackable other);");
}

#[test]
fn method_lookup_honours_parameter_count() {
    let session = inventory_session();
    let item = class(&session, "Inventory.Item");
    assert!(item.method("Create", Some(1)).expect("lookup").is_none());

    let create = item.method("Create", Some(2)).expect("lookup").expect("Create");
    assert!(create.is_static().expect("static"));
    assert_eq!(create.class().expect("class"), &item);
    let names: Vec<&str> = create
        .parameters()
        .expect("parameters")
        .iter()
        .map(|parameter| parameter.name.as_str())
        .collect();
    assert_eq!(names, ["id", "count"]);
    assert_eq!(create.return_type().expect("ret").class().expect("class"), Some(item.clone()));
}

#[test]
fn field_types_expose_primitive_type_enums() {
    let session = inventory_session();
    let item = class(&session, "Inventory.Item");
    let id = item.field("id").expect("lookup").expect("id");
    assert_eq!(id.ty().expect("type").type_enum().expect("enum"), TypeEnum::String);
    assert!(id.is_read_only().expect("readonly"));
    assert_eq!(id.offset().expect("offset"), 16);

    let max_stack = item.field("MaxStack").expect("lookup").expect("MaxStack");
    assert!(max_stack.is_literal().expect("literal"));
    assert!(max_stack.is_static().expect("static"));
    assert_eq!(max_stack.ty().expect("type").type_enum().expect("enum"), TypeEnum::I4);
    assert!(max_stack.ty().expect("type").class().expect("class").is_none());
}

#[test]
fn nested_classes_know_their_declaring_class() {
    let session = inventory_session();
    let domain = session.domain().expect("domain");
    let image = domain.assemblies().expect("assemblies")[0].image().expect("image").clone();
    let entry = image.classes_by_name().expect("by name")["Inventory.Item.Entry"].clone();
    let declaring = entry.declaring_class().expect("declaring").expect("nested");
    assert_eq!(declaring, &class(&session, "Inventory.Item"));
}

#[test]
fn entity_clones_share_their_caches() {
    let session = inventory_session();
    let item = class(&session, "Inventory.Item");
    let copy = item.clone();
    let fields = item.fields().expect("fields");
    assert!(std::ptr::eq(fields, copy.fields().expect("fields")));
}

#[test]
fn host_getters_invoke_managed_methods() {
    let mut assemblies = scenario_assemblies();
    assemblies.push(host_assembly("/data/game", "com.x.y", "1.0"));
    let session = session(snapshot(CURRENT_VERSION, assemblies));

    let host = HostApplication::new(&session);
    assert!(host.class().expect("class").is_some());
    assert_eq!(host.persistent_data_path().expect("path").as_deref(), Some("/data/game"));
    assert_eq!(host.identifier().expect("identifier").as_deref(), Some("com.x.y"));
    assert_eq!(host.version().expect("version").as_deref(), Some("1.0"));
}

#[test]
fn host_getters_are_absent_without_a_host() {
    let session = session(snapshot(CURRENT_VERSION, scenario_assemblies()));
    let host = HostApplication::new(&session);
    assert!(host.class().expect("class").is_none());
    assert_eq!(host.identifier().expect("identifier"), None);
}

#[test]
fn null_handles_are_rejected_by_constructors() {
    let session = session(snapshot(CURRENT_VERSION, scenario_assemblies()));
    match Class::new(&session, vmscope_core::native::Handle::NULL) {
        Err(MetaError::InvalidHandle { kind, .. }) => assert_eq!(kind, "class"),
        other => panic!("expected InvalidHandle, got {other:?}"),
    }
}

#[test]
fn snapshots_load_from_yaml_and_json() {
    let dir = tempdir().expect("tempdir");
    let yaml_path = dir.path().join("vm.yaml");
    fs::write(
        &yaml_path,
        "vm_version: 2019.4.31f1
pointer_size: 4
module_base: 4096
assemblies:
  - image: Game.dll
    classes:
      - namespace: Game
        name: Player
        methods:
          - name: Jump
            address: 4352
",
    )
    .expect("write yaml");
    let from_yaml = VmSnapshot::from_path(&yaml_path).expect("yaml snapshot");
    assert_eq!(from_yaml.pointer_size, 4);
    assert_eq!(from_yaml.assemblies[0].classes[0].methods[0].address, Some(4352));

    let json_path = dir.path().join("vm.json");
    fs::write(&json_path, serde_json::to_string(&from_yaml).expect("serialize")).expect("write");
    let from_json = VmSnapshot::from_path(&json_path).expect("json snapshot");
    assert_eq!(from_json, from_yaml);

    let accessor = SnapshotAccessor::new(from_json).expect("accessor");
    let session = Session::attach(accessor).expect("attach");
    let jump = class(&session, "Game.Player").method("Jump", None).expect("lookup").expect("Jump");
    assert_eq!(jump.relative_virtual_address().expect("rva"), Some(0x100));
}

#[test]
fn malformed_inputs_are_reported() {
    let dir = tempdir().expect("tempdir");
    let snapshot_path = dir.path().join("broken.json");
    fs::write(&snapshot_path, "{ \"vm_version\": 3 }").expect("write");
    assert!(matches!(VmSnapshot::from_path(&snapshot_path), Err(MetaError::Snapshot(_))));
    assert!(matches!(
        VmSnapshot::from_path(&dir.path().join("missing.json")),
        Err(MetaError::Io { .. })
    ));

    let config_path = dir.path().join("config.json");
    fs::write(&config_path, "{ \"unknown\": true }").expect("write");
    assert!(matches!(DumperConfig::load(&config_path), Err(MetaError::Config(_))));

    fs::write(&config_path, "{ \"type_enum_offset\": 12, \"output\": { \"file_name\": \"x\" } }")
        .expect("write");
    let config = DumperConfig::load(&config_path).expect("config");
    assert_eq!(config.type_enum_offset, Some(12));
    assert_eq!(config.output.file_name.as_deref(), Some("x"));
}
