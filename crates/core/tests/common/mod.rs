#![allow(dead_code)]

use serde_json::{json, Value};
use vmscope_core::config::DumperConfig;
use vmscope_core::model::Session;
use vmscope_core::native::{SnapshotAccessor, VmSnapshot};

pub const MODULE_BASE: u64 = 0x1000_0000;
pub const CURRENT_VERSION: &str = "2019.4.31f1";
pub const LEGACY_VERSION: &str = "2017.4.40f1";

/// Two assemblies: `A` with a plain class `C0`, `B` with a generic `C1<T>`.
pub fn scenario_assemblies() -> Vec<Value> {
    vec![
        json!({
            "image": "A.dll",
            "classes": [{
                "name": "C0",
                "fields": [{ "name": "count", "type": "int", "offset": 16 }],
                "methods": [{ "name": "M0", "address": MODULE_BASE + 0x1234 }]
            }]
        }),
        json!({
            "image": "B.dll",
            "classes": [{
                "name": "C1",
                "generic_parameters": ["T"],
                "fields": [{ "name": "item", "type": "T", "offset": 16 }],
                "methods": [{
                    "name": "M1",
                    "parameters": [{ "name": "value", "type": "T" }],
                    "address": MODULE_BASE + 0x5678
                }]
            }]
        }),
    ]
}

/// The host's `UnityEngine.Application` with its string getters.
pub fn host_assembly(persistent_data_path: &str, identifier: &str, version: &str) -> Value {
    let getter = |name: &str, result: &str| {
        json!({ "name": name, "return_type": "string", "is_static": true, "result": result })
    };
    json!({
        "image": "UnityEngine.CoreModule.dll",
        "classes": [{
            "namespace": "UnityEngine",
            "name": "Application",
            "is_abstract": true,
            "is_sealed": true,
            "methods": [
                getter("get_persistentDataPath", persistent_data_path),
                getter("get_identifier", identifier),
                getter("get_version", version),
            ]
        }]
    })
}

pub fn snapshot(version: &str, assemblies: Vec<Value>) -> VmSnapshot {
    serde_json::from_value(json!({
        "vm_version": version,
        "module_base": MODULE_BASE,
        "assemblies": assemblies,
    }))
    .expect("valid snapshot")
}

pub fn session(snapshot: VmSnapshot) -> Session {
    let accessor = SnapshotAccessor::new(snapshot).expect("snapshot accessor");
    Session::attach(accessor).expect("attach")
}

pub fn session_with(snapshot: VmSnapshot, config: &DumperConfig) -> Session {
    let accessor = SnapshotAccessor::new(snapshot).expect("snapshot accessor");
    Session::from_config(accessor, config).expect("attach")
}

pub fn scenario_session() -> Session {
    session(snapshot(CURRENT_VERSION, scenario_assemblies()))
}
