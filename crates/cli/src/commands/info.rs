use anyhow::{Context, Result};
use serde::Serialize;
use vmscope::{load_config, open_session};
use vmscope_core::native::NativeAccessor;

#[derive(Serialize)]
pub struct VmInfo {
    pub tool_version: String,
    pub vm_version: String,
    pub layout: String,
    pub pointer_size: usize,
    pub corlib: String,
    pub assemblies: Vec<AssemblyInfo>,
}

#[derive(Serialize)]
pub struct AssemblyInfo {
    pub name: String,
    pub image: String,
    pub class_count: u32,
}

/// Summarize the attached VM.
pub fn info_command(snapshot: &str, config: Option<&str>, json: bool) -> Result<()> {
    let config = load_config(config)?;
    let session = open_session(snapshot, &config)?;

    let domain = session.domain().context("Failed to read VM domain")?;
    let mut assemblies = Vec::new();
    for assembly in domain.assemblies()? {
        let image = assembly.image()?;
        assemblies.push(AssemblyInfo {
            name: assembly.name()?.to_string(),
            image: image.name()?.to_string(),
            class_count: image.class_count()?,
        });
    }

    let info = VmInfo {
        tool_version: vmscope_core::version().to_string(),
        vm_version: session.version().to_string(),
        layout: session.layout().name().to_string(),
        pointer_size: session.api().pointer_size(),
        corlib: session.corlib()?.name()?.to_string(),
        assemblies,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("VM Info");
    println!("=======");
    println!("vmscope-core v{}", info.tool_version);
    println!("Version: {}", info.vm_version);
    println!("Layout: {}", info.layout);
    println!("Pointer size: {}", info.pointer_size);
    println!("Corlib: {}", info.corlib);
    println!();
    println!("Assemblies ({}):", info.assemblies.len());
    for assembly in &info.assemblies {
        println!("  - {} ({} classes)", assembly.name, assembly.class_count);
    }

    Ok(())
}
