use anyhow::{Context, Result};
use vmscope::{canonicalize_or_current, load_config, open_session};
use vmscope_core::services::dump::Dumper;

use crate::KindArg;

/// Run the dump pipeline and report where the file landed.
pub fn dump_command(
    snapshot: &str,
    kind: KindArg,
    out_dir: Option<String>,
    file_name: Option<String>,
    config: Option<&str>,
) -> Result<()> {
    let config = load_config(config)?;
    let session = open_session(snapshot, &config)?;

    let mut dumper = Dumper::new(&session)
        .with_config(&config.output)
        .on_progress(|assembly| println!("Dumping {assembly}"));
    if let Some(dir) = out_dir {
        dumper = dumper.directory(canonicalize_or_current(&dir)?);
    }
    if let Some(name) = file_name {
        dumper = dumper.file_name(name);
    }

    let target = match kind {
        KindArg::Classes => dumper.classes(),
        KindArg::Methods => dumper.methods(),
    };
    let label = target.kind().extension();
    let path = target.run().context("Dump failed")?;

    println!("Wrote {label} dump:");
    println!("  Path: {}", path.display());

    Ok(())
}
