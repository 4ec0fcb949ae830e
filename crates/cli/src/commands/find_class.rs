use anyhow::{anyhow, Result};
use vmscope::{load_config, open_session};

/// Print the canonical declaration of `name`.
pub fn find_class_command(snapshot: &str, name: &str, config: Option<&str>) -> Result<()> {
    let config = load_config(config)?;
    let session = open_session(snapshot, &config)?;

    let class = session
        .domain()?
        .find_class(name)?
        .ok_or_else(|| anyhow!("Class {name} not found"))?;
    println!("{}", class.declaration()?);

    Ok(())
}
