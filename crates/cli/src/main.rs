mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::commands::{dump_command, find_class_command, info_command};

/// Environment variable holding the log filter directives.
const LOG_ENV: &str = "VMSCOPE_LOG";

/// Runtime metadata introspection for embedded managed-code VMs.
///
/// This CLI is a thin wrapper around `vmscope-core` (exposed in code as
/// `vmscope_core`). It attaches to a VM described by a snapshot file and
/// either dumps its metadata or answers a single query.
#[derive(Parser, Debug)]
#[command(
    name = "vmscope",
    version,
    about = "Runtime metadata introspection and dumping for managed-code VMs",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    /// Class declarations (`.cs`).
    Classes,
    /// Method addresses (`.ms`).
    Methods,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dump every class or every method address of the VM to a file.
    ///
    /// Output goes to the host application's data directory unless
    /// `--out-dir` (or the config's `output.directory`) says otherwise.
    Dump {
        /// VM snapshot description (JSON, or YAML with a .yaml/.yml extension).
        #[arg(long)]
        snapshot: String,

        /// What to dump.
        #[arg(long, value_enum)]
        kind: KindArg,

        /// Destination directory.
        #[arg(long)]
        out_dir: Option<String>,

        /// Destination file name, without extension.
        #[arg(long)]
        file_name: Option<String>,

        /// Dumper config file (JSON).
        #[arg(long)]
        config: Option<String>,
    },

    /// Show the VM version, selected class layout and loaded assemblies.
    Info {
        #[arg(long)]
        snapshot: String,

        #[arg(long)]
        config: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Print the declaration of one class, looked up by `Namespace.Name`.
    FindClass {
        #[arg(long)]
        snapshot: String,

        /// Namespace-qualified class name, e.g. `Game.Player`.
        #[arg(long)]
        name: String,

        #[arg(long)]
        config: Option<String>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Dump { snapshot, kind, out_dir, file_name, config } => {
            dump_command(&snapshot, kind, out_dir, file_name, config.as_deref())?
        }
        Command::Info { snapshot, config, json } => {
            info_command(&snapshot, config.as_deref(), json)?
        }
        Command::FindClass { snapshot, name, config } => {
            find_class_command(&snapshot, &name, config.as_deref())?
        }
    }

    Ok(())
}
