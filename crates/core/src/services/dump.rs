//! Dump pipeline.
//!
//! A [`Dumper`] collects the destination, then [`Dumper::classes`] or
//! [`Dumper::methods`] fixes the kind of dump. The resulting [`DumpTarget`]
//! either hands out the lazy chunk sequence or streams it to disk.
//!
//! ```no_run
//! # fn demo(session: &vmscope_core::model::Session) -> vmscope_core::MetaResult<()> {
//! use vmscope_core::services::dump::Dumper;
//!
//! let path = Dumper::new(session).directory("/tmp/out").file_name("game").methods().run()?;
//! println!("written to {}", path.display());
//! # Ok(())
//! # }
//! ```

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::iter;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::OutputConfig;
use crate::error::{MetaError, MetaResult};
use crate::model::{Assembly, Class, Session};
use crate::services::generics::GenericResolver;
use crate::services::host::HostApplication;

type Progress<'a> = Box<dyn FnMut(&str) + 'a>;
type Chunks<'a> = Box<dyn Iterator<Item = MetaResult<String>> + 'a>;

/// What a dump contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    /// Every class declaration, grouped by assembly.
    Classes,
    /// One `address DeclaringType.Method` line per compiled method.
    Methods,
}

impl DumpKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Classes => "cs",
            Self::Methods => "ms",
        }
    }
}

/// Destination settings collected before the dump kind is chosen.
pub struct Dumper<'a> {
    session: &'a Session,
    directory: Option<PathBuf>,
    file_name: Option<String>,
    progress: Option<Progress<'a>>,
}

impl<'a> Dumper<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session, directory: None, file_name: None, progress: None }
    }

    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Base name of the output file; the extension follows the dump kind.
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Apply configured defaults for anything not set explicitly.
    pub fn with_config(mut self, output: &OutputConfig) -> Self {
        if self.directory.is_none() {
            self.directory = output.directory.as_ref().map(PathBuf::from);
        }
        if self.file_name.is_none() {
            self.file_name = output.file_name.clone();
        }
        self
    }

    /// Called with each assembly name before its classes are traversed.
    pub fn on_progress(mut self, progress: impl FnMut(&str) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn classes(self) -> DumpTarget<'a> {
        self.select(DumpKind::Classes)
    }

    pub fn methods(self) -> DumpTarget<'a> {
        self.select(DumpKind::Methods)
    }

    fn select(self, kind: DumpKind) -> DumpTarget<'a> {
        DumpTarget {
            session: self.session,
            kind,
            directory: self.directory,
            file_name: self.file_name,
            progress: self.progress,
        }
    }
}

/// A fully configured dump.
pub struct DumpTarget<'a> {
    session: &'a Session,
    kind: DumpKind,
    directory: Option<PathBuf>,
    file_name: Option<String>,
    progress: Option<Progress<'a>>,
}

impl<'a> DumpTarget<'a> {
    pub fn kind(&self) -> DumpKind {
        self.kind
    }

    /// Destination file, filling in host-derived defaults.
    pub fn path(&self) -> MetaResult<PathBuf> {
        let host = HostApplication::new(self.session);

        let directory = match &self.directory {
            Some(directory) => directory.clone(),
            None => match host.persistent_data_path()? {
                Some(path) => PathBuf::from(path),
                None => {
                    warn!("host persistent data path unavailable, using current directory");
                    PathBuf::from(".")
                }
            },
        };

        let file_name = match &self.file_name {
            Some(file_name) => file_name.clone(),
            None => match (host.identifier()?, host.version()?) {
                (Some(identifier), Some(version)) => format!("{identifier}_{version}"),
                _ => Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
            },
        };

        Ok(directory.join(format!("{file_name}.{}", self.kind.extension())))
    }

    /// The dump content as a single-pass sequence of text chunks.
    pub fn lines(self) -> DumpLines<'a> {
        let session = self.session;
        let assemblies = session.domain().and_then(|domain| Ok(domain.assemblies()?.to_vec()));
        let assemblies = match assemblies {
            Ok(assemblies) => assemblies,
            Err(err) => return DumpLines { chunks: failed(err) },
        };
        let mut progress = self.progress;
        let kind = self.kind;

        let chunks = assemblies.into_iter().flat_map(move |assembly| -> Chunks<'a> {
            let classes = match assembly_classes(&assembly, progress.as_mut()) {
                Ok(classes) => classes,
                Err(err) => return failed(err),
            };
            match kind {
                DumpKind::Classes => Box::new(
                    classes
                        .into_iter()
                        .map(|class| class.declaration().map(|block| format!("{block}\n\n"))),
                ),
                DumpKind::Methods => {
                    Box::new(classes.into_iter().flat_map(move |class| -> Chunks<'a> {
                        match method_lines(session, &class) {
                            Ok(lines) => Box::new(lines.into_iter().map(Ok)),
                            Err(err) => failed(err),
                        }
                    }))
                }
            }
        });

        DumpLines { chunks: Box::new(chunks) }
    }

    /// Stream the dump to its destination and return the written path.
    pub fn run(self) -> MetaResult<PathBuf> {
        let path = self.path()?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MetaError::io(parent, e))?;
        }

        let file = File::create(&path).map_err(|e| MetaError::io(&path, e))?;
        let mut writer = BufWriter::new(file);
        for chunk in self.lines() {
            writer.write_all(chunk?.as_bytes()).map_err(|e| MetaError::io(&path, e))?;
        }
        writer.flush().map_err(|e| MetaError::io(&path, e))?;

        info!(path = %path.display(), "dump written");
        Ok(path)
    }
}

/// Lazy dump content. Not restartable: re-run the dump to traverse again.
pub struct DumpLines<'a> {
    chunks: Chunks<'a>,
}

impl Iterator for DumpLines<'_> {
    type Item = MetaResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.chunks.next()
    }
}

fn failed<'a>(err: MetaError) -> Chunks<'a> {
    Box::new(iter::once(Err(err)))
}

fn assembly_classes<'a>(
    assembly: &Assembly<'a>,
    progress: Option<&mut Progress<'a>>,
) -> MetaResult<Vec<Class<'a>>> {
    let name = assembly.name()?;
    info!(assembly = name, "dumping");
    if let Some(progress) = progress {
        progress(name);
    }
    Ok(assembly.image()?.classes()?.to_vec())
}

/// Address lines for every compiled method of a closed stand-in of `class`.
fn method_lines<'a>(session: &'a Session, class: &Class<'a>) -> MetaResult<Vec<String>> {
    let resolver = GenericResolver::new(session);
    let class_was_generic = class.is_generic()?;
    let closed = resolver.representative_class(class)?;

    let mut lines = Vec::new();
    for method in closed.methods()? {
        let method = resolver.representative_method(method, class_was_generic)?;
        let Some(token) = method.address_token()? else { continue };
        lines.push(format!("{token} {}.{}\n", method.class()?.type_name()?, method.name()?));
    }
    Ok(lines)
}
