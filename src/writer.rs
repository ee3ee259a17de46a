//! Result persistence.
//!
//! Results land in `{base}.{identifier}.{suffix}` under the output directory,
//! or on stdout when the base is `-`.

use crate::consts::cli::STDOUT_SENTINEL;
use crate::job::ResultTypeDescriptor;
use log::info;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrittenTo {
    Stdout,
    File(PathBuf),
}

impl WrittenTo {
    pub fn path(&self) -> Option<&Path> {
        match self {
            WrittenTo::Stdout => None,
            WrittenTo::File(path) => Some(path),
        }
    }
}

type SharedStdout = Arc<Mutex<Box<dyn Write + Send>>>;

/// Writes fetched artifacts to disk or stdout.
///
/// Clones share one stdout handle, so concurrent jobs writing to `-` never
/// interleave within a single artifact.
#[derive(Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
    stdout: SharedStdout,
}

impl ResultWriter {
    /// Writer targeting the current working directory and the process stdout.
    pub fn new() -> Self {
        Self::in_dir(".")
    }

    pub fn in_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            stdout: Arc::new(Mutex::new(Box::new(io::stdout()))),
        }
    }

    /// Replaces the stream used for the `-` base.
    #[cfg(test)]
    pub fn with_stdout(mut self, stdout: Box<dyn Write + Send>) -> Self {
        self.stdout = Arc::new(Mutex::new(stdout));
        self
    }

    pub fn result_path(&self, descriptor: &ResultTypeDescriptor, out_base: &str) -> PathBuf {
        self.output_dir.join(format!(
            "{}.{}.{}",
            out_base, descriptor.identifier, descriptor.file_suffix
        ))
    }

    pub fn write(
        &self,
        artifact: &[u8],
        descriptor: &ResultTypeDescriptor,
        out_base: &str,
    ) -> io::Result<WrittenTo> {
        if out_base == STDOUT_SENTINEL {
            let mut stdout = self
                .stdout
                .lock()
                .map_err(|_| io::Error::other("stdout lock poisoned"))?;
            stdout.write_all(artifact)?;
            stdout.flush()?;
            return Ok(WrittenTo::Stdout);
        }

        let path = self.result_path(descriptor, out_base);
        if descriptor.is_text() {
            fs::write(&path, decode_latin1(artifact))?;
        } else {
            fs::write(&path, artifact)?;
        }
        info!("Wrote {}", path.display());
        Ok(WrittenTo::File(path))
    }
}

impl Default for ResultWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// ISO-8859-1: every byte is the code point of the same value.
fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
