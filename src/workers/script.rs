//! Script work units: a list of lines plus files to ship in and out.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::session::remote_name;
use crate::core::{AppResult, Session, WorkFlags, WorkUnit};

/// Lines of a script together with its auxiliary and result files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    lines: Vec<String>,
    aux_files: Vec<PathBuf>,
    result_files: Vec<PathBuf>,
}

impl Script {
    /// Start an empty script.
    #[must_use]
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    /// Script lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Files uploaded before the script runs.
    #[must_use]
    pub fn aux_files(&self) -> &[PathBuf] {
        &self.aux_files
    }

    /// Files downloaded after the script ran, into these local paths.
    #[must_use]
    pub fn result_files(&self) -> &[PathBuf] {
        &self.result_files
    }

    /// Write the script to a temporary file and wrap it in a work unit.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while writing the temporary file.
    pub fn into_work(self) -> io::Result<ScriptWork> {
        let path = std::env::temp_dir().join(format!("script-{}.R", Uuid::new_v4().simple()));
        let mut contents = self.lines.join("\n");
        contents.push('\n');
        fs::write(&path, contents)?;
        debug!(path = %path.display(), lines = self.lines.len(), "script written");
        Ok(ScriptWork {
            script: self,
            path,
            flags: WorkFlags::new(),
        })
    }
}

/// Builder for [`Script`].
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    script: Script,
}

impl ScriptBuilder {
    /// Append a line.
    #[must_use]
    pub fn line(mut self, line: impl Into<String>) -> Self {
        self.script.lines.push(line.into());
        self
    }

    /// Append several lines.
    #[must_use]
    pub fn lines<I, L>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.script.lines.extend(lines.into_iter().map(Into::into));
        self
    }

    /// Append a line after replacing every `${name}` found in `vars`.
    /// Unknown placeholders are kept as they are.
    #[must_use]
    pub fn line_replacing(self, line: &str, vars: &HashMap<String, String>) -> Self {
        self.line(substitute(line, vars))
    }

    /// Append every line read from `reader`.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn lines_from_reader<R: BufRead>(self, reader: R) -> io::Result<Self> {
        let lines = reader.lines().collect::<io::Result<Vec<_>>>()?;
        Ok(self.lines(lines))
    }

    /// Append every line read from `reader`, with `${name}` substitution.
    ///
    /// # Errors
    ///
    /// Returns the first read error.
    pub fn lines_from_reader_replacing<R: BufRead>(
        self,
        reader: R,
        vars: &HashMap<String, String>,
    ) -> io::Result<Self> {
        let lines = reader.lines().collect::<io::Result<Vec<_>>>()?;
        Ok(self.lines(lines.iter().map(|l| substitute(l, vars))))
    }

    /// Upload `path` before running the script.
    #[must_use]
    pub fn aux_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.script.aux_files.push(path.into());
        self
    }

    /// Download the file named like `path` after the script ran, into `path`.
    #[must_use]
    pub fn result_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.script.result_files.push(path.into());
        self
    }

    /// Finish the script.
    #[must_use]
    pub fn build(self) -> Script {
        self.script
    }
}

/// Replace `${name}` placeholders with values from `vars`.
fn substitute(line: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Work unit that uploads the auxiliary files, sources the script, then
/// fetches and removes each result file. The local script file is deleted
/// when the work unit is dropped.
#[derive(Debug)]
pub struct ScriptWork {
    script: Script,
    path: PathBuf,
    flags: WorkFlags,
}

impl ScriptWork {
    /// Local path of the written script.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The script being run.
    #[must_use]
    pub const fn script(&self) -> &Script {
        &self.script
    }
}

#[async_trait]
impl WorkUnit for ScriptWork {
    async fn run(&self, session: Arc<dyn Session>) -> AppResult<()> {
        for aux in &self.script.aux_files {
            session.send_file(aux, &remote_name(aux)?).await?;
        }
        session.source(&self.path).await?;
        session.remove_file(&remote_name(&self.path)?).await?;
        for result in &self.script.result_files {
            let name = remote_name(result)?;
            session.receive_file(&name, result).await?;
            session.remove_file(&name).await?;
        }
        Ok(())
    }

    fn flags(&self) -> &WorkFlags {
        &self.flags
    }
}

impl Drop for ScriptWork {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to delete script file");
            }
        }
    }
}
