//! GitHub Actions workflow commands.
//!
//! Commands are lines on stdout the runner interprets. Step outputs go to the
//! file named by `GITHUB_OUTPUT` when the runner provides one.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;

use uuid::Uuid;

/// Escape a command value (`%`, CR and LF are significant to the runner).
pub fn escape_data(value: &str) -> String {
    value
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// Writes workflow commands to `out`.
pub struct WorkflowCommands<W: Write> {
    out: W,
    output_file: Option<PathBuf>,
}

impl WorkflowCommands<io::Stdout> {
    /// Commands on stdout; outputs to `GITHUB_OUTPUT` when set.
    pub fn stdout(output_file: Option<PathBuf>) -> Self {
        Self::new(io::stdout(), output_file)
    }
}

impl<W: Write> WorkflowCommands<W> {
    pub fn new(out: W, output_file: Option<PathBuf>) -> Self {
        Self {
            out,
            output_file: output_file.filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// Register a value the runner must redact from all later log output.
    pub fn add_mask(&mut self, value: &str) -> io::Result<()> {
        if value.is_empty() {
            return Ok(());
        }
        writeln!(self.out, "::add-mask::{}", escape_data(value))?;
        self.out.flush()
    }

    /// Annotate the run with an error.
    pub fn error(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.out, "::error::{}", escape_data(message))?;
        self.out.flush()
    }

    /// Expose a step output.
    pub fn set_output(&mut self, name: &str, value: &str) -> io::Result<()> {
        match &self.output_file {
            Some(path) => {
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                if value.contains('\n') || value.contains('\r') {
                    let delimiter = format!("ghadelimiter_{}", Uuid::new_v4());
                    writeln!(file, "{}<<{}", name, delimiter)?;
                    writeln!(file, "{}", value)?;
                    writeln!(file, "{}", delimiter)
                } else {
                    writeln!(file, "{}={}", name, value)
                }
            }
            None => {
                writeln!(self.out, "::set-output name={}::{}", name, escape_data(value))?;
                self.out.flush()
            }
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
