use std::ffi::OsString;
use std::fs::File;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::{GalesError, Result};

const STDERR_TAIL: usize = 2048;

/// An external program invoked with templated arguments.
///
/// `{input}`, `{output}` and `{sizes}` inside an argument are replaced with
/// the corresponding path. When no argument mentions `{output}`, the
/// program's stdout is written to the output path instead.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: &str, args: &[&str]) -> ToolCommand {
        ToolCommand {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Same arguments, different executable.
    pub fn with_program(mut self, program: String) -> ToolCommand {
        self.program = program;
        self
    }

    fn writes_output_itself(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{output}"))
    }

    fn render(&self, input: &Path, output: &Path, sizes: Option<&Path>) -> Vec<OsString> {
        self.args.iter()
            .map(|arg| {
                let mut rendered = arg
                    .replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy());
                if let Some(sizes) = sizes {
                    rendered = rendered.replace("{sizes}", &sizes.to_string_lossy());
                }
                OsString::from(rendered)
            })
            .collect()
    }

    /// Runs the command to completion. A non-zero exit is an error carrying
    /// the tail of the program's stderr.
    pub fn run(&self, input: &Path, output: &Path, sizes: Option<&Path>) -> Result<()> {
        let args = self.render(input, output, sizes);
        let mut command = Command::new(&self.program);
        command.args(&args)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());

        if self.writes_output_itself() {
            command.stdout(Stdio::null());
        } else {
            let file = File::create(output).map_err(|e| GalesError::io(output, e))?;
            command.stdout(Stdio::from(file));
        }

        debug!(program = %self.program, args = ?args, "running external command");
        let result = command.output()
            .map_err(|source| GalesError::CommandSpawn { program: self.program.clone(), source })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let start = stderr.len().saturating_sub(STDERR_TAIL);
            let start = (start..stderr.len())
                .find(|&i| stderr.is_char_boundary(i))
                .unwrap_or(stderr.len());
            return Err(GalesError::CommandFailed {
                program: self.program.clone(),
                status: result.status,
                stderr: stderr[start..].trim().to_string(),
            });
        }

        Ok(())
    }
}
