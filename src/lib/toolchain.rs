//! External shading-language compiler invocation.
//!
//! [ToolchainInvoker] runs an [Invocation] through a [Toolchain] and classifies the result: any
//! non-blank line on the merged output stream is a diagnostic, and any diagnostic is a failure,
//! whatever the exit code says.

use std::{
    fmt::Display,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use log::{error, info, warn};

use crate::config::BuildConfig;

const CHUNK_SIZE: usize = 4096;

#[derive(Clone, Debug, PartialEq, Eq)]
/// Single command line argument.
pub struct Argument {
    text: String,
    quoted: bool,
}

impl Argument {
    /// Argument passed to the process as is.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl Display for Argument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.quoted {
            write!(f, "\"{}\"", self.text)
        } else {
            write!(f, "{}", self.text)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A compiler command line.
pub struct Invocation {
    program: PathBuf,
    args: Vec<Argument>,
    output: Option<PathBuf>,
}

impl Invocation {
    #[allow(missing_docs)]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            output: None,
        }
    }

    /// Append a plain argument.
    pub fn arg(mut self, text: impl Into<String>) -> Self {
        self.args.push(Argument {
            text: text.into(),
            quoted: false,
        });
        self
    }

    /// Append an absolute path argument, quoted in the command line.
    pub fn path(mut self, path: &Path) -> Self {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_owned());

        self.args.push(Argument {
            text: path.to_string_lossy().into_owned(),
            quoted: true,
        });
        self
    }

    /// SPIR-V compile of `entry` in `source` for `profile` into `output`.
    pub fn dxc<S: AsRef<str>>(
        config: &BuildConfig,
        source: &Path,
        output: &Path,
        entry: &str,
        profile: &str,
        macros: &[S],
    ) -> Self {
        let mut invocation = Self::new(&config.compiler)
            .arg("-spirv")
            .arg("-T")
            .arg(profile)
            .arg("-E")
            .arg(entry)
            .path(source)
            .arg("-Fo")
            .path(output)
            .arg("-fvk-use-dx-layout")
            .arg("-fvk-use-dx-position-w")
            .arg(format!("-fspv-target-env={}", config.target_env));

        for dir in &config.include_dirs {
            invocation = invocation.arg("-I").path(dir);
        }
        for define in macros {
            invocation = invocation.arg("-D").arg(define.as_ref());
        }

        invocation.output = Some(output.to_owned());
        invocation
    }

    #[allow(missing_docs)]
    pub fn program(&self) -> &Path {
        &self.program
    }

    #[allow(missing_docs)]
    pub fn args(&self) -> &[Argument] {
        &self.args
    }

    /// Artifact the invocation produces, if known.
    pub fn output(&self) -> Option<&Path> {
        self.output.as_deref()
    }
}

impl Display for Invocation {
    /// The command line, without the program.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut args = self.args.iter();

        if let Some(first) = args.next() {
            write!(f, "{first}")?;
        }
        for arg in args {
            write!(f, " {arg}")?;
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// Exit status and merged stdout/stderr of a finished run.
pub struct RawOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    #[allow(missing_docs)]
    pub output: Vec<u8>,
}

/// Runs an external compiler to completion.
pub trait Toolchain {
    #[allow(missing_docs)]
    fn run(&self, invocation: &Invocation) -> io::Result<RawOutput>;
}

#[derive(Clone, Copy, Debug, Default)]
/// Child process [Toolchain]. Standard output and error share one pipe, drained in fixed-size
/// chunks until the child closes it.
pub struct ProcessToolchain;

impl Toolchain for ProcessToolchain {
    fn run(&self, invocation: &Invocation) -> io::Result<RawOutput> {
        let (mut reader, writer) = io::pipe()?;

        let mut command = Command::new(invocation.program());
        command
            .args(invocation.args().iter().map(Argument::text))
            .stdin(Stdio::null())
            .stdout(writer.try_clone()?)
            .stderr(writer);

        let mut child = command.spawn()?;
        // Release the parent's write ends, or the read below never sees end of file.
        drop(command);

        let mut output = Vec::new();
        let mut chunk = [0; CHUNK_SIZE];
        let drained = loop {
            match reader.read(&mut chunk) {
                Ok(0) => break Ok(()),
                Ok(read) => output.extend_from_slice(&chunk[..read]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => break Err(err),
            }
        };

        let status = child.wait()?;
        drained?;

        Ok(RawOutput {
            status: status.code(),
            output,
        })
    }
}

#[derive(Debug, thiserror::Error)]
/// Toolchain error
pub enum Error {
    #[error("Error running `{}`: {source}", .program.display())]
    /// The process could not be started or waited for.
    Spawn {
        #[allow(missing_docs)]
        program: PathBuf,
        #[allow(missing_docs)]
        source: io::Error,
    },

    #[error("Compiler reported {} diagnostic line(s)", .lines.len())]
    /// The compiler wrote to its output.
    Diagnostics {
        #[allow(missing_docs)]
        status: Option<i32>,
        #[allow(missing_docs)]
        lines: Vec<String>,
    },
}

#[derive(Debug, Default)]
/// Classifies [Toolchain] runs.
pub struct ToolchainInvoker<T = ProcessToolchain> {
    toolchain: T,
}

impl<T: Toolchain> ToolchainInvoker<T> {
    #[allow(missing_docs)]
    pub fn new(toolchain: T) -> Self {
        Self { toolchain }
    }

    #[allow(missing_docs)]
    pub fn toolchain(&self) -> &T {
        &self.toolchain
    }

    /// Run `invocation` and log every diagnostic line. Succeeds only on silent runs.
    pub fn invoke(&self, invocation: &Invocation) -> Result<(), Error> {
        info!(
            "Running {} {invocation}",
            invocation.program().display()
        );

        let RawOutput { status, output } =
            self.toolchain
                .run(invocation)
                .map_err(|source| Error::Spawn {
                    program: invocation.program().to_owned(),
                    source,
                })?;

        let lines: Vec<String> = String::from_utf8_lossy(&output)
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.trim().is_empty())
            .map(str::to_owned)
            .collect();

        for line in &lines {
            error!("{line}");
        }

        if !lines.is_empty() {
            return Err(Error::Diagnostics { status, lines });
        }

        if status != Some(0) {
            warn!(
                "`{}` exited with {status:?} without any diagnostic",
                invocation.program().display()
            );
        }

        Ok(())
    }
}
