use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GalesError>;

#[derive(Error, Debug)]
pub enum GalesError {
    #[error("required input file is missing: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("failed to access {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", .path.display())]
    Parse {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid tab-separated data in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to start `{program}`: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("step `{step}` needs {} which does not exist", .path.display())]
    MissingDependency {
        step: String,
        path: PathBuf,
    },

    #[error("producer finished without writing {}", .0.display())]
    SentinelNotCreated(PathBuf),

    #[error("unsupported host operating system: {0}")]
    UnsupportedPlatform(String),
}

impl GalesError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GalesError::Io { path: path.into(), source }
    }
}
