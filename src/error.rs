use clap::Error as ClapError;
use config::ConfigError;
use eyre::Report as ReportError;
use log::SetLoggerError;
use rayon::ThreadPoolBuildError;
use serde_yaml::Error as YamlError;
use snafu::Snafu;
use std::{io::Error as IoError, path::PathBuf};
use walkdir::Error as WalkDirError;

#[derive(Snafu, Debug)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Io { source: IoError },
    #[snafu(transparent)]
    SetLogger { source: SetLoggerError },
    #[snafu(transparent)]
    Yaml { source: YamlError },
    #[snafu(transparent)]
    WalkDir { source: WalkDirError },
    #[snafu(transparent)]
    ThreadPool { source: ThreadPoolBuildError },
    #[snafu(display("Not found dir: {}", path.display()))]
    DirNotFound { path: PathBuf },
    #[snafu(display("{} is not a directory!", path.display()))]
    NotADirectory { path: PathBuf },
    #[snafu(display("{} is not inside the source directory.", path.display()))]
    OutsideSourceRoot { path: PathBuf },
    #[snafu(display("Worker count must be at least 1, got {count}."))]
    InvalidWorkerCount { count: usize },
    #[snafu(transparent)]
    Report { source: ReportError },
    #[snafu(transparent)]
    Clap { source: ClapError },
    #[snafu(transparent)]
    Config { source: ConfigError },
}

pub type Result<V> = std::result::Result<V, Error>;
