//! Command line arguments layered over the configuration files.

use crate::{
    encoder::Profile,
    error::{DirNotFoundSnafu, NotADirectorySnafu},
    files::{Classifier, DEFAULT_IGNORED_EXTENSIONS, DEFAULT_VIDEO_EXTENSIONS},
    Result,
};
use clap::{value_parser, Parser, ValueEnum};
use config::{builder::DefaultState, Config, ConfigBuilder, File as ConfigFile};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

const CONFIG_FILE_NAME: &str = "transcode-tree.yaml";
const LOCAL_CONFIG_FILE_NAME: &str = ".transcode-tree.yaml";

/// The only accepted value for the optional fourth argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HwAccel {
    Cuda,
}

#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"), version, author, about)]
pub struct Cli {
    /// Directory tree to read videos from.
    source_dir: PathBuf,
    /// Directory tree to write converted videos to.
    dest_dir: PathBuf,
    /// Number of encodes to run at once.
    #[arg(value_parser = value_parser!(u32).range(1..))]
    workers: u32,
    /// Encode on the GPU instead of the CPU.
    #[arg(value_enum)]
    accel: Option<HwAccel>,
    #[arg(
        long,
        help = concat!(
            "The configuration file to use. If provided, no other config files will ",
            "be loaded."
        )
    )]
    config: Option<PathBuf>,
    /// The ffmpeg executable to run.
    #[arg(long)]
    encoder: Option<PathBuf>,
    /// Give each converted file the modified time of its source.
    #[arg(long)]
    preserve_mtimes: bool,
    #[arg(short, long)]
    verbose: bool,
    /// Print the effective settings and exit.
    #[arg(long)]
    print_config: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Settings {
    source_dir: PathBuf,
    dest_dir: PathBuf,
    workers: usize,
    profile: Profile,
    encoder: PathBuf,
    preserve_mtimes: bool,
    verbose: bool,
    video_extensions: Vec<String>,
    ignored_extensions: Vec<String>,
    #[serde(skip)]
    print_config: bool,
}

impl Settings {
    /// Settings with every default, as if run with just the three positional arguments and no
    /// config files.
    pub fn new<S, D>(source_dir: S, dest_dir: D, workers: usize) -> Self
    where
        S: Into<PathBuf>,
        D: Into<PathBuf>,
    {
        Self {
            source_dir: source_dir.into(),
            dest_dir: dest_dir.into(),
            workers,
            profile: Profile::Cpu,
            encoder: PathBuf::from("ffmpeg"),
            preserve_mtimes: false,
            verbose: false,
            video_extensions: to_strings(DEFAULT_VIDEO_EXTENSIONS),
            ignored_extensions: to_strings(DEFAULT_IGNORED_EXTENSIONS),
            print_config: false,
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(std::env::args_os())
    }

    pub fn load_from<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let args = Cli::try_parse_from(args)?;
        let mut conf = Self::get_default_config()?;
        if let Some(config_file) = &args.config {
            conf = conf.add_source(ConfigFile::from(config_file.as_path()).required(true));
        } else {
            conf = Self::add_base_file(conf);
            conf = conf.add_source(
                ConfigFile::from(Path::new(LOCAL_CONFIG_FILE_NAME)).required(false),
            );
        }
        let conf = Self::merge_cli_args(&args, conf)?;
        let mut settings: Self = conf.build()?.try_deserialize()?;
        settings.print_config = args.print_config;
        Ok(settings)
    }

    fn merge_cli_args(
        args: &Cli,
        conf: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>> {
        let mut conf = conf
            .set_override("source_dir", path_value(&args.source_dir))?
            .set_override("dest_dir", path_value(&args.dest_dir))?
            .set_override("workers", i64::from(args.workers))?
            .set_override(
                "profile",
                match args.accel {
                    Some(HwAccel::Cuda) => "cuda",
                    None => "cpu",
                },
            )?;
        if let Some(encoder) = &args.encoder {
            conf = conf.set_override("encoder", path_value(encoder))?;
        }
        if args.preserve_mtimes {
            conf = conf.set_override("preserve_mtimes", true)?;
        }
        if args.verbose {
            conf = conf.set_override("verbose", true)?;
        }
        Ok(conf)
    }

    fn add_base_file(conf: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
        match BaseDirs::new() {
            Some(dirs) => {
                let config_path = dirs.config_dir().join(CONFIG_FILE_NAME);
                conf.add_source(ConfigFile::from(config_path.as_path()).required(false))
            }
            None => {
                log::debug!("No home directory; skipping the user config file.");
                conf
            }
        }
    }

    fn get_default_config() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("encoder", "ffmpeg")?
            .set_default("preserve_mtimes", false)?
            .set_default("verbose", false)?
            .set_default("video_extensions", DEFAULT_VIDEO_EXTENSIONS.to_vec())?
            .set_default("ignored_extensions", DEFAULT_IGNORED_EXTENSIONS.to_vec())?)
    }

    /// For callers that build settings with [`Settings::new`] rather than from a command line.
    pub fn with_preserve_mtimes(mut self, preserve_mtimes: bool) -> Self {
        self.preserve_mtimes = preserve_mtimes;
        self
    }

    /// Fails unless both roots exist and are directories.
    pub fn check_dirs(&self) -> Result<()> {
        for dir in [&self.source_dir, &self.dest_dir] {
            ensure!(dir.exists(), DirNotFoundSnafu { path: dir });
            ensure!(dir.is_dir(), NotADirectorySnafu { path: dir });
        }
        Ok(())
    }

    pub fn classifier(&self) -> Classifier {
        Classifier::new(&self.video_extensions, &self.ignored_extensions)
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn encoder(&self) -> &Path {
        &self.encoder
    }

    pub fn preserve_mtimes(&self) -> bool {
        self.preserve_mtimes
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn print_config(&self) -> bool {
        self.print_config
    }
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn path_value(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
