//! Driving the external encoder for a single work item.
use crate::{files::WorkItem, Result};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsString,
    fmt::{self, Display, Formatter},
    fs::{self, File, OpenOptions},
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

const CPU_OUTPUT_ARGS: &[&str] = &["-strict", "-2", "-vcodec", "libx264", "-crf", "25"];

const CUDA_INPUT_ARGS: &[&str] = &["-hwaccel", "cuda", "-hwaccel_output_format", "cuda"];

const CUDA_OUTPUT_ARGS: &[&str] = &[
    "-c:a", "copy", "-c:v", "h264_nvenc", "-preset", "p2", "-tune", "ll", "-b:v", "0.3M",
    "-bufsize", "5M", "-maxrate", "10M", "-qmin", "0", "-g", "250", "-bf", "3", "-b_ref_mode",
    "middle", "-temporal-aq", "1", "-rc-lookahead", "20", "-i_qfactor", "0.75", "-b_qfactor",
    "1.1",
];

/// Which codec setup every encode of a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// libx264 on the CPU.
    #[default]
    Cpu,
    /// NVENC with CUDA decoding.
    Cuda,
}

impl Profile {
    fn input_args(&self) -> &'static [&'static str] {
        match self {
            Profile::Cpu => &[],
            Profile::Cuda => CUDA_INPUT_ARGS,
        }
    }

    fn output_args(&self) -> &'static [&'static str] {
        match self {
            Profile::Cpu => CPU_OUTPUT_ARGS,
            Profile::Cuda => CUDA_OUTPUT_ARGS,
        }
    }
}

/// What happened to one work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionOutcome {
    Success,
    /// The encoder's exit code, or `None` if there wasn't one (killed by a signal, or the item
    /// failed before or after the encoder ran).
    Failure(Option<i32>),
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Success)
    }
}

impl Display for ConversionOutcome {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            ConversionOutcome::Success => write!(f, "success"),
            ConversionOutcome::Failure(Some(code)) => write!(f, "{}", code),
            ConversionOutcome::Failure(None) => write!(f, "none"),
        }
    }
}

/// The files one worker owns for the whole run. The temp output is reused for every item the
/// worker converts; the log only ever grows.
#[derive(Debug, Clone)]
pub struct EncoderSession {
    worker_id: usize,
    temp_output_path: PathBuf,
    log_path: PathBuf,
}

impl EncoderSession {
    pub fn new(dir: &Path, worker_id: usize) -> Self {
        Self {
            worker_id,
            temp_output_path: dir.join(format!("tmp_convert_{}.mp4", worker_id)),
            log_path: dir.join(format!("tmp_convert_{}.log", worker_id)),
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn temp_output_path(&self) -> &Path {
        &self.temp_output_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }
}

pub trait Encoder: Sync {
    /// Encodes `source` into `output`, writing all diagnostics to `log`. Returns the exit code,
    /// or `None` if the process ended without one.
    fn encode(&self, source: &Path, output: &Path, log: File) -> Result<Option<i32>>;
}

/// An ffmpeg executable, run directly with a structured argument list.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: PathBuf,
    profile: Profile,
}

impl Ffmpeg {
    pub fn new<P: Into<PathBuf>>(program: P, profile: Profile) -> Self {
        Self {
            program: program.into(),
            profile,
        }
    }

    pub fn args(&self, source: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.profile.input_args().iter().map(OsString::from).collect();
        args.push("-i".into());
        args.push(source.into());
        args.extend(self.profile.output_args().iter().map(OsString::from));
        args.push(output.into());
        args
    }
}

impl Encoder for Ffmpeg {
    fn encode(&self, source: &Path, output: &Path, log: File) -> Result<Option<i32>> {
        let stderr = log.try_clone()?;
        log::debug!(
            "Running {} {:?}",
            self.program.display(),
            self.args(source, output)
        );
        let status = Command::new(&self.program)
            .args(self.args(source, output))
            .stdin(Stdio::null())
            .stdout(log)
            .stderr(stderr)
            .status()?;
        Ok(status.code())
    }
}

/// Converts one item through `session`'s temp file. The destination only ever appears by rename,
/// after the encoder exits cleanly; on failure the temp file is left for inspection.
pub fn convert<E: Encoder + ?Sized>(
    encoder: &E,
    item: &WorkItem,
    session: &EncoderSession,
) -> Result<ConversionOutcome> {
    match fs::remove_file(session.temp_output_path()) {
        Ok(()) => log::debug!(
            "Removed stale {}",
            session.temp_output_path().display()
        ),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(session.log_path())?;
    writeln!(
        log,
        "=== {} -> {}",
        item.source_path().display(),
        item.destination_path().display()
    )?;
    let code = encoder.encode(item.source_path(), session.temp_output_path(), log)?;
    if code != Some(0) {
        return Ok(ConversionOutcome::Failure(code));
    }
    fs::rename(session.temp_output_path(), item.destination_path())?;
    Ok(ConversionOutcome::Success)
}
