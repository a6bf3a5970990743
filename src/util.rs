use crate::Result;
use filetime::{set_file_mtime, FileTime};
use std::{env, fs, path::Path, str::FromStr as _, sync::OnceLock, time::Duration};
use unicode_width::UnicodeWidthStr;

lazy_static::lazy_static! {
    pub static ref ENV: EnvVars = EnvVars::default();
}

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Gets the value of the provided environment variable name and converts it to a boolean value. A
/// environment variable's value is considered `true` if it's value is a positive, non-zero integer.
pub fn envvar_to_bool(varname: &str) -> bool {
    match env::var(varname) {
        Err(_) => false,
        Ok(v) => {
            if let Ok(n) = usize::from_str(&v) {
                n != 0
            } else {
                false
            }
        }
    }
}

/// Changes the last modified time of `target_file` to be the same as the last modified time of
/// `source_file`. Returns `false` if they already matched.
pub fn sync_mtimes<S, T>(source_file: S, target_file: T) -> Result<bool>
where
    S: AsRef<Path>,
    T: AsRef<Path>,
{
    let source_mtime = fs::metadata(source_file)?.modified()?;
    let target_mtime = fs::metadata(&target_file)?.modified()?;
    if source_mtime == target_mtime {
        return Ok(false);
    }
    let modified_time = FileTime::from_system_time(source_mtime);
    set_file_mtime(target_file, modified_time)?;
    Ok(true)
}

/// Truncates `s` so that it takes up at most `target_size` columns on a terminal.
pub fn safe_string_truncate(s: &str, target_size: usize) -> String {
    let mut s = String::from(s);
    let mut cur_width = s.width();
    while cur_width > target_size {
        if s.pop().is_none() {
            break;
        }
        cur_width = s.width();
    }
    s
}

/// Whole megabytes, rounded down.
pub fn megabytes(bytes: u64) -> u64 {
    bytes / BYTES_PER_MB
}

/// Size of the file at `path` in whole megabytes, or 0 if it can't be read.
pub fn file_megabytes<P: AsRef<Path>>(path: P) -> u64 {
    fs::metadata(path).map(|m| megabytes(m.len())).unwrap_or(0)
}

/// Formats a duration as `H:MM:SS`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

#[derive(Debug, Default)]
pub struct EnvVars {
    hide_progress_bars: OnceLock<bool>,
}

macro_rules! env_var_bool_getter {
    ($field:ident, $var_name:literal) => {
        pub fn $field(&self) -> bool {
            *self.$field.get_or_init(|| envvar_to_bool($var_name))
        }
    };
}

impl EnvVars {
    env_var_bool_getter! {hide_progress_bars, "HIDE_PROGRESS_BARS"}
}
