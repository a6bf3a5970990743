use indicatif::ProgressStyle;

lazy_static::lazy_static! {
    pub (crate)static ref PROGRESS_BAR_STYLE: ProgressStyle = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:.cyan/blue} {pos}/{len} | {prefix}: {wide_msg}")
        .unwrap();
    pub (crate)static ref ERROR_PROGRESS_BAR_STYLE: ProgressStyle = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:.red/red} {pos}/{len} | {prefix}: {wide_msg}")
        .unwrap()
        .progress_chars("███");
}

/// Widest file name shown in the progress bar message.
pub(crate) const MESSAGE_WIDTH: usize = 60;
