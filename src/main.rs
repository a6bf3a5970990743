use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use transcode_tree::{
    encoder::Ffmpeg, process, settings::Settings, sink::ConsoleSink, util::ENV, Error, Result,
};

#[cfg(all(debug_assertions, feature = "pretty-errors"))]
fn _init_pretty_errors() -> Result<()> {
    if let Err(std::env::VarError::NotPresent) = std::env::var("RUST_BACKTRACE") {
        color_backtrace::BacktracePrinter::new()
            .verbosity(color_backtrace::Verbosity::Full)
            .install(color_backtrace::default_output_stream())
    } else {
        color_backtrace::install();
    }
    color_eyre::install()?;
    Ok(())
}

#[cfg(all(not(debug_assertions), feature = "pretty-errors"))]
fn _init_pretty_errors() -> Result<()> {
    color_backtrace::install();
    color_eyre::install()?;
    Ok(())
}

#[cfg(not(feature = "pretty-errors"))]
fn _init_pretty_errors() -> Result<()> {
    Ok(())
}

fn init() -> Result<()> {
    dotenv::dotenv().ok();
    _init_pretty_errors()?;
    Ok(())
}

fn init_logger(settings: &Settings, mp: &MultiProgress) -> Result<()> {
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        String::from(if settings.verbose() {
            "transcode_tree=debug"
        } else {
            "transcode_tree=info"
        })
    });
    let logger = pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .build();
    let level = logger.filter();
    LogWrapper::new(mp.clone(), logger).try_init()?;
    log::set_max_level(level);
    Ok(())
}

fn console(mp: &MultiProgress) -> ConsoleSink {
    if ENV.hide_progress_bars() {
        return ConsoleSink::stdout();
    }
    let pbar = mp.add(ProgressBar::new(0));
    if pbar.is_hidden() {
        mp.remove(&pbar);
        ConsoleSink::stdout()
    } else {
        ConsoleSink::with_progress(pbar)
    }
}

fn run(settings: &Settings) -> Result<()> {
    if settings.print_config() {
        print!("{}", serde_yaml::to_string(settings)?);
        return Ok(());
    }
    let mp = MultiProgress::new();
    init_logger(settings, &mp)?;
    log::debug!("Settings: {:#?}", settings);
    let encoder = Ffmpeg::new(settings.encoder(), settings.profile());
    let sink = console(&mp);
    process::run(settings, &encoder, &sink)?;
    Ok(())
}

fn main() -> Result<()> {
    init()?;
    match Settings::load() {
        Ok(settings) => run(&settings),
        Err(Error::Clap { source }) => source.exit(),
        Err(error) => Err(error),
    }
}
