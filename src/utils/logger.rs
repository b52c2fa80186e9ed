use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

/// Terminal colours for run summaries.
pub struct Colors;

impl Colors {
    pub const SUCCEEDED: &'static str = "green";
    pub const FAILED: &'static str = "red";
    pub const SKIPPED: &'static str = "yellow";

    pub fn colorize(color: &str, text: &str) -> String {
        text.color(color).to_string()
    }
}

static RUN_START: OnceLock<Instant> = OnceLock::new();

fn level_tag(level: Level) -> Option<ColoredString> {
    match level {
        Level::Error => Some("ERROR".red().bold()),
        Level::Warn => Some("WARN".yellow()),
        Level::Debug => Some("debug".dimmed()),
        Level::Info | Level::Trace => None,
    }
}

/// Init env_logger: dependencies log warnings only, this crate logs at info (debug when
/// `verbose`). Lines carry the time since logging started; batch runs last hours.
/// `RUST_LOG` still overrides per module.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let start = *RUN_START.get_or_init(Instant::now);

    // try_init: library tests may call this more than once per process.
    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(move |buf, record| {
            let secs = start.elapsed().as_secs();
            let stamp = format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60);
            let name = env!("CARGO_PKG_NAME").cyan();
            match level_tag(record.level()) {
                Some(tag) if record.level() <= Level::Warn => writeln!(
                    buf,
                    "[{} {} {} {}] {}",
                    name,
                    stamp.dimmed(),
                    tag,
                    record.target().white(),
                    record.args()
                ),
                Some(tag) => writeln!(buf, "[{} {} {}] {}", name, stamp.dimmed(), tag, record.args()),
                None => writeln!(buf, "[{} {}] {}", name, stamp.dimmed(), record.args()),
            }
        })
        .try_init();
}
