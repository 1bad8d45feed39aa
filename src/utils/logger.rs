// Process logger: JSON lines on stdout through env_logger
use std::io::Write;

use env_logger::{Builder, Target};
use log::LevelFilter;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Map a configured level name onto a filter, falling back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse::<LevelFilter>().unwrap_or(LevelFilter::Info)
}

/// Render one record as a single JSON line.
pub fn format_line(time: &str, level: log::Level, target: &str, msg: &str) -> String {
    serde_json::json!({
        "time": time,
        "level": level.as_str().to_lowercase(),
        "target": target,
        "msg": msg,
    })
    .to_string()
}

/// Install the global logger. `RUST_LOG`, when set, overrides `level`.
/// Calling this twice is harmless; the second call is ignored.
pub fn init(level: &str) {
    let mut builder = Builder::new();
    builder
        .target(Target::Stdout)
        .filter_level(parse_level(level))
        .format(|buf, record| {
            let time = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
            let line = format_line(
                &time,
                record.level(),
                record.target(),
                &record.args().to_string(),
            );
            writeln!(buf, "{}", line)
        });

    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }

    let _ = builder.try_init();
}
