use std::{env, io::Write, path::PathBuf};

use chrono::Utc;
use env_logger::Builder;
use log::LevelFilter;

use crate::HOME;

/// Sets up env_logger for whatever embeds the engine. Under systemd the
/// journal already stamps and tags every line, so the format shrinks to
/// the level and the message.
pub fn init_logger(debug: bool, systemd: bool) {
    let mut builder = Builder::new();

    if systemd {
        builder.format(|formatter, record| {
            writeln!(formatter, "[{}]: {}", record.level(), record.args())
        });
    } else {
        builder.format(|formatter, record| {
            writeln!(
                formatter,
                "{} [{}] ({}): {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S %z"),
                record.level(),
                record.target(),
                record.args()
            )
        });
    }

    if let Ok(var) = env::var("RUST_LOG") {
        builder.parse_filters(&var);
    } else if debug {
        builder.filter(None, LevelFilter::Debug);
    } else {
        builder.filter(None, LevelFilter::Info);
    }

    builder.init();
}

/// The default data folder for snapshots and the archive.
///
/// # Errors
///
/// If the platform has no local data directory.
pub fn data_folder() -> anyhow::Result<PathBuf> {
    let Some(dir) = dirs::data_local_dir() else {
        return Err(anyhow::Error::msg("no local data directory available"));
    };

    Ok(dir.join(HOME))
}
