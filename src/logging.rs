use std::io::Write;

use env_logger::{Env, WriteStyle};

/// `[TRACK | LEVEL] message`, `info` unless RUST_LOG says otherwise.
pub fn try_init() -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[TRACK | {}] {}", record.level(), record.args()))
        .write_style(WriteStyle::Auto)
        .try_init()
}
