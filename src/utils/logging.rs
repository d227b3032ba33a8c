use log::LevelFilter;

///
/// Installs `env_logger` with `log_level` as the default. `RUST_LOG` still takes precedence.
///
/// Calling it more than once is harmless, later calls are ignored.
///
pub fn init_logging(log_level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}
