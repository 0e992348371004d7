use std::io::Write;

use env_logger::{Builder, Env};
use log::LevelFilter;

use crate::verbosity::Verbosity;

/// Initialize the logging system with the given verbosity level.
///
/// `RUST_LOG` takes precedence over the command line flags if it is set.
pub(crate) fn init_logging(verbose: &Verbosity) {
    let env = Env::default().filter_or("RUST_LOG", "warn");

    let mut builder = Builder::from_env(env);
    builder
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()));

    if std::env::var("RUST_LOG").is_err() {
        // Dependencies such as reqwest stay at warn; -v only opens up our own modules
        builder.filter_level(LevelFilter::Warn);
        let level_filter = verbose.log_level_filter();
        builder
            .filter_module("fetchgate", level_filter)
            .filter_module("fetchgate_lib", level_filter);
    }

    builder.init();
}
