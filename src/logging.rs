// comfy-package-installer/src/logging.rs

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::error::{InstallerError, Result};

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} - {h({l})} - {m}{n}";

/// Initialises log4rs. A YAML config file takes precedence; otherwise logs go
/// to stderr so stdout stays free for usage text and the launch command.
pub fn init_logging(config_file: Option<&Path>, verbose: bool) -> Result<()> {
    if let Some(path) = config_file {
        return log4rs::init_file(path, Default::default())
            .map_err(|e| InstallerError::Logging(format!("{}: {}", path.display(), e)));
    }

    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| InstallerError::Logging(e.to_string()))?;

    log4rs::init_config(config)
        .map(|_handle| ())
        .map_err(|e| InstallerError::Logging(e.to_string()))
}
