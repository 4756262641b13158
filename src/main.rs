mod cli;
mod config;
mod database;
mod error;
mod migration;
mod model;
mod reports;
mod schema;
#[cfg(test)]
mod test_support;
mod utils;
mod weekly;

use cli::Cli;
use config::{Config, CONFIG};
use directories::ProjectDirs;
use error::MigrateError;
use flexi_logger::{Age, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

fn main() {
    let Some(project_dirs) = ProjectDirs::from("", "", "tpymigrate") else {
        eprintln!("Could not determine a data directory for tpymigrate");
        std::process::exit(1);
    };

    let config = Config::load_config(&project_dirs);
    let _ = CONFIG.set(config);

    // Logger must stay alive for the life of the process
    let _logger = match setup_logging(&project_dirs) {
        Ok(logger) => logger,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(1);
        }
    };

    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    if let Err(err) = Cli::handle_command_line() {
        error!("{:?}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn setup_logging(project_dirs: &ProjectDirs) -> Result<LoggerHandle, MigrateError> {
    let level = Config::get().logging.tpymigrate;
    let log_dir = project_dirs.data_local_dir().join("logs");

    let logger = Logger::try_with_str(format!("tpymigrate={}", level))?
        .log_to_file(FileSpec::default().directory(log_dir).basename("tpymigrate"))
        .duplicate_to_stderr(Duplicate::Warn)
        .rotate(
            Criterion::Age(Age::Day),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(7),
        )
        .start()?;

    Ok(logger)
}
