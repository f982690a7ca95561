// comfy-package-installer/src/main.rs

use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;
use log::error;

use comfy_package_installer::cli::Cli;
use comfy_package_installer::logging::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and count as success; every usage error exits 1.
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            };
            let _ = e.print();
            return code;
        }
    };

    if let Err(e) = init_logging(cli.log_config.as_deref(), cli.verbose) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match comfy_package_installer::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
