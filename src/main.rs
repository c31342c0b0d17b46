use std::process;

use storefront_cache::{
    application::{error::AppError, maintenance::MaintenanceService},
    config,
    infra::{error::InfraError, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

fn main() {
    if let Err(error) = run() {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %error, chain = ?report.messages, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, chain = ?report.messages, "application error");
    });
}

fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging)?;

    let service = MaintenanceService::open(settings.cache.clone())?;

    match cli_args.command.unwrap_or(config::Command::Stats) {
        config::Command::Stats => {
            let stats = service.stats();
            println!("memory\t{}", stats.memory);
            println!("durable\t{}", stats.durable);
            println!("session\t{}", stats.session);
            println!("total\t{}", stats.total());
        }
        config::Command::Sweep => {
            let report = service.sweep();
            println!("scanned\t{}", report.scanned);
            println!("removed\t{}", report.removed);
        }
        config::Command::Clear(args) => {
            let removed = service.clear(args.backend);
            println!("removed\t{removed}");
        }
        config::Command::Get(args) => {
            let value = service.get(&args.key)?;
            let rendered = serde_json::to_string_pretty(&value)
                .map_err(|err| AppError::unexpected(err.to_string()))?;
            println!("{rendered}");
        }
        config::Command::BumpVersion(args) => {
            let dropped = service.bump_version(&args.version)?;
            println!("version\t{}", args.version.trim());
            println!("dropped\t{dropped}");
        }
    }

    Ok(())
}
