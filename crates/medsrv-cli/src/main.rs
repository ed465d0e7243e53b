use std::process::ExitCode;

use clap::Parser;
use medsrv_cli::{Cli, CommandReport, SupervisorError};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // stdout is reserved for command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,medsrv_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    match medsrv_cli::run(cli).await {
        Ok(report) => {
            print_report(&report, json);
            if report.success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            print_error(&e, json);
            ExitCode::from(e.exit_code())
        }
    }
}

fn print_report(report: &CommandReport, json: bool) {
    if json {
        println!("{}", report.body);
    } else if report.success {
        println!("{}", report.message);
    } else {
        eprintln!("{}", report.message);
    }
}

fn print_error(error: &SupervisorError, json: bool) {
    if json {
        println!("{}", json!({ "success": false, "error": error.to_string() }));
    } else {
        eprintln!("error: {error}");
    }
}
