use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::Level;

use wsl_distro_builder::firstboot::layout::HostLayout;
use wsl_distro_builder::firstboot::prompt::GumPrompter;
use wsl_distro_builder::firstboot::{run_firstboot, FirstbootContext, FirstbootOutcome};
use wsl_distro_builder::preflight;
use wsl_distro_builder::process::SystemRunner;
use wsl_distro_builder::telemetry;

/// Create the first user of a freshly imported WSL distribution.
#[derive(Debug, Parser)]
#[command(name = "firstboot", version)]
struct Args {
    /// Provisioning config as inline JSON; prompts interactively otherwise.
    #[arg(long)]
    config: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init_tracing(false, Level::WARN);

    match run(&args) {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<FirstbootOutcome> {
    preflight::require_root()?;
    preflight::check_firstboot_tools()?;

    let runner = SystemRunner;
    let prompter = GumPrompter::new(&runner);
    let ctx = FirstbootContext {
        runner: &runner,
        prompter: &prompter,
        layout: HostLayout::system(),
        distro_name: std::env::var("WSL_DISTRO_NAME").ok(),
    };
    run_firstboot(&ctx, args.config.as_deref(), std::io::stdout())
}
