use clap::Parser;
use foldersort::cli::{Cli, run_cli_interruptible};
use foldersort::logging::init_logging;
use foldersort::output::OutputFormatter;
use foldersort::progress::CancelToken;
use std::process;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        OutputFormatter::warning(&format!("Logging unavailable: {e}"));
    }

    let interrupt = CancelToken::new();
    let on_interrupt = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || on_interrupt.cancel()) {
        OutputFormatter::warning(&format!("Ctrl-C will not stop the run cleanly: {e}"));
    }

    let command = cli.organize_command();
    let config = cli.config.as_deref();
    if let Err(e) = run_cli_interruptible(command, &cli.directory, config, &interrupt) {
        OutputFormatter::error(&format!("{e:#}"));
        process::exit(1);
    }
}
