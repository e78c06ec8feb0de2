use std::process;

use clap::Parser;
use eyaml_pkcs11_cli::{Cli, error::result::CliResult, logging::log_init};

fn main() {
    if let Some(err) = main_().err() {
        eprintln!("ERROR: {err}");
        process::exit(1);
    }
}

fn main_() -> CliResult<()> {
    let cli = Cli::parse();
    if !cli.quiet {
        log_init(cli.rust_log.as_deref());
    }
    cli.run()
}
