//! Entry point for the `latchkey` binary.

use std::process::ExitCode;

use clap::Parser;
use latchkey_cli::{Cli, exit_code_for, run};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("latchkey: {:#}", e);
            exit_code_for(&e)
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
