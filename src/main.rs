//! Cellgate CLI entry point
//!
//! main.rs only parses args and dispatches; subsystems are assembled by
//! the command layer. Exit is 0 on clean shutdown, nonzero on fatal
//! bootstrap failure.

use std::process;

use cellgate::cli::{run_command, Cli};

fn main() {
    let cli = Cli::parse_args();

    if let Err(e) = run_command(cli.command) {
        // Print error JSON and exit non-zero
        let error_json = serde_json::json!({
            "status": "error",
            "code": e.code_str(),
            "message": e.message()
        });

        eprintln!("{}", error_json);
        process::exit(1);
    }
}
