mod builtins;
mod exec;
mod jobs;
mod parser;
mod path;
mod pgroup;
mod pipeline;
mod pipes;
mod redirect;
mod shell;
mod signals;
mod utils;
mod vars;

use std::env;
use std::process;

use tracing_subscriber::EnvFilter;

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut emit_prompt = true;
    let mut verbose = false;
    for arg in &args[1..] {
        match arg.as_str() {
            "-h" => utils::print_usage(),
            "-v" => verbose = true,
            "-p" => emit_prompt = false,
            _ => {}
        }
    }

    let default_filter = if verbose { "psh=debug" } else { "psh=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // The shell must survive Ctrl-C and Ctrl-Z; only its children react.
    signals::setup_shell_signals();

    process::exit(shell::run_shell(emit_prompt));
}
