/*
 * stopme.rs - suspends its own process group, for exercising the shell's
 * stopped-job accounting
 *
 * usage: stopme [n]
 * Sleeps for [n] seconds (default 0) and sends SIGTSTP to its whole group.
 */

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::env;
use std::process;
use std::thread;
use std::time::Duration;

fn main() {
    let args: Vec<String> = env::args().collect();

    let secs = match args.get(1) {
        None => 0,
        Some(arg) => arg.parse::<u64>().unwrap_or_else(|_| {
            eprintln!("Usage: {} [n]", args[0]);
            process::exit(1);
        }),
    };

    for _ in 0..secs {
        thread::sleep(Duration::from_secs(1));
    }

    let own_group = Pid::from_raw(-(process::id() as i32));
    if let Err(err) = signal::kill(own_group, Signal::SIGTSTP) {
        eprintln!("kill (tstp) error: {}", err);
        process::exit(1);
    }
}
