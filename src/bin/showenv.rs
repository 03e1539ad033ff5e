/*
 * showenv.rs - prints the environment block this process received, sorted,
 * one NAME=VALUE per line. Handy for checking what the shell exports to
 * the programs it runs.
 *
 * usage: showenv [NAME...]
 * With arguments, prints only those names and exits 1 if any is missing.
 */

use std::env;
use std::process;

fn main() {
    let names: Vec<String> = env::args().skip(1).collect();

    if names.is_empty() {
        let mut entries: Vec<String> = env::vars().map(|(k, v)| format!("{}={}", k, v)).collect();
        entries.sort();
        for entry in entries {
            println!("{}", entry);
        }
        return;
    }

    let mut missing = false;
    for name in names {
        match env::var(&name) {
            Ok(value) => println!("{}={}", name, value),
            Err(_) => missing = true,
        }
    }
    if missing {
        process::exit(1);
    }
}
