use std::process;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;

pub fn print_usage() {
    println!("Usage: psh [-hvp]");
    println!("   -h   Print this help message");
    println!("   -v   Enable verbose logging");
    println!("   -p   Do not print a command prompt");
    process::exit(1);
}

/// A bounded retry policy for syscalls that fail transiently.
///
/// Errnos listed in `terminal` stop the retry loop immediately; everything
/// else is retried up to `max_attempts` times with `delay` between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    pub terminal: &'static [Errno],
}

impl RetryPolicy {
    pub fn run<F>(&self, op: F) -> nix::Result<()>
    where
        F: FnMut() -> nix::Result<()>,
    {
        self.run_with_sleep(op, thread::sleep)
    }

    /// Same as `run`, but with an injectable sleep so the policy can be
    /// unit-tested without waiting on a real clock.
    pub fn run_with_sleep<F, S>(&self, mut op: F, mut sleep: S) -> nix::Result<()>
    where
        F: FnMut() -> nix::Result<()>,
        S: FnMut(Duration),
    {
        let mut last = Errno::UnknownErrno;
        for attempt in 0..self.max_attempts {
            match op() {
                Ok(()) => return Ok(()),
                Err(e) if self.terminal.contains(&e) => return Err(e),
                Err(e) => last = e,
            }
            if attempt + 1 < self.max_attempts {
                sleep(self.delay);
            }
        }
        Err(last)
    }

    pub fn is_terminal(&self, err: Errno) -> bool {
        self.terminal.contains(&err)
    }
}
