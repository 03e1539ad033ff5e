use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use nix::sys::signal::{signal, SigHandler, Signal};

/// Shields the shell process itself from terminal-generated signals: Ctrl-C
/// and Ctrl-Z must reach the foreground job, never kill or suspend the
/// shell, and writing to the terminal from a background shell must not stop
/// it. Installed once at startup, before the first prompt.
pub fn setup_shell_signals() {
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGTTOU,
        Signal::SIGTTIN,
    ] {
        unsafe {
            let _ = signal(sig, SigHandler::SigIgn);
        }
    }
}

/// Restores default dispositions in a forked child, between fork and exec,
/// so the executed program reacts to Ctrl-C and Ctrl-Z the ordinary way.
pub fn setup_child_signals() {
    for sig in [
        Signal::SIGINT,
        Signal::SIGQUIT,
        Signal::SIGTSTP,
        Signal::SIGTTOU,
        Signal::SIGTTIN,
    ] {
        unsafe {
            let _ = signal(sig, SigHandler::SigDfl);
        }
    }
}

/// Registers a flag that flips whenever a child changes state. The prompt
/// loop polls it to decide when to sweep the job table for finished
/// background jobs; nothing is reaped from signal context.
pub fn install_sigchld_flag() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGCHLD, Arc::clone(&flag))
        .expect("unable to register SIGCHLD notification");
    flag
}
