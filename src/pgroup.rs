use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::{self, Pid};
use tracing::{debug, warn};

use crate::shell::ShellContext;
use crate::utils::RetryPolicy;

/// setpgid races with the child setting its own group; these errnos mean the
/// child won (or is already gone) and the call should not be retried.
const SETPGID_BENIGN: &[Errno] = &[Errno::EACCES, Errno::EINVAL, Errno::EPERM, Errno::ESRCH];

const SETPGID_RETRY: RetryPolicy = RetryPolicy {
    max_attempts: 10,
    delay: Duration::from_millis(5),
    terminal: SETPGID_BENIGN,
};

/// Places `pid` into the process group `pgid` from the parent side. The
/// child makes the same call on itself after fork, so losing the race here
/// is expected; transient failures are retried briefly and nothing is ever
/// fatal to the pipeline.
pub fn try_setpgid(pid: Pid, pgid: Pid) {
    if pid.as_raw() <= 0 || pgid.as_raw() <= 0 {
        return;
    }
    match SETPGID_RETRY.run(|| unistd::setpgid(pid, pgid)) {
        Ok(()) => {}
        Err(e) if SETPGID_RETRY.is_terminal(e) => {
            debug!(%pid, %pgid, errno = %e, "setpgid race resolved by the child");
        }
        Err(e) => {
            warn!(%pid, %pgid, errno = %e, "setpgid kept failing");
        }
    }
}

/// Makes `pgid` the foreground process group on the controlling terminal.
/// Failure is logged and ignored: the shell itself may be running in the
/// background, where this is expected to fail.
pub fn give_terminal(ctx: &ShellContext, pgid: Pid) {
    if !ctx.interactive {
        return;
    }
    if let Err(e) = unistd::tcsetpgrp(ctx.tty_fd, pgid) {
        debug!(%pgid, errno = %e, "could not hand the terminal to the pipeline");
    }
}

/// Restores the shell's own process group as the terminal foreground group.
/// Called unconditionally once a pipeline finishes, stops, or fails.
pub fn reclaim_terminal(ctx: &ShellContext) {
    if !ctx.interactive {
        return;
    }
    if let Err(e) = unistd::tcsetpgrp(ctx.tty_fd, ctx.shell_pgid) {
        debug!(errno = %e, "could not reclaim the terminal");
    }
}
