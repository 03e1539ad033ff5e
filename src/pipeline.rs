use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, fork, ForkResult, Pid};
use tracing::{debug, warn};

use crate::builtins;
use crate::exec;
use crate::jobs::JobState;
use crate::parser::Command;
use crate::pgroup;
use crate::pipes::PipeSet;
use crate::shell::ShellContext;
use crate::signals;

/// Runs one parsed pipeline to completion and returns its exit code, shell
/// style: 0–125 from the program, 126 found-but-not-runnable, 127 not
/// found, 128+N for death or suspension by signal N.
///
/// This is the single entry point the read/eval loop calls. Commands are
/// borrowed; every pipe fd and the pipeline-pgid field are released on
/// every return path.
pub fn run_pipeline(ctx: &mut ShellContext, cmds: &[Command]) -> i32 {
    let code = match cmds.len() {
        0 => 0,
        1 => run_single(ctx, &cmds[0]),
        _ => run_many(ctx, cmds),
    };
    ctx.last_status = code;
    code
}

/// Translates a wait report into an exit code, if it carries one.
fn exit_status_of(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, sig, _) => Some(128 + sig as i32),
        WaitStatus::Stopped(_, sig) => Some(128 + sig as i32),
        _ => None,
    }
}

fn cmdline_of(cmds: &[Command]) -> String {
    cmds.iter()
        .map(|c| c.argv.join(" "))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// The one-command fast path: no pipes, and builtins run without forking.
fn run_single(ctx: &mut ShellContext, cmd: &Command) -> i32 {
    if cmd.argv.is_empty() {
        return 0;
    }
    if builtins::is_builtin(&cmd.argv[0]) {
        return builtins::run_builtin(ctx, cmd);
    }

    let child = match unsafe { fork() } {
        Err(e) => {
            eprintln!("{}: fork: {}", ctx.name, e);
            return 1;
        }
        Ok(ForkResult::Child) => {
            // Own group first, then default signal handling, then exec.
            let _ = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0));
            signals::setup_child_signals();
            exec::exec_command(ctx, cmd)
        }
        Ok(ForkResult::Parent { child }) => child,
    };

    ctx.pipeline_pgid = Some(child);
    pgroup::try_setpgid(child, child);

    if cmd.background {
        let id = ctx
            .jobs
            .add(child, vec![child], cmdline_of(std::slice::from_ref(cmd)), JobState::Running);
        println!("[{}] {}", id, child);
        ctx.pipeline_pgid = None;
        return 0;
    }

    pgroup::give_terminal(ctx, child);

    let mut code = None;
    loop {
        match waitpid(Pid::from_raw(-child.as_raw()), Some(WaitPidFlag::WUNTRACED)) {
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!(errno = %e, "waitpid failed");
                break;
            }
            Ok(status @ WaitStatus::Stopped(pid, _)) => {
                // Suspended: hand the job back to the shell for later.
                ctx.last_pgid = Some(child);
                let id = ctx.jobs.add(
                    child,
                    vec![pid],
                    cmdline_of(std::slice::from_ref(cmd)),
                    JobState::Stopped,
                );
                println!("[{}] Stopped {}", id, cmd.argv.join(" "));
                code = exit_status_of(status);
                break;
            }
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                code = exit_status_of(status);
                break;
            }
            Ok(_) => continue,
        }
    }

    pgroup::reclaim_terminal(ctx);
    ctx.pipeline_pgid = None;
    code.unwrap_or(1)
}

/// Child-side setup for stage `idx` of an `n`-stage pipeline: join the
/// pipeline's process group, splice stdin/stdout onto the neighboring
/// pipes, drop every pipe fd, restore default signals, exec.
fn setup_pipeline_child(
    ctx: &ShellContext,
    idx: usize,
    n: usize,
    pipes: &mut PipeSet,
    cmd: &Command,
    leader: Option<Pid>,
) -> ! {
    match leader {
        // First child defines the group; losing the parent's matching call
        // is the tolerated race.
        None => {
            let _ = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0));
        }
        Some(pgid) => {
            let _ = unistd::setpgid(Pid::from_raw(0), pgid);
        }
    }

    if idx > 0 {
        if let Err(e) = unistd::dup2(pipes.read_end(idx - 1), libc::STDIN_FILENO) {
            eprintln!("{}: dup2 stdin: {}", ctx.name, e);
            unsafe { libc::_exit(127) }
        }
    }
    if idx < n - 1 {
        if let Err(e) = unistd::dup2(pipes.write_end(idx), libc::STDOUT_FILENO) {
            eprintln!("{}: dup2 stdout: {}", ctx.name, e);
            unsafe { libc::_exit(127) }
        }
    }
    // The duplicated ends survive; every original pipe fd goes away, used
    // or not, so no stage holds a write end open against a sibling.
    pipes.close_all();

    signals::setup_child_signals();
    exec::exec_command(ctx, cmd)
}

/// Fork failed partway through the pipeline: terminate whatever part of the
/// process group already exists and reap it, so no half-built pipeline
/// lingers as zombies.
fn abort_partial_pipeline(pgid: Option<Pid>, pids: &[Option<Pid>]) {
    let Some(pgid) = pgid else { return };
    let _ = kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGTERM);
    for pid in pids.iter().flatten() {
        loop {
            match waitpid(*pid, None) {
                Err(Errno::EINTR) => continue,
                _ => break,
            }
        }
    }
}

/// The general N-stage case: one fork per external command, all stages in
/// one process group, stdout of stage i feeding stdin of stage i+1.
fn run_many(ctx: &mut ShellContext, cmds: &[Command]) -> i32 {
    let n = cmds.len();
    let background = cmds.last().map_or(false, |c| c.background);

    let mut pipes = match PipeSet::create(n) {
        Ok(pipes) => pipes,
        Err(e) => {
            eprintln!("{}: pipe: {}", ctx.name, e);
            return 1;
        }
    };
    let mut pids: Vec<Option<Pid>> = vec![None; n];
    let mut pgid: Option<Pid> = None;
    let mut builtin_status = 0;

    for (i, cmd) in cmds.iter().enumerate() {
        if cmd.argv.is_empty() {
            debug!(stage = i, "skipping empty pipeline stage");
            continue;
        }
        match cmd.argv[0].as_str() {
            // cd affects the shell's own directory, so it cannot be forked;
            // it runs here and the stage produces no process.
            "cd" => {
                builtin_status = builtins::handle_cd(ctx, cmd);
                pgroup::reclaim_terminal(ctx);
                ctx.pipeline_pgid = None;
                continue;
            }
            "exit" => {
                eprintln!("{}: exit: cannot be used in a pipeline", ctx.name);
                builtin_status = 1;
                continue;
            }
            _ => {}
        }

        match unsafe { fork() } {
            Err(e) => {
                eprintln!("{}: fork: {}", ctx.name, e);
                abort_partial_pipeline(pgid, &pids);
                pipes.close_all();
                ctx.pipeline_pgid = None;
                return 1;
            }
            Ok(ForkResult::Child) => setup_pipeline_child(ctx, i, n, &mut pipes, cmd, pgid),
            Ok(ForkResult::Parent { child }) => {
                pids[i] = Some(child);
                match pgid {
                    None => {
                        pgid = Some(child);
                        ctx.pipeline_pgid = Some(child);
                        pgroup::try_setpgid(child, child);
                        if !background {
                            pgroup::give_terminal(ctx, child);
                        }
                    }
                    Some(pgid) => pgroup::try_setpgid(child, pgid),
                }
            }
        }
    }

    // The children hold their own duplicated ends now; the parent's copies
    // only exist to guarantee every stage could splice before any close.
    pipes.close_all();

    let Some(pgid) = pgid else {
        // Every stage was a builtin or empty; nothing was forked.
        pgroup::reclaim_terminal(ctx);
        ctx.pipeline_pgid = None;
        return builtin_status;
    };

    let forked: Vec<Pid> = pids.iter().flatten().copied().collect();
    let final_pid = *forked.last().expect("pgid implies at least one fork");

    if background {
        let id = ctx
            .jobs
            .add(pgid, forked, cmdline_of(cmds), JobState::Running);
        println!("[{}] {}", id, pgid);
        ctx.pipeline_pgid = None;
        return 0;
    }

    let mut live = forked.len();
    let mut final_status: Option<i32> = None;
    let mut last_status = builtin_status;
    let mut stopped: Option<i32> = None;

    while live > 0 {
        match waitpid(Pid::from_raw(-pgid.as_raw()), Some(WaitPidFlag::WUNTRACED)) {
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!(errno = %e, "waitpid failed mid-pipeline");
                break;
            }
            Ok(status @ WaitStatus::Stopped(..)) => {
                // One stopped stage suspends the whole job; stop waiting on
                // the rest and let the shell take the terminal back.
                ctx.last_pgid = Some(pgid);
                let id = ctx
                    .jobs
                    .add(pgid, forked.clone(), cmdline_of(cmds), JobState::Stopped);
                println!("[{}] Stopped {}", id, cmdline_of(cmds));
                stopped = exit_status_of(status);
                break;
            }
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                live -= 1;
                let pid = status.pid();
                if let Some(code) = exit_status_of(status) {
                    last_status = code;
                    if pid == Some(final_pid) {
                        final_status = Some(code);
                    }
                }
            }
            Ok(_) => continue,
        }
    }

    pgroup::reclaim_terminal(ctx);
    ctx.pipeline_pgid = None;

    if let Some(code) = stopped {
        return code;
    }

    ctx.last_pgid = Some(pgid);

    // The pipeline's code is the last stage's. If its report was somehow
    // consumed out of order, try one non-blocking reap before settling for
    // the last status seen.
    final_status.unwrap_or_else(|| {
        match waitpid(final_pid, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
            Ok(status) => exit_status_of(status).unwrap_or(last_status),
            Err(_) => last_status,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_command_line;
    use crate::utils::testutil::lock_process;
    use nix::unistd::getcwd;
    use std::fs;

    fn ctx() -> ShellContext {
        ShellContext::for_tests()
    }

    fn commands(line: &str) -> Vec<Command> {
        parse_command_line(line).unwrap().commands
    }

    fn raw_command(argv: &[&str]) -> Command {
        Command {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            ..Command::new()
        }
    }

    fn open_fd_count() -> usize {
        fs::read_dir("/proc/self/fd").unwrap().count()
    }

    #[test]
    fn empty_command_is_a_noop() {
        let _guard = lock_process();
        let mut ctx = ctx();
        assert_eq!(run_pipeline(&mut ctx, &[Command::new()]), 0);
        assert!(ctx.pipeline_pgid.is_none());
    }

    #[test]
    fn exit_code_is_the_last_stages_status() {
        let _guard = lock_process();
        let mut ctx = ctx();
        assert_eq!(run_pipeline(&mut ctx, &commands("true | true | false")), 1);
        assert_eq!(run_pipeline(&mut ctx, &commands("false | true")), 0);
    }

    #[test]
    fn unknown_command_exits_127() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let code = run_pipeline(&mut ctx, &[raw_command(&["psh-no-such-program-xyzzy"])]);
        assert_eq!(code, 127);
        assert!(ctx.pipeline_pgid.is_none());
    }

    #[test]
    fn directory_as_command_exits_126() {
        let _guard = lock_process();
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = ctx();
        let code = run_pipeline(&mut ctx, &[raw_command(&[dir.path().to_str().unwrap()])]);
        assert_eq!(code, 126);
    }

    #[test]
    fn death_by_signal_maps_to_128_plus_signo() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let code = run_pipeline(&mut ctx, &[raw_command(&["sh", "-c", "kill -KILL $$"])]);
        assert_eq!(code, 128 + libc::SIGKILL);
    }

    #[test]
    fn self_stopping_command_reports_stop_and_records_the_group() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let code = run_pipeline(&mut ctx, &[raw_command(&["sh", "-c", "kill -STOP $$"])]);
        assert_eq!(code, 128 + libc::SIGSTOP);
        let pgid = ctx.last_pgid.expect("stopped job records its group");
        assert!(ctx.pipeline_pgid.is_none());
        assert!(!ctx.jobs.is_empty());

        // Clean up the suspended child.
        let _ = kill(Pid::from_raw(-pgid.as_raw()), Signal::SIGKILL);
        loop {
            match waitpid(Pid::from_raw(-pgid.as_raw()), None) {
                Err(Errno::EINTR) => continue,
                Err(_) => break,
                Ok(_) => continue,
            }
        }
    }

    #[test]
    fn no_fds_leak_across_a_pipeline_run() {
        let _guard = lock_process();
        let mut ctx = ctx();
        // Warm up lazily-created descriptors before measuring.
        run_pipeline(&mut ctx, &commands("true | true"));
        let before = open_fd_count();
        run_pipeline(&mut ctx, &commands("true | true | true | false"));
        run_pipeline(&mut ctx, &[raw_command(&["psh-no-such-program-xyzzy"])]);
        assert_eq!(open_fd_count(), before);
    }

    #[test]
    fn sole_cd_changes_directory_without_forking() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let original = getcwd().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().canonicalize().unwrap();

        let line = format!("cd {}", target.display());
        assert_eq!(run_pipeline(&mut ctx, &commands(&line)), 0);
        assert_eq!(getcwd().unwrap(), target);
        // Same target again composes to the same place.
        assert_eq!(run_pipeline(&mut ctx, &commands(&line)), 0);
        assert_eq!(getcwd().unwrap(), target);

        unistd::chdir(&original).unwrap();
    }

    #[test]
    fn cd_inside_a_pipeline_runs_in_process() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let original = getcwd().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().canonicalize().unwrap();

        let line = format!("cd {} | false", target.display());
        let code = run_pipeline(&mut ctx, &commands(&line));
        // The shell itself moved, and the surviving stage decides the code.
        assert_eq!(getcwd().unwrap(), target);
        assert_eq!(code, 1);

        let line = format!("cd {} | true", original.display());
        assert_eq!(run_pipeline(&mut ctx, &commands(&line)), 0);
        assert_eq!(getcwd().unwrap(), original.canonicalize().unwrap());
    }

    #[test]
    fn exit_mid_pipeline_is_rejected_and_the_shell_survives() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let code = run_pipeline(&mut ctx, &commands("exit | true"));
        assert!(ctx.running);
        assert_eq!(code, 0);
    }

    #[test]
    fn sole_exit_shuts_the_shell_down() {
        let _guard = lock_process();
        let mut ctx = ctx();
        assert_eq!(run_pipeline(&mut ctx, &commands("exit")), 0);
        assert!(!ctx.running);
    }

    #[test]
    fn output_redirection_reaches_the_file() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.txt");
        let line = format!("sh -c 'echo hi' > {}", out.display());
        assert_eq!(run_pipeline(&mut ctx, &commands(&line)), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "hi\n");
    }

    #[test]
    fn heredoc_feeds_the_first_stage() {
        let _guard = lock_process();
        let mut ctx = ctx();
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("copy.txt");
        let mut cat = raw_command(&["cat"]);
        cat.heredoc = Some("from the heredoc\n".into());
        cat.output_file = Some(out.display().to_string());
        assert_eq!(run_pipeline(&mut ctx, &[cat]), 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "from the heredoc\n");
    }

    #[test]
    fn pipeline_records_its_group_for_job_control() {
        let _guard = lock_process();
        let mut ctx = ctx();
        run_pipeline(&mut ctx, &commands("true | true"));
        assert!(ctx.last_pgid.is_some());
        assert!(ctx.pipeline_pgid.is_none());
    }

    #[test]
    fn wait_reports_translate_to_shell_codes() {
        let pid = Pid::from_raw(1);
        assert_eq!(exit_status_of(WaitStatus::Exited(pid, 3)), Some(3));
        assert_eq!(
            exit_status_of(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            Some(128 + libc::SIGKILL)
        );
        assert_eq!(
            exit_status_of(WaitStatus::Stopped(pid, Signal::SIGTSTP)),
            Some(128 + libc::SIGTSTP)
        );
        assert_eq!(exit_status_of(WaitStatus::StillAlive), None);
    }
}
