use nix::unistd;

use crate::parser::Command;
use crate::shell::ShellContext;

/// Commands run inside the shell's own process instead of a forked child.
pub fn is_builtin(name: &str) -> bool {
    matches!(name, "cd" | "exit" | "jobs" | "export" | "unset")
}

/// Dispatches a builtin for the single-command case. `cd` and `exit` are the
/// only builtins with pipeline-specific handling; the rest exist solely here.
pub fn run_builtin(ctx: &mut ShellContext, cmd: &Command) -> i32 {
    match cmd.argv[0].as_str() {
        "cd" => handle_cd(ctx, cmd),
        "exit" => handle_exit(ctx),
        "jobs" => handle_jobs(ctx),
        "export" => handle_export(ctx, cmd),
        "unset" => handle_unset(ctx, cmd),
        _ => unreachable!("dispatch is guarded by is_builtin"),
    }
}

/// Changes the shell's own working directory. With no argument, goes to
/// $HOME. Keeps PWD/OLDPWD in the variable table up to date.
pub fn handle_cd(ctx: &mut ShellContext, cmd: &Command) -> i32 {
    let target = match cmd.argv.get(1) {
        Some(dir) => dir.clone(),
        None => match ctx.vars.get("HOME") {
            Some(home) => home.to_string(),
            None => {
                eprintln!("{}: cd: HOME not set", ctx.name);
                return 1;
            }
        },
    };
    let previous = unistd::getcwd().ok();
    if let Err(e) = unistd::chdir(target.as_str()) {
        eprintln!("{}: cd: {}: {}", ctx.name, target, e);
        return 1;
    }
    if let Some(old) = previous.and_then(|p| p.to_str().map(String::from)) {
        let _ = ctx.vars.set("OLDPWD", &old, true);
    }
    if let Ok(now) = unistd::getcwd() {
        if let Some(now) = now.to_str() {
            let _ = ctx.vars.set("PWD", now, true);
        }
    }
    0
}

fn handle_exit(ctx: &mut ShellContext) -> i32 {
    ctx.running = false;
    0
}

fn handle_jobs(ctx: &ShellContext) -> i32 {
    for job in ctx.jobs.iter() {
        let state = match job.state {
            crate::jobs::JobState::Running => "Running",
            crate::jobs::JobState::Stopped => "Stopped",
            crate::jobs::JobState::Done(_) => "Done",
        };
        println!("[{}] ({}) {} {}", job.id, job.pgid, state, job.cmdline);
    }
    0
}

fn handle_export(ctx: &mut ShellContext, cmd: &Command) -> i32 {
    let mut status = 0;
    for arg in &cmd.argv[1..] {
        let result = match arg.split_once('=') {
            Some((name, value)) => ctx.vars.set(name, value, true),
            None => ctx.vars.export(arg),
        };
        if let Err(e) = result {
            eprintln!("{}: export: {}", ctx.name, e);
            status = 1;
        }
    }
    status
}

fn handle_unset(ctx: &mut ShellContext, cmd: &Command) -> i32 {
    let mut status = 0;
    for name in &cmd.argv[1..] {
        if let Err(e) = ctx.vars.unset(name) {
            eprintln!("{}: unset: {}", ctx.name, e);
            status = 1;
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testutil::lock_process;
    use nix::unistd::getcwd;

    fn command(argv: &[&str]) -> Command {
        Command {
            argv: argv.iter().map(|s| s.to_string()).collect(),
            ..Command::new()
        }
    }

    #[test]
    fn cd_changes_directory_and_tracks_pwd() {
        let _guard = lock_process();
        let mut ctx = ShellContext::for_tests();
        let original = getcwd().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().canonicalize().unwrap();

        let status = handle_cd(&mut ctx, &command(&["cd", target.to_str().unwrap()]));
        assert_eq!(status, 0);
        assert_eq!(getcwd().unwrap(), target);
        assert_eq!(ctx.vars.get("PWD"), target.to_str());
        assert_eq!(ctx.vars.get("OLDPWD"), original.to_str());

        // Re-entering the same directory is a no-op success.
        let status = handle_cd(&mut ctx, &command(&["cd", target.to_str().unwrap()]));
        assert_eq!(status, 0);
        assert_eq!(getcwd().unwrap(), target);

        unistd::chdir(&original).unwrap();
    }

    #[test]
    fn cd_to_missing_directory_fails_without_moving() {
        let _guard = lock_process();
        let mut ctx = ShellContext::for_tests();
        let original = getcwd().unwrap();
        let status = handle_cd(&mut ctx, &command(&["cd", "/no/such/dir/anywhere"]));
        assert_eq!(status, 1);
        assert_eq!(getcwd().unwrap(), original);
    }

    #[test]
    fn exit_clears_the_running_flag() {
        let mut ctx = ShellContext::for_tests();
        assert!(ctx.running);
        assert_eq!(run_builtin(&mut ctx, &command(&["exit"])), 0);
        assert!(!ctx.running);
    }

    #[test]
    fn export_and_unset_round_trip() {
        let mut ctx = ShellContext::for_tests();
        assert_eq!(run_builtin(&mut ctx, &command(&["export", "A=1", "B"])), 0);
        assert_eq!(ctx.vars.get("A"), Some("1"));
        assert_eq!(run_builtin(&mut ctx, &command(&["unset", "A"])), 0);
        assert_eq!(ctx.vars.get("A"), None);
    }
}
