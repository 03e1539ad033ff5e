use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use nix::unistd::{self, Pid};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

use crate::jobs::JobTable;
use crate::parser;
use crate::pipeline;
use crate::signals;
use crate::vars::VarTable;

/// Everything the shell carries between commands: terminal ownership, the
/// process groups involved in job control, variables, and the job table.
/// Created once at startup and passed explicitly to whatever needs it.
pub struct ShellContext {
    pub name: String,
    /// Cleared by the `exit` builtin to end the main loop.
    pub running: bool,
    pub last_status: i32,
    /// The controlling terminal, when there is one.
    pub tty_fd: RawFd,
    pub interactive: bool,
    /// The shell's own process group, which reclaims the terminal after
    /// every foreground pipeline.
    pub shell_pgid: Pid,
    /// Group of the most recently finished or stopped pipeline.
    pub last_pgid: Option<Pid>,
    /// Group of the pipeline currently executing, if any.
    pub pipeline_pgid: Option<Pid>,
    pub vars: VarTable,
    pub jobs: JobTable,
}

impl ShellContext {
    pub fn new() -> Self {
        let tty_fd = libc::STDIN_FILENO;
        let interactive = unistd::isatty(tty_fd).unwrap_or(false);
        ShellContext {
            name: "psh".to_string(),
            running: true,
            last_status: 0,
            tty_fd,
            interactive,
            shell_pgid: unistd::getpgrp(),
            last_pgid: None,
            pipeline_pgid: None,
            vars: VarTable::from_process_env(),
            jobs: JobTable::new(),
        }
    }

    /// Moves an interactive shell into its own process group and makes that
    /// group the terminal's foreground group, so there is a stable owner to
    /// hand the terminal back to after every job.
    pub fn setup_job_control(&mut self) {
        if !self.interactive {
            return;
        }
        let pid = unistd::getpid();
        if let Err(e) = unistd::setpgid(pid, pid) {
            debug!(errno = %e, "could not move the shell into its own group");
        }
        self.shell_pgid = unistd::getpgrp();
        if let Err(e) = unistd::tcsetpgrp(self.tty_fd, self.shell_pgid) {
            debug!(errno = %e, "could not take the terminal");
        }
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        let mut ctx = ShellContext::new();
        // Tests must never touch the real terminal's foreground group.
        ctx.interactive = false;
        ctx
    }
}

impl Default for ShellContext {
    fn default() -> Self {
        ShellContext::new()
    }
}

/// The interactive read/eval loop: prompt, read a line, expand variables,
/// parse, collect heredoc bodies, run the pipeline, remember the status.
pub fn run_shell(emit_prompt: bool) -> i32 {
    let mut ctx = ShellContext::new();
    ctx.setup_job_control();
    let sigchld = signals::install_sigchld_flag();

    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}: cannot initialize line editing: {}", ctx.name, e);
            return 1;
        }
    };
    let history = history_path();
    if let Some(path) = &history {
        let _ = editor.load_history(path);
    }

    while ctx.running {
        if sigchld.swap(false, Ordering::SeqCst) {
            for job in ctx.jobs.reap_finished() {
                println!("[{}] Done {}", job.id, job.cmdline);
            }
        }

        let prompt = if emit_prompt {
            prompt_of(&ctx)
        } else {
            String::new()
        };
        match editor.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                ctx.last_status = eval_line(&mut ctx, &mut editor, line);
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}: read error: {}", ctx.name, e);
                break;
            }
        }
    }

    if let Some(path) = &history {
        let _ = editor.save_history(path);
    }
    ctx.last_status
}

fn eval_line(ctx: &mut ShellContext, editor: &mut DefaultEditor, line: &str) -> i32 {
    let expanded = ctx.vars.expand_line(line, ctx.last_status);
    let mut parsed = match parser::parse_command_line(&expanded) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}: {}", ctx.name, e);
            return 2;
        }
    };
    for pending in &parsed.heredocs {
        match read_heredoc_body(editor, &pending.delimiter) {
            Ok(body) => parsed.commands[pending.command].heredoc = Some(body),
            Err(e) => {
                eprintln!("{}: {}", ctx.name, e);
                return 2;
            }
        }
    }
    if parsed.commands.is_empty() {
        return ctx.last_status;
    }
    pipeline::run_pipeline(ctx, &parsed.commands)
}

/// Reads heredoc body lines until the delimiter (or end of input).
fn read_heredoc_body(
    editor: &mut DefaultEditor,
    delimiter: &str,
) -> Result<String, ReadlineError> {
    let mut body = String::new();
    loop {
        match editor.readline("> ") {
            Ok(line) => {
                if line == delimiter {
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(body)
}

fn prompt_of(ctx: &ShellContext) -> String {
    let cwd = unistd::getcwd()
        .ok()
        .and_then(|p| p.to_str().map(String::from))
        .unwrap_or_else(|| "?".to_string());
    format!("{} {}> ", ctx.name, cwd)
}

fn history_path() -> Option<PathBuf> {
    dirs_next::home_dir().map(|home| home.join(".psh_history"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_is_running_with_clean_status() {
        let ctx = ShellContext::for_tests();
        assert!(ctx.running);
        assert_eq!(ctx.last_status, 0);
        assert!(ctx.last_pgid.is_none());
        assert!(ctx.pipeline_pgid.is_none());
        assert!(ctx.jobs.is_empty());
    }

    #[test]
    fn prompt_shows_the_shell_name_and_directory() {
        let ctx = ShellContext::for_tests();
        let prompt = prompt_of(&ctx);
        assert!(prompt.starts_with("psh "));
        assert!(prompt.ends_with("> "));
    }

    #[test]
    fn history_lives_under_the_home_directory() {
        if let Some(path) = history_path() {
            assert!(path.ends_with(".psh_history"));
        }
    }
}
