use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::unistd;
use thiserror::Error;

use crate::parser::Command;
use crate::path::{self, Resolution};
use crate::redirect::{self, RedirError};
use crate::shell::ShellContext;

/// Exit status for a command that could not be found anywhere.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit status for a command that was found but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Everything that can stop a child short of a successful exec. Each variant
/// knows its user-facing message and its shell-compatible exit status.
#[derive(Debug, Error)]
pub enum ExecFailure {
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("{0}: is a directory")]
    IsDirectory(String),
    #[error("{0}: Permission denied")]
    NotExecutable(String),
    #[error("{0}: Exec format error")]
    ExecFormat(String),
    #[error("{0}")]
    Redirect(#[from] RedirError),
    #[error("{0}: invalid argument")]
    Invalid(String),
    #[error("{name}: {errno}")]
    Os { name: String, errno: Errno },
}

impl ExecFailure {
    pub fn status(&self) -> i32 {
        match self {
            ExecFailure::NotFound(_) => EXIT_NOT_FOUND,
            ExecFailure::Redirect(_) => 1,
            _ => EXIT_NOT_EXECUTABLE,
        }
    }
}

/// Resolves, redirects, and execs one command in the current process image.
///
/// Runs only inside a forked child. On success the process image is
/// replaced and this function never returns; on failure it prints one
/// diagnostic line and terminates the process with the matching status, so
/// control can never fall back into the pipeline machinery.
pub fn exec_command(ctx: &ShellContext, cmd: &Command) -> ! {
    if cmd.argv.is_empty() {
        unsafe { libc::_exit(0) }
    }
    let failure = match try_exec(ctx, cmd) {
        Ok(never) => match never {},
        Err(failure) => failure,
    };
    eprintln!("{}: {}", ctx.name, failure);
    unsafe { libc::_exit(failure.status()) }
}

fn try_exec(ctx: &ShellContext, cmd: &Command) -> Result<Infallible, ExecFailure> {
    let name = &cmd.argv[0];

    // A name containing a slash is a path and bypasses the search.
    let resolved = if name.contains('/') {
        PathBuf::from(name)
    } else {
        match path::search(name, ctx.vars.get("PATH")) {
            Resolution::Found(p) => p,
            Resolution::NotFound => return Err(ExecFailure::NotFound(name.clone())),
            Resolution::FoundDirectory => return Err(ExecFailure::IsDirectory(name.clone())),
            Resolution::FoundNotExecutable => {
                return Err(ExecFailure::NotExecutable(name.clone()))
            }
        }
    };

    // The search result can go stale, and a literal path never went through
    // the search at all; check again before committing to exec. A path that
    // does not exist falls through so execve reports it as not found.
    if path::is_directory(&resolved) {
        return Err(ExecFailure::IsDirectory(name.clone()));
    }
    if path::is_regular(&resolved) && !path::is_executable(&resolved) {
        return Err(ExecFailure::NotExecutable(name.clone()));
    }

    let directives = redirect::extract_redirections(cmd);
    redirect::apply_redirections(&directives)?;

    let path_c = cstring_of_path(&resolved).ok_or_else(|| ExecFailure::Invalid(name.clone()))?;
    let mut argv_c = Vec::with_capacity(cmd.argv.len());
    for arg in &cmd.argv {
        argv_c.push(
            CString::new(arg.as_str()).map_err(|_| ExecFailure::Invalid(name.clone()))?,
        );
    }
    // The executed program sees the shell's exported variables, not this
    // process's inherited environment.
    let envp = ctx.vars.build_envp();

    match unistd::execve(&path_c, &argv_c, &envp) {
        Ok(never) => match never {},
        Err(errno) => Err(classify_exec_error(name, errno)),
    }
}

fn cstring_of_path(path: &Path) -> Option<CString> {
    CString::new(path.to_path_buf().into_os_string().into_vec()).ok()
}

/// Maps an errno from a failed execve to a shell-style diagnostic. The
/// not-found case reports the name the user typed, not the resolved path.
fn classify_exec_error(name: &str, errno: Errno) -> ExecFailure {
    match errno {
        Errno::ENOEXEC => ExecFailure::ExecFormat(name.to_string()),
        Errno::EACCES => ExecFailure::NotExecutable(name.to_string()),
        Errno::ENOENT => ExecFailure::NotFound(name.to_string()),
        errno => ExecFailure::Os {
            name: name.to_string(),
            errno,
        },
    }
}
