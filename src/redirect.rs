use std::fs::OpenOptions;
use std::os::unix::io::{IntoRawFd, RawFd};

use nix::unistd;
use thiserror::Error;

use crate::parser::Command;

/// One redirection directive, applied against the live fd table of a child
/// process immediately before exec. Derived on demand from a `Command`;
/// never persisted.
#[derive(Debug, PartialEq, Eq)]
pub enum Redirection {
    Input { target: RawFd, path: String },
    Output { target: RawFd, path: String },
    Append { target: RawFd, path: String },
    ErrorFile { target: RawFd, path: String },
    /// `1>&2`: stdout becomes a copy of stderr's destination.
    DupStdoutToStderr { target: RawFd, source: RawFd },
    /// `2>&1`: stderr becomes a copy of stdout's destination.
    DupStderrToStdout { target: RawFd, source: RawFd },
    Heredoc { target: RawFd, body: String },
    Cwd { path: String },
}

#[derive(Debug, Error)]
pub enum RedirError {
    #[error("{path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("cd: {path}: {source}")]
    Chdir { path: String, source: nix::Error },
    #[error("dup2: {0}")]
    Dup(nix::Error),
    #[error("heredoc: {0}")]
    Heredoc(nix::Error),
}

/// Collects a command's redirections in application order: input, output or
/// append, error file, fd duplications, heredoc, working-directory override.
pub fn extract_redirections(cmd: &Command) -> Vec<Redirection> {
    let mut list = Vec::new();
    if let Some(path) = &cmd.input_file {
        list.push(Redirection::Input {
            target: cmd.input_fd.unwrap_or(libc::STDIN_FILENO),
            path: path.clone(),
        });
    }
    if let Some(path) = &cmd.output_file {
        list.push(Redirection::Output {
            target: cmd.output_fd.unwrap_or(libc::STDOUT_FILENO),
            path: path.clone(),
        });
    }
    if let Some(path) = &cmd.append_file {
        list.push(Redirection::Append {
            target: cmd.output_fd.unwrap_or(libc::STDOUT_FILENO),
            path: path.clone(),
        });
    }
    if let Some(path) = &cmd.error_file {
        list.push(Redirection::ErrorFile {
            target: libc::STDERR_FILENO,
            path: path.clone(),
        });
    }
    if cmd.stdout_to_stderr {
        list.push(Redirection::DupStdoutToStderr {
            target: libc::STDOUT_FILENO,
            source: libc::STDERR_FILENO,
        });
    }
    if cmd.stderr_to_stdout {
        list.push(Redirection::DupStderrToStdout {
            target: libc::STDERR_FILENO,
            source: libc::STDOUT_FILENO,
        });
    }
    if let Some(body) = &cmd.heredoc {
        list.push(Redirection::Heredoc {
            target: libc::STDIN_FILENO,
            body: body.clone(),
        });
    }
    if let Some(path) = &cmd.cwd_override {
        list.push(Redirection::Cwd { path: path.clone() });
    }
    list
}

/// Applies each directive, in order, to this process's fd table. Only ever
/// called in a forked child; the first failure is returned and the caller
/// terminates the process.
pub fn apply_redirections(list: &[Redirection]) -> Result<(), RedirError> {
    for redirection in list {
        match redirection {
            Redirection::Input { target, path } => {
                let file = OpenOptions::new().read(true).open(path).map_err(|e| {
                    RedirError::Open {
                        path: path.clone(),
                        source: e,
                    }
                })?;
                replace_fd(file.into_raw_fd(), *target)?;
            }
            Redirection::Output { target, path } => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| RedirError::Open {
                        path: path.clone(),
                        source: e,
                    })?;
                replace_fd(file.into_raw_fd(), *target)?;
            }
            Redirection::Append { target, path } => {
                let file = OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .map_err(|e| RedirError::Open {
                        path: path.clone(),
                        source: e,
                    })?;
                replace_fd(file.into_raw_fd(), *target)?;
            }
            Redirection::ErrorFile { target, path } => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| RedirError::Open {
                        path: path.clone(),
                        source: e,
                    })?;
                replace_fd(file.into_raw_fd(), *target)?;
            }
            Redirection::DupStdoutToStderr { target, source }
            | Redirection::DupStderrToStdout { target, source } => {
                unistd::dup2(*source, *target).map_err(RedirError::Dup)?;
            }
            Redirection::Heredoc { target, body } => {
                let (read_end, write_end) = unistd::pipe().map_err(RedirError::Heredoc)?;
                unistd::write(write_end, body.as_bytes()).map_err(RedirError::Heredoc)?;
                unistd::close(write_end).map_err(RedirError::Heredoc)?;
                replace_fd(read_end, *target)?;
            }
            Redirection::Cwd { path } => {
                unistd::chdir(path.as_str()).map_err(|e| RedirError::Chdir {
                    path: path.clone(),
                    source: e,
                })?;
            }
        }
    }
    Ok(())
}

fn replace_fd(fd: RawFd, target: RawFd) -> Result<(), RedirError> {
    unistd::dup2(fd, target).map_err(RedirError::Dup)?;
    unistd::close(fd).map_err(RedirError::Dup)?;
    Ok(())
}
