use std::fs;
use std::path::{Path, PathBuf};

use nix::unistd::{access, AccessFlags};

/// Outcome of resolving a bare command name against the search path. The
/// distinction between the failure cases drives the shell's exit codes:
/// `NotFound` maps to 127, the other two to 126.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    NotFound,
    FoundNotExecutable,
    FoundDirectory,
}

pub fn is_directory(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
}

pub fn is_regular(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

/// Executability for the current user, via access(2). Does not confirm the
/// file type; combine with `is_regular` when that matters.
pub fn is_executable(path: &Path) -> bool {
    access(path, AccessFlags::X_OK).is_ok()
}

/// Resolves a slash-free command name against a colon-separated search path.
///
/// The first executable regular file wins. An empty segment means the
/// current directory and is rendered as `./cmd`. Non-executable files and
/// directories named like the command are remembered so the caller can
/// report 126-style failures instead of a generic "not found".
pub fn search(name: &str, path_var: Option<&str>) -> Resolution {
    let path_var = match path_var {
        Some(p) if !p.is_empty() => p,
        _ => return Resolution::NotFound,
    };

    let mut found_noexec = false;
    let mut found_dir = false;

    for segment in path_var.split(':') {
        let candidate = if segment.is_empty() {
            PathBuf::from(format!("./{}", name))
        } else {
            Path::new(segment).join(name)
        };

        if is_directory(&candidate) {
            found_dir = true;
        } else if is_regular(&candidate) {
            if is_executable(&candidate) {
                return Resolution::Found(candidate);
            }
            found_noexec = true;
        }
    }

    if found_noexec {
        Resolution::FoundNotExecutable
    } else if found_dir {
        Resolution::FoundDirectory
    } else {
        Resolution::NotFound
    }
}
