use std::os::unix::io::RawFd;

use nix::fcntl::OFlag;
use nix::unistd;

/// The pipes connecting the stages of a pipeline: `n - 1` pairs for `n`
/// commands, pair `i` joining stage `i`'s stdout to stage `i + 1`'s stdin.
/// Every fd is opened close-on-exec so nothing leaks into executed programs.
#[derive(Debug)]
pub struct PipeSet {
    pairs: Vec<(RawFd, RawFd)>,
    closed: bool,
}

impl PipeSet {
    /// Allocates the pipes for a pipeline of `n_stages` commands. A single
    /// command needs no pipes and gets an empty set. If any allocation
    /// fails partway, everything opened so far is closed before the error
    /// is returned; a partial set never escapes.
    pub fn create(n_stages: usize) -> nix::Result<PipeSet> {
        let mut pairs = Vec::new();
        if n_stages > 1 {
            pairs.reserve(n_stages - 1);
            for _ in 0..n_stages - 1 {
                match unistd::pipe2(OFlag::O_CLOEXEC) {
                    Ok(pair) => pairs.push(pair),
                    Err(e) => {
                        for &(r, w) in &pairs {
                            let _ = unistd::close(r);
                            let _ = unistd::close(w);
                        }
                        return Err(e);
                    }
                }
            }
        }
        Ok(PipeSet {
            pairs,
            closed: false,
        })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Read end of pipe `i`, feeding stage `i + 1`'s stdin.
    pub fn read_end(&self, i: usize) -> RawFd {
        self.pairs[i].0
    }

    /// Write end of pipe `i`, receiving stage `i`'s stdout.
    pub fn write_end(&self, i: usize) -> RawFd {
        self.pairs[i].1
    }

    /// Closes every fd in the set, exactly once. Later calls (and the drop
    /// guard) are no-ops, so no fd is ever closed twice.
    pub fn close_all(&mut self) {
        if self.closed {
            return;
        }
        for &(r, w) in &self.pairs {
            let _ = unistd::close(r);
            let _ = unistd::close(w);
        }
        self.closed = true;
    }
}

impl Drop for PipeSet {
    fn drop(&mut self) {
        self.close_all();
    }
}
