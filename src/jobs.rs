use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Observable state of a job: running in the background, suspended by a stop
/// signal, or fully reaped with the last collected exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done(i32),
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub pgid: Pid,
    pub pids: Vec<Pid>,
    pub cmdline: String,
    pub state: JobState,
}

/// The shell's job table. Owned by the shell context and threaded through
/// explicitly; there is no module-level table.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    next_id: u32,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: Vec::new(),
            next_id: 1,
        }
    }

    pub fn add(&mut self, pgid: Pid, pids: Vec<Pid>, cmdline: String, state: JobState) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.push(Job {
            id,
            pgid,
            pids,
            cmdline,
            state,
        });
        id
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Non-blocking sweep over every registered job: reaps children that
    /// have exited and returns the jobs whose last process is gone. Called
    /// from the prompt loop when a child-status signal was observed.
    pub fn reap_finished(&mut self) -> Vec<Job> {
        for job in &mut self.jobs {
            job.pids.retain(|&pid| {
                match waitpid(pid, Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED)) {
                    Ok(WaitStatus::Exited(_, code)) => {
                        job.state = JobState::Done(code);
                        false
                    }
                    Ok(WaitStatus::Signaled(_, sig, _)) => {
                        job.state = JobState::Done(128 + sig as i32);
                        false
                    }
                    Ok(WaitStatus::Stopped(_, _)) => {
                        job.state = JobState::Stopped;
                        true
                    }
                    Ok(_) => true,
                    // Not our child anymore; nothing left to collect.
                    Err(Errno::ECHILD) => false,
                    Err(_) => true,
                }
            });
        }
        let mut finished = Vec::new();
        self.jobs.retain(|job| {
            let done = job.pids.is_empty();
            if done {
                finished.push(job.clone());
            }
            !done
        });
        if self.jobs.is_empty() {
            self.next_id = 1;
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testutil::lock_process;
    use nix::unistd::{fork, ForkResult};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn ids_increment_and_reset_when_table_drains() {
        let mut table = JobTable::new();
        let a = table.add(Pid::from_raw(100), vec![], "a".into(), JobState::Running);
        let b = table.add(Pid::from_raw(200), vec![], "b".into(), JobState::Running);
        assert_eq!((a, b), (1, 2));
        let finished = table.reap_finished();
        assert_eq!(finished.len(), 2);
        assert!(table.is_empty());
        let c = table.add(Pid::from_raw(300), vec![], "c".into(), JobState::Running);
        assert_eq!(c, 1);
    }

    #[test]
    fn reaps_an_exited_child() {
        let _guard = lock_process();
        let child = match unsafe { fork() }.unwrap() {
            ForkResult::Child => unsafe { libc::_exit(7) },
            ForkResult::Parent { child } => child,
        };
        let mut table = JobTable::new();
        table.add(child, vec![child], "exit 7".into(), JobState::Running);

        let mut finished = Vec::new();
        for _ in 0..100 {
            finished = table.reap_finished();
            if !finished.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].state, JobState::Done(7));
        assert!(table.is_empty());
    }
}
