use crate::job_control;
use crate::redirect::Redirection;
use crate::status::WaitStatus;

/// The lifecycle state of one process in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped,
    Terminated,
    Killed,
}

/// One command of a pipeline, tracked by the kernel via its pid.
#[derive(Debug)]
pub struct Process {
    pub argv: Vec<String>,
    pub redirections: Vec<Redirection>,
    pub pid: libc::pid_t,
    pub state: ProcessState,
}

impl Process {
    pub fn new(argv: Vec<String>, redirections: Vec<Redirection>) -> Self {
        Self {
            argv,
            redirections,
            pid: 0,
            state: ProcessState::Running,
        }
    }
}

/// The lifecycle state of a job, derived from its processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
    Killed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Stopped => "STOPPED",
            JobState::Running => "RUNNING",
            JobState::Done => "DONE",
            JobState::Killed => "KILLED",
        }
    }
}

/// One pipeline submitted as a single command line; the unit of
/// foreground/background control.
///
/// Invariants maintained by [`Job::apply`]:
/// - state is `Running` iff `nrunning > 0`;
/// - state is `Stopped` iff `nrunning == 0` and a live process is stopped;
/// - when the process list empties, the last removed process decides
///   between `Done` (normal exit) and `Killed` (signal death).
#[derive(Debug)]
pub struct Job {
    /// Original command text, kept for status lines.
    pub cmd: String,
    pub procs: Vec<Process>,
    pub background: bool,
    /// Process group id: the pid of the first forked process.
    pub pgid: libc::pid_t,
    /// Pid of the last process in the pipeline; its status is the job's.
    pub lastpid: libc::pid_t,
    /// Positive once the job has ever been in the background table.
    pub job_spec: usize,
    pub state: JobState,
    /// Exit status or killing signal of the last reaped process.
    pub status: i32,
    nrunning: usize,
    nstopped: usize,
}

impl Job {
    pub fn new(cmd: String, procs: Vec<Process>, background: bool) -> Self {
        Self {
            cmd,
            procs,
            background,
            pgid: 0,
            lastpid: 0,
            job_spec: 0,
            state: JobState::Running,
            status: 0,
            nrunning: 0,
            nstopped: 0,
        }
    }

    /// Record that the process at `index` committed to fork+exec.
    pub fn note_spawned(&mut self, index: usize, pid: libc::pid_t) {
        let process = &mut self.procs[index];
        process.pid = pid;
        process.state = ProcessState::Running;
        if index == 0 {
            self.pgid = pid;
        }
        self.lastpid = pid;
        self.nrunning += 1;
        self.state = JobState::Running;
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Done | JobState::Killed)
    }

    /// Apply one kernel-reported status change for the process `pid`.
    ///
    /// Transitions the process, adjusts the running/stopped counters,
    /// removes terminated processes from the list, and re-evaluates the
    /// job state. Events for pids the job does not own are ignored.
    pub fn apply(&mut self, pid: libc::pid_t, event: WaitStatus) {
        let Some(index) = self.procs.iter().position(|p| p.pid == pid) else {
            return;
        };

        match event {
            WaitStatus::Exited(code) => {
                self.remove_process(index, ProcessState::Terminated);
                self.status = code;
                self.reevaluate(false);
            }
            WaitStatus::Signaled(signal) => {
                self.remove_process(index, ProcessState::Killed);
                self.status = signal;
                self.reevaluate(true);
            }
            WaitStatus::Stopped(_) => {
                let process = &mut self.procs[index];
                if process.state == ProcessState::Running {
                    process.state = ProcessState::Stopped;
                    self.nrunning -= 1;
                    self.nstopped += 1;
                }
                self.reevaluate_live();
            }
            WaitStatus::Continued => {
                let process = &mut self.procs[index];
                if process.state == ProcessState::Stopped {
                    process.state = ProcessState::Running;
                    self.nstopped -= 1;
                    self.nrunning += 1;
                }
                self.reevaluate_live();
            }
        }
    }

    /// Treat every remaining process as gone. Used when the kernel reports
    /// no children left for the job's group (status changes were consumed
    /// elsewhere); the job is finalized rather than leaked.
    pub fn finalize(&mut self) {
        self.procs.clear();
        self.nrunning = 0;
        self.nstopped = 0;
        if self.state != JobState::Killed {
            self.state = JobState::Done;
        }
    }

    /// Status line in the shell's reporting format.
    pub fn status_line(&self) -> String {
        match self.state {
            JobState::Done | JobState::Killed => format!(
                "[{}] {} {} {}",
                self.job_spec,
                self.state.as_str(),
                self.status,
                self.cmd
            ),
            JobState::Running => {
                format!("[{}] {} {} &", self.job_spec, self.state.as_str(), self.cmd)
            }
            JobState::Stopped => {
                format!("[{}] {} {}", self.job_spec, self.state.as_str(), self.cmd)
            }
        }
    }

    fn remove_process(&mut self, index: usize, outcome: ProcessState) {
        match self.procs[index].state {
            ProcessState::Running => self.nrunning -= 1,
            ProcessState::Stopped => self.nstopped -= 1,
            ProcessState::Terminated | ProcessState::Killed => {}
        }
        self.procs[index].state = outcome;
        self.procs.remove(index);
    }

    fn reevaluate(&mut self, removed_by_signal: bool) {
        if self.procs.is_empty() {
            self.state = if removed_by_signal {
                JobState::Killed
            } else {
                JobState::Done
            };
        } else {
            self.reevaluate_live();
        }
    }

    fn reevaluate_live(&mut self) {
        self.state = if self.nrunning > 0 {
            JobState::Running
        } else {
            JobState::Stopped
        };
    }
}

/// The shell's job table: background jobs in insertion order, the single
/// foreground slot, and the job-spec counters.
pub struct JobTable {
    background: Vec<Job>,
    foreground: Option<Job>,
    max_bg_job_index: usize,
    last_bg_job_index: usize,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            background: Vec::new(),
            foreground: None,
            max_bg_job_index: 0,
            last_bg_job_index: 0,
        }
    }

    /// Insert a job at the tail of the background table, assigning a fresh
    /// job-spec if it never had one. Job-specs are strictly increasing for
    /// the life of the shell; spec 0 is never assigned.
    ///
    /// Returns the job's spec.
    pub fn push_background(&mut self, mut job: Job) -> usize {
        job.background = true;
        if job.job_spec == 0 {
            self.max_bg_job_index += 1;
            job.job_spec = self.max_bg_job_index;
        }
        self.last_bg_job_index = job.job_spec;
        let spec = job.job_spec;
        self.background.push(job);
        spec
    }

    pub fn take_background(&mut self, spec: usize) -> Option<Job> {
        let index = self.background.iter().position(|j| j.job_spec == spec)?;
        Some(self.background.remove(index))
    }

    /// Default target for `fg`/`bg`: the most recently added or resumed
    /// background job's spec (0 when none was ever added).
    pub fn last_bg_job_index(&self) -> usize {
        self.last_bg_job_index
    }

    pub fn set_foreground(&mut self, job: Job) {
        self.foreground = Some(job);
    }

    pub fn foreground(&self) -> Option<&Job> {
        self.foreground.as_ref()
    }

    pub fn foreground_mut(&mut self) -> Option<&mut Job> {
        self.foreground.as_mut()
    }

    pub fn take_foreground(&mut self) -> Option<Job> {
        self.foreground.take()
    }

    /// Reconcile the table with a status change reaped elsewhere (the
    /// `wait` builtin waits on raw pids). A job whose last process was
    /// consumed this way is removed without a status line; the builtin
    /// already reported the pid.
    pub fn note_reaped(&mut self, pid: libc::pid_t, status: WaitStatus) {
        let Some(index) = self
            .background
            .iter()
            .position(|job| job.procs.iter().any(|p| p.pid == pid))
        else {
            return;
        };

        self.background[index].apply(pid, status);
        if self.background[index].is_finished() {
            self.background.remove(index);
        }
    }

    /// Non-blocking sweep of the background table in insertion order.
    ///
    /// Drains every pending status change per job, applies the state
    /// machine, and removes jobs that reached DONE or KILLED (printing
    /// their final status line). With `print_all`, the surviving jobs'
    /// current lines are printed too (the `jobs` listing).
    pub fn reap(&mut self, print_all: bool) {
        let mut i = 0;
        while i < self.background.len() {
            let job = &mut self.background[i];
            let mut finished = false;

            loop {
                match job_control::wait_for_group_event(job.pgid, false) {
                    Ok(None) => break,
                    Ok(Some(event)) => {
                        job.apply(event.pid, event.status);
                        if job.is_finished() {
                            finished = true;
                            break;
                        }
                    }
                    Err(err) if err.raw_os_error() == Some(libc::ECHILD) => {
                        job.finalize();
                        finished = true;
                        break;
                    }
                    Err(err) => {
                        eprintln!(
                            "-xssh: failed to wait for job [{}]: {}",
                            job.job_spec, err
                        );
                        break;
                    }
                }
            }

            if finished {
                let job = self.background.remove(i);
                println!("{}", job.status_line());
            } else {
                if print_all {
                    println!("{}", self.background[i].status_line());
                }
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(nprocs: usize) -> Job {
        let procs = (0..nprocs)
            .map(|i| Process::new(vec![format!("cmd{i}")], Vec::new()))
            .collect();
        let mut job = Job::new("cmd".into(), procs, false);
        for i in 0..nprocs {
            job.note_spawned(i, 100 + i as libc::pid_t);
        }
        job
    }

    #[test]
    fn spawn_marks_pipeline_running() {
        let job = job(2);
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.pgid, 100);
        assert_eq!(job.lastpid, 101);
        assert_eq!(job.nrunning, 2);
    }

    #[test]
    fn all_exits_end_in_done_with_last_status() {
        let mut job = job(2);
        job.apply(100, WaitStatus::Exited(0));
        assert_eq!(job.state, JobState::Running);
        job.apply(101, WaitStatus::Exited(3));
        assert_eq!(job.state, JobState::Done);
        assert_eq!(job.status, 3);
        assert!(job.procs.is_empty());
    }

    #[test]
    fn last_removed_process_decides_done_vs_killed() {
        let mut job = job(2);
        job.apply(100, WaitStatus::Signaled(libc::SIGINT));
        assert_eq!(job.state, JobState::Running);
        job.apply(101, WaitStatus::Exited(0));
        assert_eq!(job.state, JobState::Done);

        let mut job = job2();
        job.apply(200, WaitStatus::Exited(0));
        job.apply(201, WaitStatus::Signaled(libc::SIGKILL));
        assert_eq!(job.state, JobState::Killed);
        assert_eq!(job.status, libc::SIGKILL);
    }

    fn job2() -> Job {
        let procs = vec![
            Process::new(vec!["a".into()], Vec::new()),
            Process::new(vec!["b".into()], Vec::new()),
        ];
        let mut job = Job::new("a | b".into(), procs, false);
        job.note_spawned(0, 200);
        job.note_spawned(1, 201);
        job
    }

    #[test]
    fn job_stops_only_when_no_process_runs() {
        let mut job = job(2);
        job.apply(100, WaitStatus::Stopped(libc::SIGTSTP));
        assert_eq!(job.state, JobState::Running);
        job.apply(101, WaitStatus::Stopped(libc::SIGTSTP));
        assert_eq!(job.state, JobState::Stopped);

        job.apply(100, WaitStatus::Continued);
        assert_eq!(job.state, JobState::Running);
    }

    #[test]
    fn exit_of_stopped_process_adjusts_stopped_counter() {
        let mut job = job(2);
        job.apply(100, WaitStatus::Stopped(libc::SIGTSTP));
        job.apply(100, WaitStatus::Exited(1));
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.status, 1);
        assert_eq!(job.procs.len(), 1);
    }

    #[test]
    fn events_for_unknown_pids_are_ignored() {
        let mut job = job(1);
        job.apply(999, WaitStatus::Exited(0));
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.procs.len(), 1);
    }

    #[test]
    fn finalize_marks_job_done() {
        let mut job = job(2);
        job.finalize();
        assert_eq!(job.state, JobState::Done);
        assert!(job.procs.is_empty());
    }

    #[test]
    fn job_specs_are_strictly_increasing() {
        let mut table = JobTable::new();
        let first = table.push_background(job(1));
        let second = table.push_background(job(1));
        assert_eq!((first, second), (1, 2));

        // Draining the table must not recycle specs.
        table.take_background(1);
        table.take_background(2);
        let third = table.push_background(job(1));
        assert_eq!(third, 3);
    }

    #[test]
    fn reinserted_job_keeps_its_spec_and_becomes_default() {
        let mut table = JobTable::new();
        table.push_background(job(1));
        table.push_background(job(1));

        let first = table.take_background(1).unwrap();
        let spec = table.push_background(first);
        assert_eq!(spec, 1);
        assert_eq!(table.last_bg_job_index(), 1);
        assert_eq!(table.max_bg_job_index, 2);
    }

    #[test]
    fn status_lines_match_reporting_format() {
        let mut table = JobTable::new();
        table.push_background(job(1));
        let mut job = table.take_background(1).unwrap();

        assert_eq!(job.status_line(), "[1] RUNNING cmd &");

        job.apply(100, WaitStatus::Stopped(libc::SIGTSTP));
        assert_eq!(job.status_line(), "[1] STOPPED cmd");

        job.apply(100, WaitStatus::Exited(0));
        assert_eq!(job.status_line(), "[1] DONE 0 cmd");

        let mut killed = job2();
        killed.job_spec = 2;
        killed.apply(200, WaitStatus::Signaled(libc::SIGINT));
        killed.apply(201, WaitStatus::Signaled(libc::SIGINT));
        assert_eq!(killed.status_line(), "[2] KILLED 2 a | b");
    }
}
