#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use prograde::engine::CancelSignal;
use prograde::exec::{ExitState, GradingRunner, InfrastructureError, RunResult};
use prograde::fetch::{FetchError, RepositoryFetcher, Snapshot};
use prograde::outcome::CapturedOutput;
use prograde::pipeline::{PipelineObserver, PipelineState};
use prograde::types::{BoxFuture, GradingTask, RepositoryReference};

pub const FAKE_REVISION: &str = "0000000000000000000000000000000000fake";

/// A fake fetcher that:
/// - fails a location a scripted number of times (or forever)
/// - otherwise materializes a tiny snapshot directory at the destination
/// - records every attempt and destination it saw.
#[derive(Default)]
pub struct ScriptedFetcher {
    queued: Mutex<HashMap<String, VecDeque<FetchError>>>,
    permanent: Mutex<HashMap<String, FetchError>>,
    attempts: Mutex<HashMap<String, u32>>,
    destinations: Mutex<Vec<PathBuf>>,
    delay: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` fetches of `location` with `error`.
    pub fn fail_times(self, location: &str, error: FetchError, times: usize) -> Self {
        {
            let mut queued = self.queued.lock().unwrap();
            let queue = queued.entry(location.to_string()).or_default();
            for _ in 0..times {
                queue.push_back(error.clone());
            }
        }
        self
    }

    /// Fail every fetch of `location` with `error`.
    pub fn always_fail(self, location: &str, error: FetchError) -> Self {
        self.permanent
            .lock()
            .unwrap()
            .insert(location.to_string(), error);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self, location: &str) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(location)
            .copied()
            .unwrap_or(0)
    }

    pub fn destinations(&self) -> Vec<PathBuf> {
        self.destinations.lock().unwrap().clone()
    }

    fn next_failure(&self, location: &str) -> Option<FetchError> {
        if let Some(err) = self.permanent.lock().unwrap().get(location) {
            return Some(err.clone());
        }
        self.queued
            .lock()
            .unwrap()
            .get_mut(location)
            .and_then(VecDeque::pop_front)
    }
}

impl RepositoryFetcher for ScriptedFetcher {
    fn fetch<'a>(
        &'a self,
        reference: &'a RepositoryReference,
        destination: &'a Path,
    ) -> BoxFuture<'a, Result<Snapshot, FetchError>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            *self
                .attempts
                .lock()
                .unwrap()
                .entry(reference.location.clone())
                .or_insert(0) += 1;
            self.destinations
                .lock()
                .unwrap()
                .push(destination.to_path_buf());

            // Failing fetches leave partial state behind, like an aborted clone.
            std::fs::create_dir_all(destination)
                .map_err(|e| FetchError::NotFound(e.to_string()))?;
            if let Some(err) = self.next_failure(&reference.location) {
                std::fs::write(destination.join("partial"), b"interrupted")
                    .map_err(|e| FetchError::NotFound(e.to_string()))?;
                return Err(err);
            }

            std::fs::write(destination.join("README"), reference.location.as_bytes())
                .map_err(|e| FetchError::NotFound(e.to_string()))?;
            Ok(Snapshot {
                reference: reference.clone(),
                root: destination.to_path_buf(),
                revision: Some(FAKE_REVISION.to_string()),
            })
        })
    }
}

/// What a [`ScriptedRunner`] does for one student.
#[derive(Debug, Clone)]
pub enum RunBehaviour {
    /// Exit 0 printing a JSON payload.
    Grade { score: f64, feedback: String },
    /// Exit with `code` printing `stdout`.
    Exit { code: i32, stdout: String },
    /// Terminated by `signal`.
    Signal(i32),
    /// Never finishes on its own; ends at the task deadline or on cancel.
    Hang,
    /// Panics inside the runner.
    Panic,
    /// The runner cannot spawn anything.
    Infrastructure(String),
}

impl RunBehaviour {
    pub fn grade(score: f64, feedback: &str) -> Self {
        RunBehaviour::Grade {
            score,
            feedback: feedback.to_string(),
        }
    }
}

/// An instrumented fake runner that:
/// - acts per student according to a script (default: grade 1.0)
/// - tracks how many runs are in flight and the peak seen
/// - records the order in which runs started and whether the snapshot
///   directory existed when each run began.
pub struct ScriptedRunner {
    default: RunBehaviour,
    per_student: HashMap<String, RunBehaviour>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
    snapshots: Mutex<Vec<(PathBuf, bool)>>,
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            default: RunBehaviour::grade(1.0, "ok"),
            per_student: HashMap::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn by_default(mut self, behaviour: RunBehaviour) -> Self {
        self.default = behaviour;
        self
    }

    pub fn for_student(mut self, student_id: &str, behaviour: RunBehaviour) -> Self {
        self.per_student.insert(student_id.to_string(), behaviour);
        self
    }

    /// Simulated work per run before the behaviour kicks in.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// `(snapshot root, existed at run start)` per run.
    pub fn snapshots(&self) -> Vec<(PathBuf, bool)> {
        self.snapshots.lock().unwrap().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn completed(status: ExitState, stdout: String, started: Instant) -> RunResult {
    RunResult::Completed {
        status,
        output: CapturedOutput {
            stdout,
            ..CapturedOutput::default()
        },
        elapsed: started.elapsed(),
    }
}

impl GradingRunner for ScriptedRunner {
    fn run<'a>(
        &'a self,
        task: &'a GradingTask,
        snapshot: &'a Snapshot,
        cancel: CancelSignal,
    ) -> BoxFuture<'a, Result<RunResult, InfrastructureError>> {
        Box::pin(async move {
            let started = Instant::now();
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            let _guard = InFlight(&self.in_flight);
            self.peak.fetch_max(now, Ordering::SeqCst);

            let student = snapshot.reference.student_id.clone();
            self.started.lock().unwrap().push(student.clone());
            self.snapshots
                .lock()
                .unwrap()
                .push((snapshot.root.clone(), snapshot.root.exists()));

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let behaviour = self
                .per_student
                .get(&student)
                .cloned()
                .unwrap_or_else(|| self.default.clone());

            match behaviour {
                RunBehaviour::Grade { score, feedback } => {
                    let payload = serde_json::json!({ "score": score, "feedback": feedback });
                    Ok(completed(ExitState::Code(0), payload.to_string(), started))
                }
                RunBehaviour::Exit { code, stdout } => {
                    Ok(completed(ExitState::Code(code), stdout, started))
                }
                RunBehaviour::Signal(signal) => {
                    Ok(completed(ExitState::Signal(signal), String::new(), started))
                }
                RunBehaviour::Hang => {
                    let cancelled = tokio::select! {
                        _ = cancel.cancelled() => true,
                        _ = tokio::time::sleep(task.timeout()) => false,
                    };
                    Ok(RunResult::TimedOut {
                        output: CapturedOutput::default(),
                        elapsed: started.elapsed(),
                        cancelled,
                    })
                }
                RunBehaviour::Panic => panic!("scripted runner panic for {student}"),
                RunBehaviour::Infrastructure(detail) => Err(InfrastructureError::Supervise(detail)),
            }
        })
    }
}

/// Observer that records every pipeline transition.
#[derive(Default)]
pub struct StateRecorder {
    transitions: Mutex<Vec<(String, PipelineState, PipelineState)>>,
}

impl StateRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// States visited by `student_id`, starting with `Start`.
    pub fn path_of(&self, student_id: &str) -> Vec<PipelineState> {
        let transitions = self.transitions.lock().unwrap();
        let mut path = vec![PipelineState::Start];
        path.extend(
            transitions
                .iter()
                .filter(|(student, _, _)| student == student_id)
                .map(|(_, _, to)| *to),
        );
        path
    }

    /// Students in the order their pipelines entered `Fetching`.
    pub fn fetch_order(&self) -> Vec<String> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, to)| *to == PipelineState::Fetching)
            .map(|(student, _, _)| student.clone())
            .collect()
    }

    pub fn transitions(&self) -> Vec<(String, PipelineState, PipelineState)> {
        self.transitions.lock().unwrap().clone()
    }
}

impl PipelineObserver for StateRecorder {
    fn on_transition(&self, reference: &RepositoryReference, from: PipelineState, to: PipelineState) {
        self.transitions
            .lock()
            .unwrap()
            .push((reference.student_id.clone(), from, to));
    }
}
