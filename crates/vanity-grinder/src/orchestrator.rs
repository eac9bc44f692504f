use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::config::GrindConfig;
use crate::processor::{ArtifactProcessor, ArtifactReport, PersistenceGate, ProcessOutcome};
use crate::workspace::{Disposition, Released, Workspace, WorkspaceError, WorkspaceManager};
use crate::worker::{GrindRequest, SearchWorker};

/// Minimum wait before retrying after a workspace could not be created.
pub const WORKSPACE_RETRY_FLOOR: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum GrindError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

/// How a single worker invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Success { artifacts: Vec<PathBuf> },
    WorkerFailed { reason: String },
    /// The worker reported success but left no artifacts behind.
    AnomalousEmptySuccess,
}

/// Runs the worker inside `workspace`, output appended to the workspace log,
/// and classifies the result.
pub fn run_search<W: SearchWorker>(
    worker: &W,
    request: &GrindRequest,
    workspace: &Workspace,
) -> SearchOutcome {
    let exit = match worker.grind(request, workspace.path(), &workspace.log_path()) {
        Ok(exit) => exit,
        Err(err) => {
            return SearchOutcome::WorkerFailed {
                reason: err.to_string(),
            }
        }
    };
    if !exit.is_success() {
        let reason = match exit.code {
            Some(code) => format!("worker exited with code {code}"),
            None => "worker terminated by signal".to_string(),
        };
        return SearchOutcome::WorkerFailed { reason };
    }

    match workspace.artifacts() {
        Ok(artifacts) if artifacts.is_empty() => SearchOutcome::AnomalousEmptySuccess,
        Ok(artifacts) => SearchOutcome::Success { artifacts },
        Err(err) => SearchOutcome::WorkerFailed {
            reason: err.to_string(),
        },
    }
}

/// First `max_lines` lines of the worker log, for diagnostics.
pub fn log_preview(log_path: &Path, max_lines: usize) -> Vec<String> {
    let Ok(file) = File::open(log_path) else {
        return Vec::new();
    };
    BufReader::new(file)
        .split(b'\n')
        .map_while(Result::ok)
        .take(max_lines)
        .map(|line| {
            let line = line.strip_suffix(b"\r").unwrap_or(line.as_slice());
            String::from_utf8_lossy(line).into_owned()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    WorkerFailed,
    AnomalousEmptySuccess,
    /// Every artifact was inserted or already present.
    Clean,
    /// At least one artifact failed; the workspace is kept.
    Degraded,
}

impl IterationOutcome {
    pub fn disposition(self) -> Disposition {
        match self {
            Self::Degraded => Disposition::Retain,
            Self::WorkerFailed | Self::AnomalousEmptySuccess | Self::Clean => {
                Disposition::Discard
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::WorkerFailed => "worker_failed",
            Self::AnomalousEmptySuccess => "empty_success",
            Self::Clean => "clean",
            Self::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: u64,
    pub outcome: IterationOutcome,
    pub artifacts: Vec<ArtifactReport>,
    pub released: Released,
}

impl IterationReport {
    pub fn count(&self, label: &str) -> usize {
        self.artifacts
            .iter()
            .filter(|report| report.outcome.label() == label)
            .count()
    }
}

/// Totals across the life of the process.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GrindStats {
    /// Every attempted iteration, aborted ones included.
    pub iterations: u64,
    /// Iterations that ended before the worker ran.
    pub aborted: u64,
    pub worker_failures: u64,
    pub empty_successes: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub artifact_failures: u64,
    pub retained_workspaces: u64,
}

impl GrindStats {
    pub fn record(&mut self, report: &IterationReport) {
        self.iterations += 1;
        match report.outcome {
            IterationOutcome::WorkerFailed => self.worker_failures += 1,
            IterationOutcome::AnomalousEmptySuccess => self.empty_successes += 1,
            IterationOutcome::Clean | IterationOutcome::Degraded => {}
        }
        for artifact in &report.artifacts {
            match artifact.outcome {
                ProcessOutcome::Inserted { .. } => self.inserted += 1,
                ProcessOutcome::Duplicate { .. } => self.duplicates += 1,
                _ => self.artifact_failures += 1,
            }
        }
        if matches!(report.released, Released::Retained(_)) {
            self.retained_workspaces += 1;
        }
    }

    pub fn record_aborted(&mut self) {
        self.iterations += 1;
        self.aborted += 1;
    }
}

/// Stop request shared between the interrupt handler and the loop. A request
/// never cuts an iteration short; it only prevents the next one.
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    wake: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleeps for `pause`, returning early once a stop is requested.
    async fn pause(&self, pause: Duration) {
        if pause.is_zero() || self.is_requested() {
            return;
        }
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(pause) => {}
        }
    }
}

/// Process-scoped loop state: worker, workspace root, and the single store
/// gate shared by every iteration.
pub struct Grinder<W: SearchWorker> {
    worker: W,
    request: GrindRequest,
    workspaces: WorkspaceManager,
    gate: PersistenceGate,
    log_preview_lines: usize,
    stats: GrindStats,
}

impl<W: SearchWorker> Grinder<W> {
    pub fn new(config: &GrindConfig, worker: W) -> Self {
        Self::with_gate(config, worker, PersistenceGate::new(config.database_url.clone()))
    }

    pub fn with_gate(config: &GrindConfig, worker: W, gate: PersistenceGate) -> Self {
        Self {
            worker,
            request: config.grind_request(),
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            gate,
            log_preview_lines: config.log_preview_lines,
            stats: GrindStats::default(),
        }
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    pub fn stats(&self) -> &GrindStats {
        &self.stats
    }

    pub fn gate(&self) -> &PersistenceGate {
        &self.gate
    }

    /// One full pass: acquire, search, process, release. Only a workspace
    /// that cannot be created is an error; everything else is reported.
    pub fn run_iteration(&mut self) -> Result<IterationReport, GrindError> {
        let iteration = self.stats.iterations + 1;
        let workspace = match self.workspaces.acquire() {
            Ok(workspace) => workspace,
            Err(err) => {
                self.stats.record_aborted();
                return Err(err.into());
            }
        };
        info!(
            event = "grind_start",
            iteration,
            pattern = %self.request.pattern,
            threads = ?self.request.threads,
            workspace = %workspace.path().display()
        );

        let (outcome, artifacts) = match run_search(&self.worker, &self.request, &workspace) {
            SearchOutcome::Success { artifacts } => {
                info!(event = "grind_success", iteration, artifacts = artifacts.len());
                let processor = ArtifactProcessor::new(
                    &self.worker,
                    &self.request.pattern,
                    self.request.ignore_case,
                );
                let reports =
                    processor.process_all(&mut self.gate, &artifacts, &workspace.log_path());
                let outcome = if reports.iter().all(|report| report.outcome.is_clean()) {
                    IterationOutcome::Clean
                } else {
                    IterationOutcome::Degraded
                };
                (outcome, reports)
            }
            SearchOutcome::WorkerFailed { reason } => {
                warn!(event = "grind_failed", iteration, reason = %reason);
                self.dump_log(&workspace);
                (IterationOutcome::WorkerFailed, Vec::new())
            }
            SearchOutcome::AnomalousEmptySuccess => {
                warn!(
                    event = "grind_empty",
                    iteration, "worker reported success but produced no artifacts"
                );
                self.dump_log(&workspace);
                (IterationOutcome::AnomalousEmptySuccess, Vec::new())
            }
        };

        let released = self.workspaces.release(workspace, outcome.disposition());
        let report = IterationReport {
            iteration,
            outcome,
            artifacts,
            released,
        };
        self.stats.record(&report);
        info!(
            event = "grind_iteration_done",
            iteration,
            outcome = outcome.label(),
            inserted = report.count("inserted"),
            duplicates = report.count("duplicate"),
            failed = report.artifacts.len()
                - report.count("inserted")
                - report.count("duplicate")
        );
        Ok(report)
    }

    /// Runs iterations until a stop is requested or `max_iterations`
    /// attempts (aborted ones included) have been made, pausing between
    /// them. Iterations run through `block_in_place`, so this needs the
    /// multi-thread runtime.
    pub async fn run_until(
        &mut self,
        pause: Duration,
        max_iterations: Option<u64>,
        shutdown: &Shutdown,
    ) -> GrindStats {
        while !shutdown.is_requested() {
            let mut wait = pause;
            match tokio::task::block_in_place(|| self.run_iteration()) {
                Ok(report) => {
                    if let (IterationOutcome::Degraded, Released::Retained(path)) =
                        (report.outcome, &report.released)
                    {
                        warn!(
                            event = "recover_hint",
                            workspace = %path.display(),
                            "run `vanity-grinder recover {}` once the cause is fixed",
                            path.display()
                        );
                    }
                }
                Err(err) => {
                    error!(event = "iteration_aborted", error = %err);
                    wait = wait.max(WORKSPACE_RETRY_FLOOR);
                }
            }

            if let Some(max) = max_iterations {
                if self.stats.iterations >= max {
                    info!(event = "max_iterations_reached", max);
                    break;
                }
            }
            shutdown.pause(wait).await;
        }
        self.stats.clone()
    }

    /// Re-runs the processor over a retained workspace. The workspace is
    /// removed only if every artifact now resolves cleanly.
    pub fn recover(&mut self, workspace: Workspace) -> Result<IterationReport, GrindError> {
        let artifacts = workspace.artifacts()?;
        info!(
            event = "recover_start",
            workspace = %workspace.path().display(),
            artifacts = artifacts.len()
        );
        let processor = ArtifactProcessor::new(
            &self.worker,
            &self.request.pattern,
            self.request.ignore_case,
        );
        let reports = processor.process_all(&mut self.gate, &artifacts, &workspace.log_path());
        let outcome = if reports.iter().all(|report| report.outcome.is_clean()) {
            IterationOutcome::Clean
        } else {
            IterationOutcome::Degraded
        };
        let released = self.workspaces.release(workspace, outcome.disposition());
        Ok(IterationReport {
            iteration: 0,
            outcome,
            artifacts: reports,
            released,
        })
    }

    fn dump_log(&self, workspace: &Workspace) {
        for line in log_preview(&workspace.log_path(), self.log_preview_lines) {
            warn!(event = "grind_log", "{line}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::{WorkerError, WorkerExit};
    use std::fs;
    use tempfile::TempDir;

    struct ScriptedWorker {
        exit: WorkerExit,
        artifacts: Vec<&'static str>,
        log: &'static str,
    }

    impl SearchWorker for ScriptedWorker {
        fn grind(
            &self,
            _request: &GrindRequest,
            workspace: &Path,
            log_path: &Path,
        ) -> Result<WorkerExit, WorkerError> {
            fs::write(log_path, self.log).expect("write log");
            for name in &self.artifacts {
                fs::write(workspace.join(name), "[]").expect("write artifact");
            }
            Ok(self.exit)
        }

        fn derive_public_key(&self, _artifact: &Path) -> Result<String, WorkerError> {
            Ok("unused".to_string())
        }
    }

    fn request() -> GrindRequest {
        GrindRequest {
            pattern: "ab:1".parse().expect("pattern"),
            threads: None,
            ignore_case: false,
            use_passphrase: false,
        }
    }

    #[test]
    fn classifies_nonzero_exit_as_worker_failure() {
        let root = TempDir::new().expect("temp root");
        let workspace = WorkspaceManager::new(root.path()).acquire().expect("ws");
        let worker = ScriptedWorker {
            exit: WorkerExit::failed(3),
            artifacts: vec![],
            log: "error: resource busy\n",
        };
        assert_eq!(
            run_search(&worker, &request(), &workspace),
            SearchOutcome::WorkerFailed {
                reason: "worker exited with code 3".to_string()
            }
        );
    }

    #[test]
    fn classifies_success_without_artifacts_as_anomaly() {
        let root = TempDir::new().expect("temp root");
        let workspace = WorkspaceManager::new(root.path()).acquire().expect("ws");
        let worker = ScriptedWorker {
            exit: WorkerExit::success(),
            artifacts: vec![],
            log: "Searching with 8 threads\n",
        };
        assert_eq!(
            run_search(&worker, &request(), &workspace),
            SearchOutcome::AnomalousEmptySuccess
        );
    }

    #[test]
    fn success_lists_artifacts_in_workspace() {
        let root = TempDir::new().expect("temp root");
        let workspace = WorkspaceManager::new(root.path()).acquire().expect("ws");
        let worker = ScriptedWorker {
            exit: WorkerExit::success(),
            artifacts: vec!["Bxab.json", "Axab.json"],
            log: "Wrote keypair to Axab.json\n",
        };
        assert_eq!(
            run_search(&worker, &request(), &workspace),
            SearchOutcome::Success {
                artifacts: vec![
                    workspace.path().join("Axab.json"),
                    workspace.path().join("Bxab.json"),
                ]
            }
        );
    }

    #[test]
    fn log_preview_is_bounded() {
        let dir = TempDir::new().expect("temp dir");
        let log = dir.path().join("grind.log");
        let body: String = (0..50).map(|i| format!("line {i}\n")).collect();
        fs::write(&log, body).expect("log");

        let preview = log_preview(&log, 5);
        assert_eq!(preview.len(), 5);
        assert_eq!(preview[0], "line 0");
        assert_eq!(preview[4], "line 4");
        assert!(log_preview(&dir.path().join("missing.log"), 5).is_empty());
    }

    #[test]
    fn log_preview_survives_invalid_utf8() {
        let dir = TempDir::new().expect("temp dir");
        let log = dir.path().join("grind.log");
        fs::write(&log, b"first\n\xff\xfe garbled\r\nthird\n").expect("log");

        let preview = log_preview(&log, 10);
        assert_eq!(preview.len(), 3);
        assert_eq!(preview[0], "first");
        assert!(preview[1].ends_with(" garbled"));
        assert_eq!(preview[2], "third");
    }

    #[test]
    fn only_degraded_iterations_retain_the_workspace() {
        assert_eq!(IterationOutcome::Clean.disposition(), Disposition::Discard);
        assert_eq!(
            IterationOutcome::WorkerFailed.disposition(),
            Disposition::Discard
        );
        assert_eq!(
            IterationOutcome::AnomalousEmptySuccess.disposition(),
            Disposition::Discard
        );
        assert_eq!(IterationOutcome::Degraded.disposition(), Disposition::Retain);
    }
}
