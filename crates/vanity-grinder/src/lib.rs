pub mod config;
pub mod orchestrator;
pub mod processor;
pub mod worker;
pub mod workspace;

pub use config::{Args, Commands, GrindConfig};
pub use orchestrator::{
    log_preview, run_search, GrindError, GrindStats, Grinder, IterationOutcome, IterationReport,
    SearchOutcome, Shutdown, WORKSPACE_RETRY_FLOOR,
};
pub use processor::{ArtifactProcessor, ArtifactReport, PersistenceGate, ProcessOutcome};
pub use worker::{GrindRequest, KeygenWorker, SearchWorker, WorkerError, WorkerExit};
pub use workspace::{Disposition, Released, Workspace, WorkspaceError, WorkspaceManager};
