use std::env;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use vanity_core::GrindPattern;

pub const DEFAULT_KEYGEN_BIN: &str = "solana-keygen";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("required tool {bin:?} was not found (install it or set VANITY_KEYGEN_BIN)")]
    ToolMissing { bin: String },
    #[error("failed to launch {bin}: {source}")]
    Spawn { bin: String, source: io::Error },
    #[error("{bin} pubkey exited with {status}: {stderr}")]
    Inspect {
        bin: String,
        status: String,
        stderr: String,
    },
    #[error("{bin} pubkey printed no public key for {artifact}")]
    EmptyPublicKey { bin: String, artifact: PathBuf },
}

/// Everything the worker needs for one search run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrindRequest {
    pub pattern: GrindPattern,
    /// `None` leaves parallelism to the worker.
    pub threads: Option<u32>,
    pub ignore_case: bool,
    pub use_passphrase: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn success() -> Self {
        Self { code: Some(0) }
    }

    pub fn failed(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// The external key search. `grind` must write its artifacts into
/// `workspace` and nowhere else.
pub trait SearchWorker {
    fn grind(
        &self,
        request: &GrindRequest,
        workspace: &Path,
        log_path: &Path,
    ) -> Result<WorkerExit, WorkerError>;

    fn derive_public_key(&self, artifact: &Path) -> Result<String, WorkerError>;
}

#[derive(Debug, Clone)]
pub struct KeygenWorker {
    bin: String,
}

impl KeygenWorker {
    pub fn new(bin: impl Into<String>) -> Self {
        Self { bin: bin.into() }
    }

    pub fn ensure_available(&self) -> Result<(), WorkerError> {
        if command_exists(&self.bin) {
            Ok(())
        } else {
            Err(WorkerError::ToolMissing {
                bin: self.bin.clone(),
            })
        }
    }

    fn grind_command(&self, request: &GrindRequest) -> Command {
        let mut command = Command::new(&self.bin);
        command
            .arg("grind")
            .arg("--ends-with")
            .arg(request.pattern.to_string());
        if let Some(threads) = request.threads {
            command.arg("--num-threads").arg(threads.to_string());
        }
        if request.ignore_case {
            command.arg("--ignore-case");
        }
        if !request.use_passphrase {
            command.arg("--no-bip39-passphrase");
            // Own process group, so a terminal Ctrl-C reaches only the
            // orchestrator and the running search is left to finish. The
            // passphrase prompt needs the foreground group.
            #[cfg(unix)]
            {
                use std::os::unix::process::CommandExt;
                command.process_group(0);
            }
        }
        command
    }
}

impl SearchWorker for KeygenWorker {
    fn grind(
        &self,
        request: &GrindRequest,
        workspace: &Path,
        log_path: &Path,
    ) -> Result<WorkerExit, WorkerError> {
        let spawn_err = |source: io::Error| WorkerError::Spawn {
            bin: self.bin.clone(),
            source,
        };
        let stdout = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
            .map_err(spawn_err)?;
        let stderr = stdout.try_clone().map_err(spawn_err)?;
        // The passphrase prompt needs the operator's terminal.
        let stdin = if request.use_passphrase {
            Stdio::inherit()
        } else {
            Stdio::null()
        };

        let status = self
            .grind_command(request)
            .current_dir(workspace)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(spawn_err)?;

        Ok(WorkerExit {
            code: status.code(),
        })
    }

    fn derive_public_key(&self, artifact: &Path) -> Result<String, WorkerError> {
        let output = Command::new(&self.bin)
            .arg("pubkey")
            .arg(artifact)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| WorkerError::Spawn {
                bin: self.bin.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(WorkerError::Inspect {
                bin: self.bin.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let public_key = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if public_key.is_empty() {
            return Err(WorkerError::EmptyPublicKey {
                bin: self.bin.clone(),
                artifact: artifact.to_path_buf(),
            });
        }
        Ok(public_key)
    }
}

/// Explicit paths are checked directly, bare names are looked up on `PATH`.
pub fn command_exists(name: &str) -> bool {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    env::var_os("PATH")
        .map(|paths| env::split_paths(&paths).any(|path| path.join(name).is_file()))
        .unwrap_or(false)
}
