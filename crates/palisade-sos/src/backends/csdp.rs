use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::backends::sdpa::{parse_solution, program_digest, to_sdpa, SdpaError};
use crate::sdp::{SdpProblem, SdpSolution, SdpSolver, SdpStatus};

#[derive(Debug, Error)]
pub enum CsdpError {
    #[error("CSDP I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSDP not found: {0}")]
    NotFound(String),
    #[error("Failed to parse CSDP solution: {0}")]
    Parse(#[from] SdpaError),
    #[error("CSDP run aborted")]
    Aborted,
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs the `csdp` executable on SDPA files in a scratch directory.
#[derive(Debug, Clone)]
pub struct CsdpSolver {
    command: String,
    keep_dir: Option<PathBuf>,
    abort: Option<Arc<AtomicBool>>,
}

impl Default for CsdpSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl CsdpSolver {
    pub fn new() -> Self {
        Self::with_command("csdp")
    }

    pub fn with_command(cmd: impl Into<String>) -> Self {
        Self {
            command: cmd.into(),
            keep_dir: None,
            abort: None,
        }
    }

    /// Copy every problem and solution file into `dir`, named by program
    /// digest.
    pub fn keep_files_in(mut self, dir: impl Into<PathBuf>) -> Self {
        self.keep_dir = Some(dir.into());
        self
    }

    /// Kill the running CSDP process, and fail with [`CsdpError::Aborted`],
    /// once `flag` is set.
    pub fn abort_on(mut self, flag: Arc<AtomicBool>) -> Self {
        self.abort = Some(flag);
        self
    }

    fn aborted(&self) -> bool {
        self.abort.as_ref().is_some_and(|f| f.load(Ordering::SeqCst))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    fn keep(&self, digest: &str, problem: &Path, solution: &Path) {
        let Some(dir) = &self.keep_dir else {
            return;
        };
        let stem = &digest[..digest.len().min(16)];
        let result = fs::create_dir_all(dir)
            .and_then(|_| fs::copy(problem, dir.join(format!("{stem}.dat-s"))))
            .and_then(|_| {
                if solution.exists() {
                    fs::copy(solution, dir.join(format!("{stem}.sol")))?;
                }
                Ok(())
            });
        if let Err(e) = result {
            warn!(dir = %dir.display(), error = %e, "could not keep CSDP files");
        }
    }
}

/// Map a CSDP exit code to a status.
///
/// 0 is optimal, 3 is partial success, 1 and 2 are primal and dual
/// infeasibility. Everything else, including death by signal, is a failure.
pub fn status_from_exit_code(code: Option<i32>) -> SdpStatus {
    match code {
        Some(0) => SdpStatus::Optimal,
        Some(3) => SdpStatus::NearOptimal,
        Some(1) => SdpStatus::PrimalInfeasible,
        Some(2) => SdpStatus::DualInfeasible,
        Some(4) => SdpStatus::Failed("maximum iterations reached".into()),
        Some(5) => SdpStatus::Failed("stuck at edge of primal feasibility".into()),
        Some(6) => SdpStatus::Failed("stuck at edge of dual feasibility".into()),
        Some(7) => SdpStatus::Failed("lack of progress".into()),
        Some(8) => SdpStatus::Failed("X, Z, or O was singular".into()),
        Some(9) => SdpStatus::Failed("detected NaN or Inf values".into()),
        Some(other) => SdpStatus::Failed(format!("exit code {other}")),
        None => SdpStatus::Failed("terminated by signal".into()),
    }
}

impl SdpSolver for CsdpSolver {
    type Error = CsdpError;

    fn name(&self) -> &str {
        "csdp"
    }

    fn solve(&mut self, problem: &SdpProblem) -> Result<SdpSolution, CsdpError> {
        let dir = tempfile::Builder::new().prefix("palisade-csdp-").tempdir()?;
        let problem_path = dir.path().join("program.dat-s");
        let solution_path = dir.path().join("program.sol");
        fs::write(&problem_path, to_sdpa(problem))?;
        debug!(
            blocks = problem.blocks.len(),
            constraints = problem.constraints.len(),
            "running {}",
            self.command
        );

        if self.aborted() {
            return Err(CsdpError::Aborted);
        }
        let mut child = Command::new(&self.command)
            .arg(&problem_path)
            .arg(&solution_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => CsdpError::NotFound(format!("{}: {e}", self.command)),
                _ => CsdpError::Io(e),
            })?;
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });
        let exit = loop {
            if let Some(exit) = child.try_wait()? {
                break exit;
            }
            if self.aborted() {
                debug!(pid = child.id(), "aborting CSDP");
                let _ = child.kill();
                let _ = child.wait();
                return Err(CsdpError::Aborted);
            }
            thread::sleep(POLL_INTERVAL);
        };
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if self.keep_dir.is_some() {
            self.keep(&program_digest(problem), &problem_path, &solution_path);
        }

        let status = status_from_exit_code(exit.code());
        debug!(status = %status.describe(), "CSDP finished");
        if !status.is_usable() {
            let status = match status {
                SdpStatus::Failed(reason) => {
                    match stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                        Some(last) => SdpStatus::Failed(format!("{reason}: {}", last.trim())),
                        None => SdpStatus::Failed(reason),
                    }
                }
                other => other,
            };
            return Ok(SdpSolution::without_primal(status));
        }

        let text = fs::read_to_string(&solution_path)?;
        let primal = parse_solution(&text, problem)?;
        Ok(SdpSolution { status, primal })
    }
}
