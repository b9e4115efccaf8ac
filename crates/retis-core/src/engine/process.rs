use super::error::EngineError;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const STDOUT_FILE: &str = "stdout.txt";
const STDERR_FILE: &str = "stderr.txt";
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A supervised external program.
///
/// The program runs in its own working directory with stdout and stderr redirected to
/// files there. The log files are owned by the child, so the controller holds no handle
/// to them. Dropping the handle stops a still-running program.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    program: String,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    exit: Option<ExitStatus>,
}

impl ProcessHandle {
    /// Launches `program` with `args` in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Spawn`] if the executable cannot be started and
    /// [`EngineError::Io`] if the log files cannot be created.
    pub fn start(program: &str, args: &[String], cwd: &Path) -> Result<Self, EngineError> {
        let stdout_path = cwd.join(STDOUT_FILE);
        let stderr_path = cwd.join(STDERR_FILE);
        let stdout = File::create(&stdout_path)?;
        let stderr = File::create(&stderr_path)?;

        debug!(program, ?args, cwd = %cwd.display(), "Starting external program");
        let child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| EngineError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(Self {
            child,
            program: program.to_string(),
            stdout_path,
            stderr_path,
            exit: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }

    /// Non-blocking exit check. `None` while the program is running.
    pub fn poll(&mut self) -> Result<Option<ExitStatus>, EngineError> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
        }
        Ok(self.exit)
    }

    /// Like [`ProcessHandle::poll`], but turns an unsuccessful exit into
    /// [`EngineError::ProcessFailed`].
    pub fn check(&mut self) -> Result<Option<ExitStatus>, EngineError> {
        match self.poll()? {
            Some(status) if !status.success() => Err(self.failure(status)),
            other => Ok(other),
        }
    }

    /// Blocks until the program exits, failing on an unsuccessful exit.
    pub fn wait(&mut self) -> Result<ExitStatus, EngineError> {
        let status = match self.exit {
            Some(status) => status,
            None => {
                let status = self.child.wait()?;
                self.exit = Some(status);
                status
            }
        };
        if status.success() {
            Ok(status)
        } else {
            Err(self.failure(status))
        }
    }

    /// Requests termination and waits up to `timeout` before killing the program.
    ///
    /// Safe to call any number of times, including after the program has exited.
    pub fn stop(&mut self, timeout: Duration) -> Result<ExitStatus, EngineError> {
        if let Some(status) = self.poll()? {
            return Ok(status);
        }
        debug!(program = %self.program, pid = self.pid(), "Terminating external program");
        terminate(self.pid());

        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(status) = self.poll()? {
                return Ok(status);
            }
            thread::sleep(STOP_POLL_INTERVAL);
        }

        warn!(
            program = %self.program,
            pid = self.pid(),
            timeout_secs = timeout.as_secs_f64(),
            "External program ignored termination request; killing it"
        );
        if let Err(e) = self.child.kill() {
            debug!("Kill failed, the program may already have exited: {}", e);
        }
        let status = self.child.wait()?;
        self.exit = Some(status);
        Ok(status)
    }

    pub fn failure(&self, status: ExitStatus) -> EngineError {
        EngineError::ProcessFailed {
            code: status.code(),
            stdout: self.stdout_path.clone(),
            stderr: self.stderr_path.clone(),
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Ok(None) = self.poll() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Sends SIGTERM through the `kill` utility so that no libc binding is needed.
#[cfg(unix)]
fn terminate(pid: u32) {
    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}
