use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use smile_core::config::RecognizerConfig;
use smile_core::store::{keys, ConfigStore};
use smile_core::wait::{BoundedWait, Clock, WaitOutcome};
use tracing::{debug, info, warn};

use crate::error::{AuthError, AuthResult};

/// File name of the recognizer binary inside the install directory.
pub const RECOGNIZER_EXE: &str = "smile-recognizer";

/// How often the exit status is probed while waiting for a graceful exit.
const EXIT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Recognize,
    Warmup,
}

impl LaunchMode {
    pub fn as_arg(self) -> &'static str {
        match self {
            LaunchMode::Recognize => "recognize",
            LaunchMode::Warmup => "warmup",
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_arg())
    }
}

/// Identifies a launched recognizer. The OS child stays in the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub mode: LaunchMode,
}

/// Seam between the orchestrator and process management.
pub trait RecognizerLauncher: Send {
    /// Start (or reuse) the recognizer in `mode`.
    fn launch(&mut self, mode: LaunchMode) -> AuthResult<ProcessHandle>;

    fn is_alive(&mut self, handle: &ProcessHandle) -> bool;

    /// Stop the process behind `handle`. A stale handle is a no-op.
    fn terminate(&mut self, handle: ProcessHandle);

    /// Stop whatever is running.
    fn shutdown(&mut self);
}

struct Running {
    child: Child,
    handle: ProcessHandle,
}

/// Owns at most one live recognizer child.
pub struct ProcessSupervisor {
    config: RecognizerConfig,
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    config_file: Option<PathBuf>,
    running: Option<Running>,
}

impl ProcessSupervisor {
    pub fn new(config: RecognizerConfig, store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
            config_file: None,
            running: None,
        }
    }

    /// Hand `path` to every child as `--config`, so both ends of the
    /// channel read the same file.
    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    pub fn current(&self) -> Option<ProcessHandle> {
        self.running.as_ref().map(|r| r.handle)
    }

    /// Locate the recognizer: the registered install directory first, then
    /// the configured executable, then the directory of this executable.
    pub fn resolve_executable(&self) -> AuthResult<PathBuf> {
        let exe_name = format!("{RECOGNIZER_EXE}{}", std::env::consts::EXE_SUFFIX);

        let install_dir = self.store.get(keys::PATH)?.filter(|p| !p.trim().is_empty());
        let candidate = if let Some(dir) = install_dir {
            PathBuf::from(dir.trim()).join(&exe_name)
        } else if !self.config.executable.is_empty() {
            PathBuf::from(&self.config.executable)
        } else {
            let current = std::env::current_exe()
                .map_err(|e| AuthError::LaunchFailed(format!("cannot locate own executable: {e}")))?;
            current
                .parent()
                .map(|dir| dir.join(&exe_name))
                .ok_or_else(|| AuthError::LaunchFailed("own executable has no parent directory".into()))?
        };

        if !candidate.is_file() {
            return Err(AuthError::LaunchFailed(format!(
                "recognizer executable not found: {}",
                candidate.display()
            )));
        }
        Ok(candidate)
    }

    /// Non-blocking liveness probe of the running child; reaps it if it exited.
    fn probe(&mut self) -> bool {
        let Some(running) = self.running.as_mut() else {
            return false;
        };
        match running.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = running.handle.pid, ?status, "recognizer exited on its own");
                self.running = None;
                false
            }
            Err(e) => {
                warn!(pid = running.handle.pid, error = %e, "cannot query recognizer status");
                self.running = None;
                false
            }
        }
    }

    fn spawn(&self, exe: &Path, mode: LaunchMode) -> AuthResult<Child> {
        let mut cmd = Command::new(exe);
        cmd.arg("--mode").arg(mode.as_arg());
        // An explicit `--config` in extra_args wins; clap rejects it twice.
        if let Some(path) = &self.config_file {
            if !self.config.extra_args.iter().any(|a| a == "--config") {
                cmd.arg("--config").arg(path);
            }
        }
        cmd.args(&self.config.extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = exe.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.spawn()
            .map_err(|e| AuthError::LaunchFailed(format!("{}: {e}", exe.display())))
    }

    /// Ask the child to exit, wait out the grace period, then kill and reap.
    fn stop(&self, mut running: Running) {
        let pid = running.handle.pid;
        info!(pid, mode = %running.handle.mode, "stopping recognizer");

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM not delivered");
            }
        }

        let grace = self.config.grace_period();
        let exited = BoundedWait::new(self.clock.as_ref(), EXIT_POLL)
            .timeout(grace)
            .run(|_| running.child.try_wait());

        match exited {
            Ok(WaitOutcome::Ready(status)) => {
                debug!(pid, ?status, "recognizer exited");
                return;
            }
            Ok(_) => warn!(pid, grace_ms = grace.as_millis() as u64, "recognizer ignored shutdown request, killing"),
            Err(e) => warn!(pid, error = %e, "waiting for recognizer failed, killing"),
        }

        match running.child.kill() {
            Ok(()) => {}
            // Already gone between the last probe and the kill.
            Err(e) if matches!(e.kind(), ErrorKind::PermissionDenied | ErrorKind::InvalidInput) => {
                debug!(pid, error = %e, "kill refused; process already exited");
            }
            Err(e) => warn!(pid, error = %e, "kill failed"),
        }
        if let Err(e) = running.child.wait() {
            warn!(pid, error = %e, "failed to reap recognizer");
        }
    }
}

impl RecognizerLauncher for ProcessSupervisor {
    fn launch(&mut self, mode: LaunchMode) -> AuthResult<ProcessHandle> {
        if self.probe() {
            if let Some(running) = self.running.take() {
                if running.handle.mode == mode {
                    debug!(pid = running.handle.pid, %mode, "reusing live recognizer");
                    let handle = running.handle;
                    self.running = Some(running);
                    return Ok(handle);
                }
                self.stop(running);
            }
        }

        let exe = self.resolve_executable()?;
        let child = self.spawn(&exe, mode)?;
        let handle = ProcessHandle {
            pid: child.id(),
            mode,
        };
        info!(pid = handle.pid, %mode, exe = %exe.display(), "recognizer launched");
        self.running = Some(Running { child, handle });
        Ok(handle)
    }

    fn is_alive(&mut self, handle: &ProcessHandle) -> bool {
        self.current() == Some(*handle) && self.probe()
    }

    fn terminate(&mut self, handle: ProcessHandle) {
        if self.current() != Some(handle) {
            debug!(pid = handle.pid, "terminate on stale handle ignored");
            return;
        }
        if let Some(running) = self.running.take() {
            self.stop(running);
        }
    }

    fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            self.stop(running);
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
