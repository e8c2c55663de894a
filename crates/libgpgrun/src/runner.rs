use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tracing::debug;

use crate::channels::ChildBindings;
use crate::error::GpgError;

/// Everything a runner needs to create the child process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub program: PathBuf,
    pub arguments: Vec<String>,
    /// Extra environment entries layered over the inherited environment.
    pub env: Vec<(String, String)>,
}

/// Handle to a spawned child: identifier, best-effort termination, exit wait.
#[derive(Debug)]
pub struct SpawnedChild {
    child: Child,
}

impl SpawnedChild {
    pub fn from_tokio(child: Child) -> Self {
        Self { child }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Best-effort SIGKILL to the child's whole process group. The child
    /// may have forked helpers that inherited the pipe write ends; killing
    /// only the child would leave them holding the read channels open, and
    /// the drain workers would never see end-of-stream. Falls back to
    /// killing the child alone when it leads no group.
    pub(crate) fn kill_group(&mut self) -> io::Result<()> {
        if let Some(pid) = self.child.id() {
            // SAFETY: plain kill(2) on the group id this session created
            // via setpgid at spawn.
            let rc = unsafe { libc::kill(-(pid as i32), libc::SIGKILL) };
            if rc == 0 {
                return Ok(());
            }
        }
        self.child.start_kill()
    }

    pub(crate) async fn wait(&mut self) -> io::Result<ExitStatus> {
        self.child.wait().await
    }
}

/// Process-creation capability consumed by the session. Injected so tests
/// can substitute a recording fake; termination and waiting happen on the
/// returned [`SpawnedChild`].
pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, spec: &SpawnSpec, bindings: ChildBindings) -> Result<SpawnedChild, GpgError>;
}

/// Production runner on top of `tokio::process`.
#[derive(Debug, Default)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
    fn spawn(&self, spec: &SpawnSpec, bindings: ChildBindings) -> Result<SpawnedChild, GpgError> {
        let plan = bindings.dup2_plan();
        let ChildBindings {
            stdin,
            stdout,
            stderr,
            status,
            command,
            attribute,
        } = bindings;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.arguments)
            .stdin(Stdio::from(stdin))
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        // SAFETY: runs in the forked child before exec and only calls
        // async-signal-safe libc functions (setpgid, fcntl, dup2).
        unsafe {
            cmd.pre_exec(move || {
                // Own process group, so a cancel can signal the whole tree
                // at once; anything the child forks inherits the pipe ends.
                if libc::setpgid(0, 0) != 0 {
                    return Err(io::Error::last_os_error());
                }
                // Lift every source clear of the target range first; a
                // source could itself occupy 3..=5 and get clobbered by an
                // earlier dup2 otherwise. The lifted copies stay
                // close-on-exec so only the bound 3..=5 survive.
                let mut lifted = Vec::with_capacity(plan.len());
                for &(src, dst) in &plan {
                    let moved = libc::fcntl(src, libc::F_DUPFD_CLOEXEC, 10);
                    if moved < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    lifted.push((moved, dst));
                }
                for (src, dst) in lifted {
                    // dup2 clears CLOEXEC on the target, so the channel
                    // survives the exec.
                    if libc::dup2(src, dst) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                GpgError::ExecutableNotFound(spec.program.display().to_string())
            } else {
                GpgError::Spawn(e)
            }
        })?;
        debug!(pid = ?child.id(), program = %spec.program.display(), "spawned gpg child");

        // The child-side ends of status/command/attribute drop here, after
        // the spawn, so this process holds no stray writers that would keep
        // the read channels from reaching EOF.
        drop(status);
        drop(command);
        drop(attribute);

        Ok(SpawnedChild::from_tokio(child))
    }
}
