use std::io::{self, PipeReader, PipeWriter};
use std::os::fd::{AsRawFd, RawFd};

/// Descriptor numbers the child sees for the non-stdio channels. They are
/// fixed and match the `--status-fd`/`--command-fd`/`--attribute-fd` flags
/// the session prepends to the argument vector.
pub(crate) const STATUS_FD: RawFd = 3;
pub(crate) const COMMAND_FD: RawFd = 4;
pub(crate) const ATTRIBUTE_FD: RawFd = 5;

/// Pipe ends retained by this process and drained/fed by the pump workers.
/// Each descriptor has exactly one owning worker.
#[derive(Debug)]
pub(crate) struct ParentChannels {
    pub stdin: PipeWriter,
    pub stdout: PipeReader,
    pub stderr: PipeReader,
    pub status: PipeReader,
    pub command: PipeWriter,
    pub attribute: Option<PipeReader>,
}

/// Pipe ends destined for the child, consumed by the
/// [`ProcessRunner`](crate::ProcessRunner). Dropped in the parent right
/// after the spawn so reads can reach end-of-stream once the child exits.
#[derive(Debug)]
pub struct ChildBindings {
    pub(crate) stdin: PipeReader,
    pub(crate) stdout: PipeWriter,
    pub(crate) stderr: PipeWriter,
    pub(crate) status: PipeWriter,
    pub(crate) command: PipeReader,
    pub(crate) attribute: Option<PipeWriter>,
}

impl ChildBindings {
    /// (source, target) descriptor pairs to `dup2` in the child before
    /// exec, binding the extra channels to their fixed numbers.
    pub(crate) fn dup2_plan(&self) -> Vec<(RawFd, RawFd)> {
        let mut plan = vec![
            (self.status.as_raw_fd(), STATUS_FD),
            (self.command.as_raw_fd(), COMMAND_FD),
        ];
        if let Some(attribute) = &self.attribute {
            plan.push((attribute.as_raw_fd(), ATTRIBUTE_FD));
        }
        plan
    }
}

/// Materializes one pipe per channel. A session creates exactly one set
/// and never reuses it.
pub(crate) fn open_channels(
    with_attribute: bool,
) -> io::Result<(ParentChannels, ChildBindings)> {
    let (stdin_read, stdin_write) = io::pipe()?;
    let (stdout_read, stdout_write) = io::pipe()?;
    let (stderr_read, stderr_write) = io::pipe()?;
    let (status_read, status_write) = io::pipe()?;
    let (command_read, command_write) = io::pipe()?;
    let (attribute_read, attribute_write) = if with_attribute {
        let (r, w) = io::pipe()?;
        (Some(r), Some(w))
    } else {
        (None, None)
    };

    let parent = ParentChannels {
        stdin: stdin_write,
        stdout: stdout_read,
        stderr: stderr_read,
        status: status_read,
        command: command_write,
        attribute: attribute_read,
    };
    let child = ChildBindings {
        stdin: stdin_read,
        stdout: stdout_write,
        stderr: stderr_write,
        status: status_write,
        command: command_read,
        attribute: attribute_write,
    };
    Ok((parent, child))
}
