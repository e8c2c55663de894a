use std::borrow::Cow;

/// Immutable snapshot of a finished run, built exactly once when the child
/// terminates or the session is cancelled. Partial captures are kept on
/// cancellation and failure; diagnostic text is often the only actionable
/// signal.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub(crate) out: Vec<u8>,
    pub(crate) err: Vec<u8>,
    pub(crate) status: Vec<u8>,
    pub(crate) attribute: Option<Vec<u8>>,
    pub(crate) exit_code: i32,
    pub(crate) error_code: u32,
    pub(crate) cancelled: bool,
}

impl SessionOutcome {
    pub fn out_data(&self) -> &[u8] {
        &self.out
    }

    pub fn err_data(&self) -> &[u8] {
        &self.err
    }

    pub fn status_data(&self) -> &[u8] {
        &self.status
    }

    /// Raw attribute-channel bytes; `None` when the channel was not opened.
    pub fn attribute_data(&self) -> Option<&[u8]> {
        self.attribute.as_deref()
    }

    pub fn out_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.out)
    }

    pub fn err_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.err)
    }

    pub fn status_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.status)
    }

    /// Child process exit code; `-1` when it was killed by a signal.
    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Protocol-level error code (0 = none). Derived from the first
    /// `FAILURE`/`ERROR` status event, or the cancel code when the run was
    /// cancelled or an unanswered prompt failed the session.
    pub fn error_code(&self) -> u32 {
        self.error_code
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled
    }
}
