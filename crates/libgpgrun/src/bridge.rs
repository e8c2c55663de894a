use std::io::{self, PipeWriter, Write};
use std::sync::Arc;

use gpgrun_protocol::{NeedPassphrase, StatusCode, StatusEvent, UserIdHint, escape_reply, unescape};
use tracing::{debug, trace};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::outcome::SessionOutcome;

/// libgpg-error code recorded when a prompt goes unanswered under
/// [`NoResponsePolicy::Fail`] or when the session is cancelled.
pub const GPG_ERR_CANCELED: u32 = 99;

/// What to do when the responder declines to answer an interactive prompt.
/// Explicit rather than implied: either way a bare newline is sent so the
/// child takes its default and the run continues to natural termination,
/// but `Fail` additionally records [`GPG_ERR_CANCELED`] on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoResponsePolicy {
    #[default]
    EmptyLine,
    Fail,
}

/// Payload returned by a responder; wiped from memory on drop since it is
/// usually a passphrase.
#[derive(Zeroize, ZeroizeOnDrop)]
pub enum PromptReply {
    Text(String),
    Bytes(Vec<u8>),
}

impl PromptReply {
    fn as_bytes(&self) -> &[u8] {
        match self {
            PromptReply::Text(text) => text.as_bytes(),
            PromptReply::Bytes(bytes) => bytes,
        }
    }
}

/// Most-recent structured hints, handed to the responder so a prompt can
/// say which key it concerns.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub last_user_id_hint: Option<UserIdHint>,
    pub last_need_passphrase: Option<NeedPassphrase>,
}

/// Caller-supplied callback capability. `on_prompt` is synchronous and may
/// block indefinitely (it can legitimately wait on a human); only the
/// status worker blocks on it while the other channels keep draining.
/// The lifecycle notifications are fire-and-forget.
pub trait Responder: Send + Sync {
    fn on_prompt(
        &self,
        code: StatusCode,
        prompt: &str,
        context: &PromptContext,
    ) -> Option<PromptReply>;

    fn on_start(&self, _arguments: &[String]) {}

    fn on_terminate(&self, _outcome: &SessionOutcome) {}
}

/// Bridges interactive status events to the responder and writes the reply
/// back over the command channel in the framing the child expects.
#[derive(Clone)]
pub(crate) struct DelegateBridge {
    responder: Option<Arc<dyn Responder>>,
    policy: NoResponsePolicy,
}

impl DelegateBridge {
    pub fn new(responder: Option<Arc<dyn Responder>>, policy: NoResponsePolicy) -> Self {
        Self { responder, policy }
    }

    pub fn notify_start(&self, arguments: &[String]) {
        if let Some(responder) = &self.responder {
            responder.on_start(arguments);
        }
    }

    pub fn notify_terminate(&self, outcome: &SessionOutcome) {
        if let Some(responder) = &self.responder {
            responder.on_terminate(outcome);
        }
    }

    /// One round trip for one interactive event. Returns the error code to
    /// record on the session, if the no-response policy fired.
    pub fn respond(
        &self,
        event: &StatusEvent,
        context: &PromptContext,
        command: &mut PipeWriter,
    ) -> io::Result<Option<u32>> {
        let prompt = unescape(&event.payload);
        trace!(keyword = %event.keyword, prompt = %prompt, "interactive status event");

        let reply = self
            .responder
            .as_ref()
            .and_then(|r| r.on_prompt(event.code, &prompt, context));

        match reply {
            Some(reply) => {
                // Single-line framing: embedded terminators are escaped so
                // the payload cannot be mistaken for two answers.
                let mut framed = escape_reply(reply.as_bytes());
                framed.push(b'\n');
                let result = command.write_all(&framed).and_then(|()| command.flush());
                framed.zeroize();
                result?;
                Ok(None)
            }
            None => {
                debug!(keyword = %event.keyword, policy = ?self.policy, "prompt unanswered");
                command.write_all(b"\n")?;
                command.flush()?;
                match self.policy {
                    NoResponsePolicy::EmptyLine => Ok(None),
                    NoResponsePolicy::Fail => Ok(Some(GPG_ERR_CANCELED)),
                }
            }
        }
    }
}
