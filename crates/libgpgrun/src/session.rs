use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use gpgrun_protocol::{NeedPassphrase, StatusCode, StatusEvent, UserIdHint};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bridge::{DelegateBridge, GPG_ERR_CANCELED, NoResponsePolicy, Responder};
use crate::channels::{self, ATTRIBUTE_FD, COMMAND_FD, STATUS_FD};
use crate::error::GpgError;
use crate::outcome::SessionOutcome;
use crate::pump;
use crate::resolve;
use crate::runner::{ProcessRunner, SpawnSpec, TokioRunner};

/// Session lifecycle. Strictly forward: NotStarted → Running →
/// {Terminated, Cancelled}; cancel before start skips Running entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    NotStarted,
    Running,
    Cancelled,
    Terminated,
}

/// State visible to more than one worker. The status worker is the sole
/// writer of the hint fields; everyone else only reads.
#[derive(Debug)]
pub(crate) struct Shared {
    inner: Mutex<SharedInner>,
}

#[derive(Debug)]
struct SharedInner {
    lifecycle: Lifecycle,
    pid: Option<u32>,
    last_user_id_hint: Option<UserIdHint>,
    last_need_passphrase: Option<NeedPassphrase>,
}

impl Shared {
    fn new() -> Self {
        Self {
            inner: Mutex::new(SharedInner {
                lifecycle: Lifecycle::NotStarted,
                pid: None,
                last_user_id_hint: None,
                last_need_passphrase: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SharedInner> {
        // A poisoned lock means a worker panicked; the state itself is
        // still sound (plain assignments only).
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// NotStarted → Running with the child's pid. Returns false when a
    /// cancel raced the spawn, in which case the state stays Cancelled.
    fn begin_running(&self, pid: Option<u32>) -> bool {
        let mut inner = self.lock();
        if inner.lifecycle == Lifecycle::NotStarted {
            inner.lifecycle = Lifecycle::Running;
            inner.pid = pid;
            true
        } else {
            false
        }
    }

    /// Running → Terminated (Cancelled stays put). Returns the cancelled
    /// flag for the outcome.
    fn finish(&self) -> bool {
        let mut inner = self.lock();
        if inner.lifecycle != Lifecycle::Cancelled {
            inner.lifecycle = Lifecycle::Terminated;
        }
        inner.pid = None;
        inner.lifecycle == Lifecycle::Cancelled
    }

    /// NotStarted|Running → Cancelled. Idempotent; returns whether this
    /// call performed the transition.
    fn request_cancel(&self) -> bool {
        let mut inner = self.lock();
        match inner.lifecycle {
            Lifecycle::NotStarted | Lifecycle::Running => {
                inner.lifecycle = Lifecycle::Cancelled;
                true
            }
            Lifecycle::Cancelled | Lifecycle::Terminated => false,
        }
    }

    /// Called by the status worker for every decoded event; retains the
    /// most recent structured hints.
    pub(crate) fn note_event(&self, event: &StatusEvent) {
        match event.code {
            StatusCode::UserIdHint => {
                if let Some(hint) = UserIdHint::parse(&event.payload) {
                    self.lock().last_user_id_hint = Some(hint);
                }
            }
            StatusCode::NeedPassphrase => {
                if let Some(need) = NeedPassphrase::parse(&event.payload) {
                    self.lock().last_need_passphrase = Some(need);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn prompt_context(&self) -> crate::bridge::PromptContext {
        let inner = self.lock();
        crate::bridge::PromptContext {
            last_user_id_hint: inner.last_user_id_hint.clone(),
            last_need_passphrase: inner.last_need_passphrase.clone(),
        }
    }
}

/// Static configuration fixed at construction time. Path and environment
/// are injected here rather than read from process-wide state.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Explicit gpg binary; resolved via [`resolve::default_gpg_path`]
    /// when absent.
    pub gpg_path: Option<PathBuf>,
    /// Extra environment entries layered over the inherited environment.
    pub env: Vec<(String, String)>,
    /// Pass `--batch` (no interactive prompting outside the status
    /// protocol) instead of `--no-batch`.
    pub batch_mode: bool,
    /// Pass `--verbose` and log captured data sizes.
    pub verbose: bool,
    /// Open the attribute channel and pass `--attribute-fd`.
    pub wants_attribute_data: bool,
    pub no_response_policy: NoResponsePolicy,
}

/// One gpg invocation: configure, feed input, start, observe the outcome.
///
/// All configuration (arguments, input, responder) must happen before
/// [`start`](Self::start); afterwards mutators fail with
/// [`GpgError::AlreadyStarted`]. A session runs at most once and its
/// channels are never reused.
pub struct GpgSession {
    config: SessionConfig,
    arguments: Vec<String>,
    input: Vec<Vec<u8>>,
    responder: Option<Arc<dyn Responder>>,
    runner: Arc<dyn ProcessRunner>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    outcome: Option<SessionOutcome>,
}

impl GpgSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            arguments: Vec::new(),
            input: Vec::new(),
            responder: None,
            runner: Arc::new(TokioRunner),
            shared: Arc::new(Shared::new()),
            cancel: CancellationToken::new(),
            outcome: None,
        }
    }

    pub fn with_arguments<I, S>(arguments: I, batch_mode: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut session = Self::new(SessionConfig {
            batch_mode,
            ..SessionConfig::default()
        });
        session.arguments = arguments.into_iter().map(Into::into).collect();
        session
    }

    pub fn with_argument(argument: impl Into<String>) -> Self {
        Self::with_arguments([argument.into()], false)
    }

    fn ensure_not_started(&self) -> Result<(), GpgError> {
        if self.shared.lifecycle() == Lifecycle::NotStarted {
            Ok(())
        } else {
            Err(GpgError::AlreadyStarted)
        }
    }

    pub fn add_argument(&mut self, argument: impl Into<String>) -> Result<(), GpgError> {
        self.ensure_not_started()?;
        self.arguments.push(argument.into());
        Ok(())
    }

    pub fn add_arguments<I, S>(&mut self, arguments: I) -> Result<(), GpgError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_not_started()?;
        self.arguments.extend(arguments.into_iter().map(Into::into));
        Ok(())
    }

    /// Queues a block of input for the child's stdin. The queue is
    /// consumed in order by the write worker and closed for appends once
    /// the run starts.
    pub fn add_input_bytes(&mut self, data: impl Into<Vec<u8>>) -> Result<(), GpgError> {
        self.ensure_not_started()?;
        self.input.push(data.into());
        Ok(())
    }

    pub fn add_input_text(&mut self, text: impl AsRef<str>) -> Result<(), GpgError> {
        self.add_input_bytes(text.as_ref().as_bytes().to_vec())
    }

    pub fn set_responder(&mut self, responder: Arc<dyn Responder>) -> Result<(), GpgError> {
        self.ensure_not_started()?;
        self.responder = Some(responder);
        Ok(())
    }

    /// Swaps the process-creation capability; tests inject recording
    /// fakes here.
    pub fn set_runner(&mut self, runner: Arc<dyn ProcessRunner>) -> Result<(), GpgError> {
        self.ensure_not_started()?;
        self.runner = runner;
        Ok(())
    }

    /// Handle for cancelling this session from another task or thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
            token: self.cancel.clone(),
        }
    }

    /// Runs the session to completion and returns the child's exit code.
    ///
    /// Blocks the caller (as an await) until the child has exited and all
    /// channels are drained. When the session was cancelled before this
    /// call, no process is ever created and `-1` is returned with a
    /// cancelled outcome.
    pub async fn start(&mut self) -> Result<i32, GpgError> {
        match self.shared.lifecycle() {
            Lifecycle::NotStarted => {}
            // Cancelled with no outcome yet means the cancel arrived
            // before any start; one start call settles the session. Once
            // an outcome exists it is final and a restart is refused.
            Lifecycle::Cancelled if self.outcome.is_none() => {
                return Ok(self.finish_cancelled_before_spawn());
            }
            Lifecycle::Cancelled | Lifecycle::Running | Lifecycle::Terminated => {
                return Err(GpgError::AlreadyStarted);
            }
        }

        let program = self
            .config
            .gpg_path
            .clone()
            .or_else(resolve::default_gpg_path)
            .ok_or_else(|| GpgError::ExecutableNotFound("gpg".into()))?;
        let arguments = self.final_arguments();
        let bridge = DelegateBridge::new(self.responder.clone(), self.config.no_response_policy);
        bridge.notify_start(&arguments);

        let (parent, child_bindings) = channels::open_channels(self.config.wants_attribute_data)
            .map_err(GpgError::ChannelSetup)?;
        let spec = SpawnSpec {
            program,
            arguments,
            env: self.config.env.clone(),
        };
        info!(program = %spec.program.display(), args = ?spec.arguments, "starting gpg session");
        let child = self.runner.spawn(&spec, child_bindings)?;

        if !self.shared.begin_running(child.id()) {
            // A cancel slipped in between the lifecycle check and the
            // spawn; make the pump kill the child right away.
            self.cancel.cancel();
        }

        let input = std::mem::take(&mut self.input);
        let pumped = pump::run(
            child,
            parent,
            input,
            bridge.clone(),
            Arc::clone(&self.shared),
            self.cancel.clone(),
        )
        .await;
        let cancelled = self.shared.finish();
        let pumped = pumped?;

        let exit_code = pumped.exit.code().unwrap_or(-1);
        let error_code = pumped
            .error_code
            .unwrap_or(if cancelled { GPG_ERR_CANCELED } else { 0 });
        let outcome = SessionOutcome {
            out: pumped.out,
            err: pumped.err,
            status: pumped.status,
            attribute: pumped.attribute,
            exit_code,
            error_code,
            cancelled,
        };
        debug!(
            exit_code,
            error_code,
            cancelled,
            out_bytes = outcome.out.len(),
            err_bytes = outcome.err.len(),
            status_bytes = outcome.status.len(),
            "gpg session finished"
        );
        if self.config.verbose {
            debug!(status = %outcome.status_text(), "status channel transcript");
        }
        bridge.notify_terminate(&outcome);
        self.outcome = Some(outcome);
        Ok(exit_code)
    }

    fn finish_cancelled_before_spawn(&mut self) -> i32 {
        info!("session cancelled before start; gpg was never spawned");
        let outcome = SessionOutcome {
            exit_code: -1,
            error_code: GPG_ERR_CANCELED,
            cancelled: true,
            ..SessionOutcome::default()
        };
        DelegateBridge::new(self.responder.clone(), self.config.no_response_policy)
            .notify_terminate(&outcome);
        let exit_code = outcome.exit_code;
        self.outcome = Some(outcome);
        exit_code
    }

    /// Caller arguments prefixed with the protocol-enabling flags; gpg
    /// wants options ahead of the command.
    fn final_arguments(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--no-greeting".into(),
            "--no-tty".into(),
            "--status-fd".into(),
            STATUS_FD.to_string(),
            "--command-fd".into(),
            COMMAND_FD.to_string(),
        ];
        args.push(if self.config.batch_mode { "--batch" } else { "--no-batch" }.into());
        if self.config.wants_attribute_data {
            args.push("--attribute-fd".into());
            args.push(ATTRIBUTE_FD.to_string());
        }
        if self.config.verbose {
            args.push("--verbose".into());
        }
        args.extend(self.arguments.iter().cloned());
        args
    }

    pub fn is_running(&self) -> bool {
        self.shared.lifecycle() == Lifecycle::Running
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lifecycle() == Lifecycle::Cancelled
    }

    /// Child process identifier; present only while running.
    pub fn pid(&self) -> Option<u32> {
        self.shared.pid()
    }

    /// Exit code of the finished run; `None` until the session terminates.
    pub fn exit_code(&self) -> Option<i32> {
        self.outcome.as_ref().map(SessionOutcome::exit_code)
    }

    /// Protocol-level error code; 0 before termination and for clean runs.
    pub fn error_code(&self) -> u32 {
        self.outcome.as_ref().map_or(0, SessionOutcome::error_code)
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn out_data(&self) -> &[u8] {
        self.outcome.as_ref().map_or(&[], SessionOutcome::out_data)
    }

    pub fn err_data(&self) -> &[u8] {
        self.outcome.as_ref().map_or(&[], SessionOutcome::err_data)
    }

    pub fn status_data(&self) -> &[u8] {
        self.outcome
            .as_ref()
            .map_or(&[], SessionOutcome::status_data)
    }

    pub fn attribute_data(&self) -> Option<&[u8]> {
        self.outcome.as_ref().and_then(SessionOutcome::attribute_data)
    }

    pub fn out_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.out_data())
    }

    pub fn err_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.err_data())
    }

    pub fn status_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.status_data())
    }

    /// Most recent `USERID_HINT` seen on the status channel.
    pub fn last_user_id_hint(&self) -> Option<UserIdHint> {
        self.shared.lock().last_user_id_hint.clone()
    }

    /// Most recent `NEED_PASSPHRASE` seen on the status channel.
    pub fn last_need_passphrase(&self) -> Option<NeedPassphrase> {
        self.shared.lock().last_need_passphrase.clone()
    }

    /// Caller-supplied arguments (without the protocol flags).
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

/// Clonable, thread-safe cancellation handle. Idempotent: the first call
/// transitions the lifecycle to Cancelled; cancelling a session that never
/// started prevents the spawn entirely.
#[derive(Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if self.shared.request_cancel() {
            info!("gpg session cancel requested");
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{PromptContext, PromptReply};
    use crate::channels::ChildBindings;
    use crate::runner::SpawnedChild;
    use gpgrun_protocol::StatusParser;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        calls: AtomicUsize,
    }

    impl ProcessRunner for CountingRunner {
        fn spawn(
            &self,
            spec: &SpawnSpec,
            _bindings: ChildBindings,
        ) -> Result<SpawnedChild, GpgError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GpgError::ExecutableNotFound(
                spec.program.display().to_string(),
            ))
        }
    }

    #[test]
    fn protocol_flags_precede_caller_arguments() {
        let mut session = GpgSession::with_arguments(["--decrypt"], false);
        session.add_argument("--armor").unwrap();
        let args = session.final_arguments();
        assert_eq!(
            args,
            vec![
                "--no-greeting",
                "--no-tty",
                "--status-fd",
                "3",
                "--command-fd",
                "4",
                "--no-batch",
                "--decrypt",
                "--armor",
            ]
        );
    }

    #[test]
    fn batch_attribute_and_verbose_flags() {
        let session = GpgSession::new(SessionConfig {
            batch_mode: true,
            verbose: true,
            wants_attribute_data: true,
            ..SessionConfig::default()
        });
        let args = session.final_arguments();
        assert!(args.contains(&"--batch".to_string()));
        assert!(!args.contains(&"--no-batch".to_string()));
        assert!(args.contains(&"--attribute-fd".to_string()));
        assert!(args.contains(&"5".to_string()));
        assert!(args.contains(&"--verbose".to_string()));
    }

    #[test]
    fn configuration_is_refused_once_running() {
        let mut session = GpgSession::with_argument("--version");
        assert!(session.shared.begin_running(Some(42)));
        assert!(matches!(
            session.add_argument("--armor"),
            Err(GpgError::AlreadyStarted)
        ));
        assert!(matches!(
            session.add_input_text("data"),
            Err(GpgError::AlreadyStarted)
        ));
        assert_eq!(session.pid(), Some(42));
    }

    #[test]
    fn lifecycle_moves_strictly_forward() {
        let shared = Shared::new();
        assert_eq!(shared.lifecycle(), Lifecycle::NotStarted);
        assert!(shared.begin_running(Some(1)));
        assert_eq!(shared.lifecycle(), Lifecycle::Running);
        assert!(!shared.finish());
        assert_eq!(shared.lifecycle(), Lifecycle::Terminated);
        // Terminal states reject cancellation.
        assert!(!shared.request_cancel());
        assert_eq!(shared.lifecycle(), Lifecycle::Terminated);
    }

    #[test]
    fn cancel_wins_over_finish() {
        let shared = Shared::new();
        assert!(shared.begin_running(None));
        assert!(shared.request_cancel());
        assert!(!shared.request_cancel()); // idempotent
        assert!(shared.finish());
        assert_eq!(shared.lifecycle(), Lifecycle::Cancelled);
    }

    #[test]
    fn status_events_update_hints() {
        let shared = Shared::new();
        let mut parser = StatusParser::new();
        for event in parser.feed(
            b"[GNUPG:] USERID_HINT ABCD1234 Alice <alice@example.org>\n\
              [GNUPG:] NEED_PASSPHRASE 1 2 3\n",
        ) {
            shared.note_event(&event);
        }
        let context = shared.prompt_context();
        let hint = context.last_user_id_hint.unwrap();
        assert_eq!(hint.key_id, "ABCD1234");
        assert_eq!(hint.user_id, "Alice <alice@example.org>");
        let need = context.last_need_passphrase.unwrap();
        assert_eq!(need.main_key_id, "1");
        assert_eq!(need.key_id, "2");
        assert_eq!(need.key_type, Some(3));
    }

    #[tokio::test]
    async fn cancel_before_start_never_spawns() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let mut session = GpgSession::with_argument("--decrypt");
        session.set_runner(runner.clone()).unwrap();

        session.cancel_handle().cancel();
        assert!(session.is_cancelled());

        let exit = session.start().await.unwrap();
        assert_eq!(exit, -1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert!(session.is_cancelled());
        assert_eq!(session.error_code(), GPG_ERR_CANCELED);
        assert!(session.outcome().unwrap().cancelled());
    }

    struct TerminateCounter {
        calls: AtomicUsize,
    }

    impl Responder for TerminateCounter {
        fn on_prompt(
            &self,
            _code: StatusCode,
            _prompt: &str,
            _context: &PromptContext,
        ) -> Option<PromptReply> {
            None
        }

        fn on_terminate(&self, _outcome: &SessionOutcome) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn cancelled_session_settles_exactly_once() {
        let responder = Arc::new(TerminateCounter {
            calls: AtomicUsize::new(0),
        });
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let mut session = GpgSession::with_argument("--decrypt");
        session.set_responder(responder.clone()).unwrap();
        session.set_runner(runner.clone()).unwrap();
        session.cancel_handle().cancel();

        assert_eq!(session.start().await.unwrap(), -1);
        assert_eq!(responder.calls.load(Ordering::SeqCst), 1);

        // The outcome is final; a second start neither replaces it nor
        // notifies the responder again.
        assert!(matches!(session.start().await, Err(GpgError::AlreadyStarted)));
        assert_eq!(responder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
        assert_eq!(session.error_code(), GPG_ERR_CANCELED);
    }

    #[tokio::test]
    async fn second_start_is_refused() {
        let runner = Arc::new(CountingRunner {
            calls: AtomicUsize::new(0),
        });
        let mut session = GpgSession::with_argument("--version");
        session.set_runner(runner).unwrap();
        session.shared.begin_running(None);
        assert!(matches!(session.start().await, Err(GpgError::AlreadyStarted)));
    }
}
