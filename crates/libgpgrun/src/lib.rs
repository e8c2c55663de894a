//! Drives a GnuPG binary as a subprocess over six concurrent pipe channels
//! (stdin, stdout, stderr, status, command, optional attribute), decoding
//! the machine-readable status protocol and answering interactive prompts
//! through a caller-supplied [`Responder`].
//!
//! ```no_run
//! use libgpgrun::{GpgSession, SessionConfig};
//!
//! # async fn demo() -> Result<(), libgpgrun::GpgError> {
//! let mut session = GpgSession::with_arguments(["--list-keys"], true);
//! let exit = session.start().await?;
//! println!("exit {exit}: {}", session.out_text());
//! # Ok(())
//! # }
//! ```

mod bridge;
mod channels;
mod error;
mod outcome;
mod pump;
pub mod resolve;
mod runner;
mod session;

pub use bridge::{GPG_ERR_CANCELED, NoResponsePolicy, PromptContext, PromptReply, Responder};
pub use gpgrun_protocol::{NeedPassphrase, StatusCode, StatusEvent, UserIdHint};
pub use channels::ChildBindings;
pub use error::GpgError;
pub use outcome::SessionOutcome;
pub use runner::{ProcessRunner, SpawnSpec, SpawnedChild, TokioRunner};
pub use session::{CancelHandle, GpgSession, SessionConfig};
