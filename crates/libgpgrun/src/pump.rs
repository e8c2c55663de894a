use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::process::ExitStatus;
use std::sync::Arc;

use gpgrun_protocol::{StatusCode, StatusEvent, StatusParser, event::error_code_from_payload};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::bridge::DelegateBridge;
use crate::channels::ParentChannels;
use crate::runner::SpawnedChild;
use crate::session::Shared;

const READ_CHUNK: usize = 8192;

pub(crate) struct PumpOutput {
    pub out: Vec<u8>,
    pub err: Vec<u8>,
    pub status: Vec<u8>,
    pub attribute: Option<Vec<u8>>,
    /// Error code reported over the status channel or by the no-response
    /// policy, if any.
    pub error_code: Option<u32>,
    pub exit: ExitStatus,
}

/// Pumps all channels concurrently until the child has exited and every
/// read channel reached end-of-stream.
///
/// One blocking worker per channel: the child may stall writing to any of
/// its output pipes while waiting for stdin to drain (or the reverse), so
/// draining them sequentially can deadlock once an OS pipe buffer fills.
/// Cancellation kills the child's whole process group; with every holder
/// of the far pipe ends gone, in-flight reads see end-of-stream and
/// in-flight writes see a broken pipe.
pub(crate) async fn run(
    mut child: SpawnedChild,
    channels: ParentChannels,
    input: Vec<Vec<u8>>,
    bridge: DelegateBridge,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) -> io::Result<PumpOutput> {
    let ParentChannels {
        stdin,
        stdout,
        stderr,
        status,
        command,
        attribute,
    } = channels;

    let stdin_worker = {
        let cancel = cancel.clone();
        task::spawn_blocking(move || feed_input(stdin, input, &cancel))
    };
    let stdout_worker = {
        let cancel = cancel.clone();
        task::spawn_blocking(move || drain(stdout, &cancel, "stdout"))
    };
    let stderr_worker = {
        let cancel = cancel.clone();
        task::spawn_blocking(move || drain(stderr, &cancel, "stderr"))
    };
    let attribute_worker = attribute.map(|pipe| {
        let cancel = cancel.clone();
        task::spawn_blocking(move || drain(pipe, &cancel, "attribute"))
    });
    let status_worker = {
        let cancel = cancel.clone();
        let shared = Arc::clone(&shared);
        task::spawn_blocking(move || pump_status(status, command, bridge, shared, &cancel))
    };

    let exit = tokio::select! {
        res = child.wait() => res?,
        () = cancel.cancelled() => {
            if let Err(e) = child.kill_group() {
                debug!(error = %e, "kill after cancel failed");
            }
            child.wait().await?
        }
    };
    debug!(code = ?exit.code(), "gpg child exited");

    // The write worker unblocks on broken pipe once the child is gone; the
    // read workers end at EOF. Child exit alone is not completion.
    join(stdin_worker).await?;
    let out = join(stdout_worker).await?;
    let err = join(stderr_worker).await?;
    let attribute = match attribute_worker {
        Some(worker) => Some(join(worker).await?),
        None => None,
    };
    let (status, error_code) = join(status_worker).await?;

    Ok(PumpOutput {
        out,
        err,
        status,
        attribute,
        error_code,
        exit,
    })
}

async fn join<T>(handle: task::JoinHandle<T>) -> io::Result<T> {
    handle.await.map_err(io::Error::other)
}

/// Write worker: drains the queued input blocks in order, then closes the
/// channel by dropping the writer — exactly once, never before the queue
/// is exhausted. A broken pipe ends the worker without failing the run.
fn feed_input(mut stdin: PipeWriter, blocks: Vec<Vec<u8>>, cancel: &CancellationToken) {
    for block in blocks {
        if cancel.is_cancelled() {
            break;
        }
        if let Err(e) = stdin.write_all(&block) {
            debug!(error = %e, "stdin write ended early");
            break;
        }
    }
}

/// Read worker: appends to its own buffer until end-of-stream. Nobody else
/// touches the buffer, so no locking. After cancellation the worker stops
/// reading; bytes already captured are kept.
fn drain(mut pipe: PipeReader, cancel: &CancellationToken, channel: &'static str) -> Vec<u8> {
    let mut captured = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                captured.extend_from_slice(&buf[..n]);
                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(channel, error = %e, "read ended");
                break;
            }
        }
    }
    trace!(channel, bytes = captured.len(), "channel drained");
    captured
}

/// Status worker: raw capture plus incremental decode. Interactive events
/// are answered through the bridge before the next line is consumed, so
/// ordering within the status channel is preserved; this is the one worker
/// allowed to block on the responder.
fn pump_status(
    mut status: PipeReader,
    mut command: PipeWriter,
    bridge: DelegateBridge,
    shared: Arc<Shared>,
    cancel: &CancellationToken,
) -> (Vec<u8>, Option<u32>) {
    let mut parser = StatusParser::new();
    let mut captured = Vec::new();
    let mut reported = None;
    let mut policy_code = None;
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match status.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                captured.extend_from_slice(&buf[..n]);
                for event in parser.feed(&buf[..n]) {
                    handle_event(
                        &event,
                        &bridge,
                        &shared,
                        &mut command,
                        &mut reported,
                        &mut policy_code,
                    );
                }
                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "status read ended");
                break;
            }
        }
    }
    if let Some(event) = parser.finish() {
        handle_event(
            &event,
            &bridge,
            &shared,
            &mut command,
            &mut reported,
            &mut policy_code,
        );
    }
    trace!(bytes = captured.len(), "status channel drained");
    (captured, reported.or(policy_code))
}

fn handle_event(
    event: &StatusEvent,
    bridge: &DelegateBridge,
    shared: &Shared,
    command: &mut PipeWriter,
    reported: &mut Option<u32>,
    policy_code: &mut Option<u32>,
) {
    trace!(keyword = %event.keyword, payload = %event.payload, "status event");
    shared.note_event(event);

    if matches!(event.code, StatusCode::Error | StatusCode::Failure)
        && reported.is_none()
        && let Some(code) = error_code_from_payload(&event.payload)
    {
        debug!(keyword = %event.keyword, code, "child reported failure");
        *reported = Some(code);
    }

    if event.needs_response() {
        let context = shared.prompt_context();
        match bridge.respond(event, &context, command) {
            Ok(Some(code)) => {
                policy_code.get_or_insert(code);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "command channel write failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn drain_reads_to_eof() {
        let (read, mut write) = io::pipe().unwrap();
        let writer = std::thread::spawn(move || {
            for _ in 0..100 {
                write.write_all(&[7u8; 1000]).unwrap();
            }
        });
        let captured = drain(read, &CancellationToken::new(), "test");
        writer.join().unwrap();
        assert_eq!(captured.len(), 100_000);
        assert!(captured.iter().all(|&b| b == 7));
    }

    #[test]
    fn feed_input_writes_blocks_in_order_then_closes() {
        let (mut read, write) = io::pipe().unwrap();
        let writer = std::thread::spawn(move || {
            feed_input(
                write,
                vec![b"alpha".to_vec(), b"beta".to_vec()],
                &CancellationToken::new(),
            );
        });
        let mut all = Vec::new();
        read.read_to_end(&mut all).unwrap(); // returns only once the writer dropped
        writer.join().unwrap();
        assert_eq!(all, b"alphabeta");
    }

    #[test]
    fn feed_input_survives_closed_reader() {
        let (read, write) = io::pipe().unwrap();
        drop(read);
        // 128 KiB exceeds any default pipe buffer; must not panic or hang.
        feed_input(
            write,
            vec![vec![0u8; 128 * 1024]],
            &CancellationToken::new(),
        );
    }
}
