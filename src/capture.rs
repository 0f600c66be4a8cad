//! Ways of reading the target's stdout.
//!
//! Neither strategy can interrupt a read that is already blocked in the OS. Giving up only
//! stops the harness from waiting; the reader task keeps its end of the pipe until its
//! [`ReaderTask`] is dropped or the child is killed, whichever comes first.

use std::{io, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    sync::oneshot,
    task::JoinHandle,
    time::{self, Instant},
};

use crate::error::ScenarioError;

const CHUNK: usize = 4096;

/// Background reader for one scenario. Aborted when dropped.
#[derive(Debug)]
pub(crate) struct ReaderTask(JoinHandle<()>);

impl Drop for ReaderTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Waits for the first `\n`-terminated line, racing a reader task against `timeout`.
///
/// A stream that closes after a partial line yields the partial bytes. A stream that closes
/// before producing anything is a read failure.
pub(crate) async fn first_line<R>(
    stdout: R,
    timeout: Duration,
) -> (Result<Vec<u8>, ScenarioError>, ReaderTask)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let task = ReaderTask(tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        let read = reader.read_until(b'\n', &mut line).await;
        // The receiver is gone once the harness has stopped waiting.
        let _ = tx.send(read.map(|_| line));
    }));

    let result = match time::timeout(timeout, rx).await {
        Ok(Ok(Ok(line))) if line.is_empty() => Err(ScenarioError::ReadFailed(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "stdout closed before any output",
        ))),
        Ok(Ok(Ok(line))) => Ok(line),
        Ok(Ok(Err(err))) => Err(ScenarioError::ReadFailed(err)),
        Ok(Err(_)) => Err(ScenarioError::ReadFailed(io::Error::other(
            "reader task ended without a result",
        ))),
        Err(_) => Err(ScenarioError::TimedOut { timeout }),
    };
    (result, task)
}

/// Sleeps for `wait`, then returns everything the target wrote so far.
pub(crate) async fn snapshot<R>(
    stdout: R,
    wait: Duration,
) -> (Result<Vec<u8>, ScenarioError>, ReaderTask)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let failure = Arc::new(Mutex::new(None::<io::Error>));

    let sink = Arc::clone(&buffer);
    let failed = Arc::clone(&failure);
    let task = ReaderTask(tokio::spawn(async move {
        let mut stdout = stdout;
        let mut chunk = [0u8; CHUNK];
        loop {
            match stdout.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
                Err(err) => {
                    *failed.lock() = Some(err);
                    break;
                }
            }
        }
    }));

    time::sleep(wait).await;

    let captured = buffer.lock().clone();
    let result = match failure.lock().take() {
        Some(err) => Err(ScenarioError::ReadFailed(err)),
        None => Ok(captured),
    };
    (result, task)
}

/// Output gathered by [`scan`].
#[derive(Debug)]
pub(crate) struct Scan {
    pub output: Vec<u8>,
    pub seen: bool,
}

/// Reads for at most `window`, stopping early once `seen` accepts the accumulated output.
///
/// The target is expected to stay up for the whole window: end of stream before the window
/// elapses is a read failure, not a quiet window.
pub(crate) async fn scan<R, F>(
    mut stdout: R,
    window: Duration,
    mut seen: F,
) -> Result<Scan, ScenarioError>
where
    R: AsyncRead + Unpin,
    F: FnMut(&[u8]) -> bool,
{
    let deadline = Instant::now() + window;
    let mut output = Vec::new();
    let mut chunk = [0u8; CHUNK];
    loop {
        match time::timeout_at(deadline, stdout.read(&mut chunk)).await {
            Err(_) => return Ok(Scan { output, seen: false }),
            Ok(Ok(0)) => {
                return Err(ScenarioError::ReadFailed(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "stdout closed before the window elapsed, output so far: `{}`",
                        String::from_utf8_lossy(&output)
                    ),
                )));
            }
            Ok(Ok(n)) => {
                output.extend_from_slice(&chunk[..n]);
                if seen(&output) {
                    return Ok(Scan { output, seen: true });
                }
            }
            Ok(Err(err)) => return Err(ScenarioError::ReadFailed(err)),
        }
    }
}
