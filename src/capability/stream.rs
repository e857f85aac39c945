// Child process whose stdout is consumed item-by-item with a per-item timeout

use std::io::BufReader;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// A reader thread parses stdout into items and hands them over a channel,
/// so a hung child is detected by `recv_timeout` instead of a blocking read.
pub(crate) struct ChildStream<T> {
    child: Child,
    rx: Receiver<std::io::Result<T>>,
    timeout: Duration,
    label: String,
    done: bool,
}

impl<T: Send + 'static> ChildStream<T> {
    /// Spawn `cmd` with stdout piped. `read_item` returns `Ok(None)` at end of stream.
    pub fn spawn<F>(mut cmd: Command, timeout: Duration, label: &str, mut read_item: F) -> Result<Self>
    where
        F: FnMut(&mut BufReader<ChildStdout>) -> std::io::Result<Option<T>> + Send + 'static,
    {
        let mut child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| PipelineError::Capability(format!("{}: failed to start: {}", label, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Capability(format!("{}: stdout not captured", label)))?;

        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name(format!("{}-reader", label))
            .spawn(move || {
                let mut reader = BufReader::new(stdout);
                loop {
                    match read_item(&mut reader) {
                        Ok(Some(item)) => {
                            if tx.send(Ok(item)).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })?;

        Ok(ChildStream {
            child,
            rx,
            timeout,
            label: label.to_string(),
            done: false,
        })
    }

    pub fn stdin(&mut self) -> Option<&mut ChildStdin> {
        self.child.stdin.as_mut()
    }

    /// Next item, `None` once the child exited cleanly
    pub fn next_item(&mut self) -> Option<Result<T>> {
        if self.done {
            return None;
        }

        match self.rx.recv_timeout(self.timeout) {
            Ok(Ok(item)) => Some(Ok(item)),
            Ok(Err(e)) => {
                self.finish();
                Some(Err(PipelineError::Capability(format!("{}: read failed: {}", self.label, e))))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.finish();
                Some(Err(PipelineError::Capability(format!(
                    "{}: no output for {}s, killed",
                    self.label,
                    self.timeout.as_secs()
                ))))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.done = true;
                match self.child.wait() {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some(Err(PipelineError::Capability(format!(
                        "{}: exited with {}",
                        self.label, status
                    )))),
                    Err(e) => Some(Err(e.into())),
                }
            }
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl<T: Send + 'static> Iterator for ChildStream<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item()
    }
}

impl<T> Drop for ChildStream<T> {
    fn drop(&mut self) {
        if !self.done {
            // Killing closes stdout, which ends the reader thread
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
