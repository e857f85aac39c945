// Detector and tracker capabilities backed by external programs speaking JSON lines
//
// Tracker: spawned once per chunk with `--source <chunk> --device <dev> --conf <c> --iou <i>`,
// prints one `{"frame_index", "track_id", "bbox": [x1,y1,x2,y2], "confidence"}` per line.
//
// Detector: one long-lived process started with `--device <dev> --conf <c>`. For every frame
// it receives a header line `{"width", "height", "format"}` followed by the raw pixel bytes,
// and answers with one line `[{"bbox": [...], "confidence": ...}, ...]`.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{ChildStdout, Command, Stdio};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use super::stream::ChildStream;
use super::{Detection, DetectionStream, Detector, Frame, PixelFormat, TrackedDetection, Tracker};
use crate::config::{Backend, CommandSpec};
use crate::error::{PipelineError, Result};

fn read_line(reader: &mut BufReader<ChildStdout>) -> std::io::Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn base_command(spec: &CommandSpec, backend: Backend) -> Command {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args).args(["--device", backend.device()]);
    cmd
}

/// Parse one tracker output line; blank lines yield `None`.
pub(crate) fn parse_tracker_line(line: &str) -> Option<Result<TrackedDetection>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line).map_err(|e| {
        PipelineError::Capability(format!("tracker emitted malformed line {:?}: {}", line, e))
    }))
}

pub struct CommandTracker {
    spec: CommandSpec,
    backend: Backend,
    conf_threshold: f64,
    iou_threshold: f64,
    timeout: Duration,
}

impl CommandTracker {
    pub fn new(spec: CommandSpec, backend: Backend, conf_threshold: f64, iou_threshold: f64, timeout: Duration) -> Self {
        Self { spec, backend, conf_threshold, iou_threshold, timeout }
    }
}

impl Tracker for CommandTracker {
    fn track(&self, chunk_path: &Path) -> Result<DetectionStream<'_>> {
        let mut cmd = base_command(&self.spec, self.backend);
        cmd.arg("--source")
            .arg(chunk_path)
            .args(["--conf", &self.conf_threshold.to_string()])
            .args(["--iou", &self.iou_threshold.to_string()])
            .stdin(Stdio::null());

        let stream = ChildStream::spawn(cmd, self.timeout, "tracker", read_line)?;
        Ok(Box::new(stream.filter_map(|line| match line {
            Ok(l) => parse_tracker_line(&l),
            Err(e) => Some(Err(e)),
        })))
    }
}

#[derive(Serialize)]
struct FrameHeader {
    width: u32,
    height: u32,
    format: PixelFormat,
}

pub struct CommandDetector {
    spec: CommandSpec,
    backend: Backend,
    conf_threshold: f64,
    timeout: Duration,
    process: Mutex<Option<ChildStream<String>>>,
}

impl CommandDetector {
    pub fn new(spec: CommandSpec, backend: Backend, conf_threshold: f64, timeout: Duration) -> Self {
        Self { spec, backend, conf_threshold, timeout, process: Mutex::new(None) }
    }

    fn spawn(&self) -> Result<ChildStream<String>> {
        let mut cmd = base_command(&self.spec, self.backend);
        cmd.args(["--conf", &self.conf_threshold.to_string()])
            .stdin(Stdio::piped());
        ChildStream::spawn(cmd, self.timeout, "detector", read_line)
    }

    fn exchange(process: &mut ChildStream<String>, frame: &Frame) -> Result<Vec<Detection>> {
        let header = FrameHeader { width: frame.width, height: frame.height, format: frame.format };
        let stdin = process
            .stdin()
            .ok_or_else(|| PipelineError::Capability("detector stdin closed".to_string()))?;

        let write = |stdin: &mut std::process::ChildStdin| -> std::io::Result<()> {
            serde_json::to_writer(&mut *stdin, &header)?;
            stdin.write_all(b"\n")?;
            stdin.write_all(&frame.data)?;
            stdin.flush()
        };
        write(stdin).map_err(|e| PipelineError::Capability(format!("detector write failed: {}", e)))?;

        let line = match process.next_item() {
            Some(line) => line?,
            None => return Err(PipelineError::Capability("detector exited mid-stream".to_string())),
        };
        serde_json::from_str(line.trim()).map_err(|e| {
            PipelineError::Capability(format!("detector emitted malformed line {:?}: {}", line.trim(), e))
        })
    }
}

impl Detector for CommandDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut guard = self
            .process
            .lock()
            .map_err(|_| PipelineError::Capability("detector lock poisoned".to_string()))?;

        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }

        let result = match guard.as_mut() {
            Some(process) => Self::exchange(process, frame),
            None => Err(PipelineError::Capability("detector not running".to_string())),
        };

        // A broken exchange leaves the protocol out of sync; restart on next use
        if result.is_err() {
            *guard = None;
        }
        result
    }
}
