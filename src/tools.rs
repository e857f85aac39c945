// External tool resolver and subprocess helpers for ffmpeg/ffprobe and command capabilities
//
// Resolution order:
// 1) Environment variable override (SURVEIL_FFMPEG_PATH, SURVEIL_FFPROBE_PATH)
// 2) Binary next to the executable (or its bin/ subdirectory)
// 3) PATH fallback

use std::env;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::error::{PipelineError, Result};

/// Get the directory containing the current executable
fn exe_dir() -> Option<PathBuf> {
    env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
}

/// Resolve an external tool path.
fn resolve_tool(env_key: &str, default_name: &str) -> PathBuf {
    if let Ok(v) = env::var(env_key) {
        let p = PathBuf::from(&v);
        if p.exists() {
            return p;
        }
    }

    let mut filename = default_name.to_string();
    if cfg!(windows) && !filename.to_lowercase().ends_with(".exe") {
        filename.push_str(".exe");
    }

    if let Some(dir) = exe_dir() {
        let candidate = dir.join(&filename);
        if candidate.exists() {
            return candidate;
        }

        let bin_candidate = dir.join("bin").join(&filename);
        if bin_candidate.exists() {
            return bin_candidate;
        }
    }

    PathBuf::from(default_name)
}

/// Get path to ffprobe binary
pub fn ffprobe_path() -> PathBuf {
    resolve_tool("SURVEIL_FFPROBE_PATH", "ffprobe")
}

/// Get path to ffmpeg binary
pub fn ffmpeg_path() -> PathBuf {
    resolve_tool("SURVEIL_FFMPEG_PATH", "ffmpeg")
}

/// Check if a tool is available at the resolved path
pub fn is_tool_available(tool: &str) -> bool {
    let path = match tool {
        "ffprobe" => ffprobe_path(),
        "ffmpeg" => ffmpeg_path(),
        _ => return false,
    };

    if path.exists() {
        return true;
    }

    Command::new(&path)
        .arg("-version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run a command to completion, killing it once `timeout` elapses.
/// A timeout or a spawn failure surfaces as a capability failure.
pub fn run_with_timeout(mut cmd: Command, timeout: Duration, label: &str) -> Result<Output> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PipelineError::Capability(format!("{}: failed to start: {}", label, e)))?;

    // Drain pipes on their own threads so a chatty child never blocks on a full pipe
    let stdout_reader = child.stdout.take().map(spawn_drain);
    let stderr_reader = child.stderr.take().map(spawn_drain);

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::Capability(format!(
                "{}: timed out after {}s",
                label,
                timeout.as_secs()
            )));
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let stdout = stdout_reader.map(join_drain).unwrap_or_default();
    let stderr = stderr_reader.map(join_drain).unwrap_or_default();

    Ok(Output { status, stdout, stderr })
}

fn spawn_drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: std::thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

static FRAME_COUNTER: OnceLock<Option<Regex>> = OnceLock::new();

/// Last `frame=` counter from ffmpeg progress output
pub fn parse_frame_count(stderr: &str) -> Option<u64> {
    let re = FRAME_COUNTER
        .get_or_init(|| Regex::new(r"frame=\s*(\d+)").ok())
        .as_ref()?;
    re.captures_iter(stderr)
        .last()
        .and_then(|cap| cap.get(1)?.as_str().parse::<u64>().ok())
}

/// Parse frame rate string like "30000/1001" to f64
pub fn parse_frame_rate(rate_str: Option<&str>) -> Option<f64> {
    let rate_str = rate_str?;
    if let Some((num, den)) = rate_str.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate_str.parse().ok()
}
