// ffmpeg/ffprobe backed encoder, prober and frame source

use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{ChildStdout, Command, Stdio};
use std::time::Duration;

use serde::Deserialize;

use super::stream::ChildStream;
use super::{Encoder, Frame, FrameSource, FrameStream, PixelFormat, VideoInfo, VideoProber};
use crate::config::Backend;
use crate::error::{PipelineError, Result};
use crate::tools::{ffmpeg_path, ffprobe_path, parse_frame_count, parse_frame_rate, run_with_timeout};

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    streams: Option<Vec<FFprobeStream>>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
    duration: Option<String>,
}

/// Reads frame count, rate and geometry with ffprobe
pub struct FfprobeProber {
    timeout: Duration,
}

impl FfprobeProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl VideoProber for FfprobeProber {
    fn probe(&self, path: &Path) -> Result<VideoInfo> {
        if !path.is_file() {
            return Err(PipelineError::SourceUnreadable(format!("{} does not exist", path.display())));
        }

        let mut cmd = Command::new(ffprobe_path());
        cmd.args([
            "-v", "error",
            "-select_streams", "v:0",
            "-count_packets",
            "-show_entries", "stream=width,height,r_frame_rate,avg_frame_rate,nb_frames,nb_read_packets,duration",
            "-print_format", "json",
        ])
        .arg(path);

        let output = run_with_timeout(cmd, self.timeout, "ffprobe")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PipelineError::SourceUnreadable(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                stderr.trim()
            )));
        }

        parse_probe_output(&output.stdout).map_err(|e| {
            PipelineError::SourceUnreadable(format!("{}: {}", path.display(), e))
        })
    }
}

fn parse_probe_output(stdout: &[u8]) -> std::result::Result<VideoInfo, String> {
    let parsed: FFprobeOutput =
        serde_json::from_slice(stdout).map_err(|e| format!("unparseable ffprobe output: {}", e))?;

    let stream = parsed
        .streams
        .and_then(|s| s.into_iter().next())
        .ok_or_else(|| "no video stream".to_string())?;

    let fps = parse_frame_rate(stream.avg_frame_rate.as_deref())
        .filter(|f| *f > 0.0)
        .or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref()))
        .unwrap_or(0.0);

    let counted = |v: &Option<String>| v.as_deref().and_then(|s| s.parse::<u64>().ok()).filter(|n| *n > 0);
    let total_frames = counted(&stream.nb_frames)
        .or_else(|| counted(&stream.nb_read_packets))
        .or_else(|| {
            let secs: f64 = stream.duration.as_deref()?.parse().ok()?;
            Some((secs * fps).round() as u64)
        })
        .unwrap_or(0);

    Ok(VideoInfo {
        total_frames,
        fps,
        width: stream.width.unwrap_or(0),
        height: stream.height.unwrap_or(0),
    })
}

/// Segment extraction and transcoding through the ffmpeg CLI
pub struct FfmpegEncoder {
    backend: Backend,
    timeout: Duration,
    prober: FfprobeProber,
}

impl FfmpegEncoder {
    pub fn new(backend: Backend, timeout: Duration) -> Self {
        Self { backend, timeout, prober: FfprobeProber::new(timeout) }
    }

    fn run(&self, mut cmd: Command, tmp_path: &Path, out_path: &Path) -> Result<String> {
        cmd.arg(tmp_path);
        let output = match run_with_timeout(cmd, self.timeout, "ffmpeg") {
            Ok(o) => o,
            Err(e) => {
                let _ = std::fs::remove_file(tmp_path);
                return Err(e);
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            let _ = std::fs::remove_file(tmp_path);
            return Err(PipelineError::Capability(format!("ffmpeg failed: {}", tail(&stderr))));
        }

        // Atomic rename
        std::fs::rename(tmp_path, out_path)?;
        Ok(stderr)
    }

    fn codec_args(&self, cmd: &mut Command) {
        cmd.args(["-c:v", self.backend.video_codec()]);
        cmd.args(self.backend.codec_args());
    }
}

impl Encoder for FfmpegEncoder {
    fn extract_segment(
        &self,
        source: &Path,
        start_frame: u64,
        end_frame: u64,
        fps: f64,
        out_path: &Path,
    ) -> Result<u64> {
        let frames = end_frame.saturating_sub(start_frame);
        let start_secs = start_frame as f64 / fps;
        let duration_secs = frames as f64 / fps;

        let mut cmd = Command::new(ffmpeg_path());
        cmd.args(["-y", "-ss", &format!("{:.3}", start_secs)])
            .arg("-i")
            .arg(source)
            .args(["-t", &format!("{:.3}", duration_secs)])
            .args(["-frames:v", &frames.to_string()]);
        self.codec_args(&mut cmd);
        cmd.arg("-an");

        let stderr = self.run(cmd, &tmp_path_for(out_path), out_path)?;
        frames_written(&stderr, out_path, &self.prober)
    }

    fn transcode(&self, source: &Path, out_path: &Path) -> Result<()> {
        let mut cmd = Command::new(ffmpeg_path());
        cmd.arg("-y").arg("-i").arg(source);
        self.codec_args(&mut cmd);
        cmd.args(["-c:a", "aac"]);

        self.run(cmd, &tmp_path_for(out_path), out_path)?;
        Ok(())
    }
}

/// Raw frame decoding piped from ffmpeg's rawvideo muxer
pub struct FfmpegFrameSource {
    prober: FfprobeProber,
    timeout: Duration,
}

impl FfmpegFrameSource {
    pub fn new(timeout: Duration) -> Self {
        Self { prober: FfprobeProber::new(timeout), timeout }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn frames(&self, path: &Path, every_nth: u64, format: PixelFormat) -> Result<FrameStream<'_>> {
        let info = self.prober.probe(path)?;
        if info.width == 0 || info.height == 0 {
            return Err(PipelineError::SourceUnreadable(format!(
                "{} has no frame geometry",
                path.display()
            )));
        }

        let every_nth = every_nth.max(1);
        let mut cmd = Command::new(ffmpeg_path());
        cmd.args(["-v", "error", "-nostdin"])
            .arg("-i")
            .arg(path)
            .args(["-vf", &format!("select=not(mod(n\\,{}))", every_nth)])
            .args(["-fps_mode", "passthrough"])
            .args(["-f", "rawvideo", "-pix_fmt", format.ffmpeg_name(), "pipe:1"])
            .stdin(Stdio::null());

        let (width, height) = (info.width, info.height);
        let frame_len = Frame::byte_len(width, height, format);
        let mut sampled: u64 = 0;

        let stream = ChildStream::spawn(cmd, self.timeout, "ffmpeg-frames", move |reader| {
            let data = match read_frame(reader, frame_len)? {
                Some(d) => d,
                None => return Ok(None),
            };
            let frame = Frame { index: sampled * every_nth, width, height, format, data };
            sampled += 1;
            Ok(Some(frame))
        })?;

        Ok(Box::new(stream))
    }
}

/// Read exactly one frame. A clean EOF or a truncated trailing frame ends the stream.
fn read_frame(reader: &mut BufReader<ChildStdout>, frame_len: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut buf = vec![0u8; frame_len];
    let mut filled = 0;
    while filled < frame_len {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => {
                if filled > 0 {
                    log::debug!("Dropping truncated trailing frame ({} of {} bytes)", filled, frame_len);
                }
                return Ok(None);
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Some(buf))
}

/// ffmpeg's last `frame=` counter, or a probe of the written file when it printed none
fn frames_written(stderr: &str, out_path: &Path, prober: &dyn VideoProber) -> Result<u64> {
    if let Some(n) = parse_frame_count(stderr) {
        return Ok(n);
    }
    log::debug!("No frame counter from ffmpeg, probing {}", out_path.display());
    Ok(prober.probe(out_path)?.total_frames)
}

/// `chunk_0003.mp4` -> `chunk_0003.tmp.mp4`
fn tmp_path_for(out_path: &Path) -> PathBuf {
    let ext = out_path.extension().and_then(|e| e.to_str()).unwrap_or("mp4");
    out_path.with_extension(format!("tmp.{}", ext))
}

fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(3);
    lines[start..].join(" | ")
}
