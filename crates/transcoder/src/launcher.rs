use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use hlsbridge_core::types::{SessionConfig, TranscodeMode};
use hlsbridge_core::uri;
use tokio::process::{Child, ChildStderr, Command};
use tracing::{info, warn};

use crate::area::OutputArea;
use crate::{LaunchError, TranscoderConfig};

const FFMPEG_BINARY: &str = "ffmpeg";

/// How long `terminate` waits for the child to be reaped.
const TERMINATE_WAIT: Duration = Duration::from_secs(5);

/// A running transcoder child process.
#[derive(Debug)]
pub struct TranscodeProcess {
    child: Child,
    pid: Option<u32>,
    args: Vec<String>,
}

impl TranscodeProcess {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Hand the diagnostic pipe to a reader. Returns `None` after the first call.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// `Some(status)` once the child has exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    pub fn is_running(&mut self) -> bool {
        self.try_exit_status().is_none()
    }

    /// Kill the child and reap it. Returns the exit code if one was reported.
    pub async fn terminate(mut self) -> Option<i32> {
        if let Some(status) = self.try_exit_status() {
            return status.code();
        }
        if let Err(e) = self.child.start_kill() {
            warn!(pid = ?self.pid, error = %e, "failed to signal ffmpeg");
        }
        match tokio::time::timeout(TERMINATE_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(pid = ?self.pid, %status, "ffmpeg terminated");
                status.code()
            }
            Ok(Err(e)) => {
                warn!(pid = ?self.pid, error = %e, "failed to reap ffmpeg");
                None
            }
            Err(_) => {
                warn!(pid = ?self.pid, "ffmpeg did not exit after kill");
                None
            }
        }
    }
}

/// Builds transcoder command lines and spawns them.
#[derive(Debug, Clone)]
pub struct Launcher {
    config: TranscoderConfig,
}

impl Launcher {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TranscoderConfig {
        &self.config
    }

    /// Spawn ffmpeg for `session`, writing into `area` when one is given.
    ///
    /// The source URI is validated before anything else, so a bad URI never
    /// spawns a process. No retries.
    pub fn start(
        &self,
        session: &SessionConfig,
        area: Option<&OutputArea>,
    ) -> Result<TranscodeProcess, LaunchError> {
        let source = uri::authenticated_uri(
            &session.source_uri,
            session.login.as_deref(),
            session.password.as_deref(),
        )
        .map_err(|_| LaunchError::BadUri(session.source_uri.clone()))?;

        let ffmpeg = locate_ffmpeg(self.config.ffmpeg_path.as_deref())?;
        let output = area
            .filter(|_| session.needs_output_area())
            .map(OutputArea::index_path);
        let args = build_arguments(session, &source, output, self.config.hls_time_secs);

        let mut child = Command::new(&ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    LaunchError::ExecutableNotFound(ffmpeg.clone())
                } else {
                    LaunchError::ProcessDidNotStart(format!("spawn: {e}"))
                }
            })?;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(LaunchError::ProcessDidNotStart(format!(
                "exited immediately ({status})"
            )));
        }

        let pid = child.id();
        info!(
            ?ffmpeg,
            ?pid,
            source = %uri::redacted(&source),
            raw = session.mode.is_raw(),
            "spawned ffmpeg"
        );
        Ok(TranscodeProcess { child, pid, args })
    }
}

/// Full argument list for one session, output path last.
pub fn build_arguments(
    session: &SessionConfig,
    source: &str,
    output: Option<&Path>,
    hls_time_secs: u32,
) -> Vec<String> {
    let mut args = match &session.mode {
        TranscodeMode::Standard => standard_arguments(source, hls_time_secs),
        TranscodeMode::Raw(raw) => parse_raw_arguments(raw),
    };
    if let Some(output) = output {
        args.push(output.to_string_lossy().into_owned());
    }
    args
}

/// The built-in RTSP → HLS argument set.
pub fn standard_arguments(source: &str, hls_time_secs: u32) -> Vec<String> {
    let mut args: Vec<String> = vec!["-i".into(), source.into()];

    // H.264 at a middling quality, tuned for latency over size
    args.extend([
        "-c:v".into(),
        "libx264".into(),
        "-crf".into(),
        "21".into(),
        "-preset".into(),
        "superfast".into(),
        "-g".into(),
        "30".into(),
        // No scene-cut keyframes, so slices stay regular
        "-sc_threshold".into(),
        "0".into(),
    ]);

    // Rolling HLS window; ffmpeg deletes segments that fall out of it
    args.extend([
        "-f".into(),
        "hls".into(),
        "-hls_flags".into(),
        "delete_segments".into(),
        "-hls_time".into(),
        hls_time_secs.to_string(),
    ]);

    args
}

/// Parse operator-supplied `flag value` lines.
///
/// Each line is split at its first whitespace run. Lines without both a flag
/// and a value are dropped without complaint.
pub fn parse_raw_arguments(raw: &str) -> Vec<String> {
    let mut args = Vec::new();
    for line in raw.lines() {
        let Some((flag, value)) = line.trim().split_once(char::is_whitespace) else {
            continue;
        };
        let (flag, value) = (flag.trim(), value.trim());
        if !flag.is_empty() && !value.is_empty() {
            args.push(flag.to_string());
            args.push(value.to_string());
        }
    }
    args
}

/// Find the ffmpeg binary: explicit path, then next to the running
/// executable, then on `PATH`.
pub fn locate_ffmpeg(explicit: Option<&Path>) -> Result<PathBuf, LaunchError> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(LaunchError::ExecutableNotFound(path.to_path_buf()))
        };
    }

    if let Some(bundled) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(FFMPEG_BINARY)))
    {
        if bundled.is_file() {
            return Ok(bundled);
        }
    }

    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths)
                .map(|dir| dir.join(FFMPEG_BINARY))
                .find(|candidate| candidate.is_file())
        })
        .ok_or_else(|| LaunchError::ExecutableNotFound(PathBuf::from(FFMPEG_BINARY)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_arguments_drop_malformed_lines() {
        assert_eq!(parse_raw_arguments("-c:v\n\n-crf 21"), vec!["-crf", "21"]);
    }

    #[test]
    fn raw_arguments_keep_value_whitespace() {
        let args = parse_raw_arguments("  -i   rtsp://cam/live \n-vf scale=640:-1, fps=15\r\n-f hls");
        assert_eq!(
            args,
            vec!["-i", "rtsp://cam/live", "-vf", "scale=640:-1, fps=15", "-f", "hls"]
        );
    }

    #[test]
    fn raw_arguments_empty() {
        assert!(parse_raw_arguments("").is_empty());
        assert!(parse_raw_arguments("\n \n\t").is_empty());
    }

    #[test]
    fn standard_arguments_layout() {
        let args = standard_arguments("rtsp://cam/live", 2);
        assert_eq!(&args[..2], ["-i", "rtsp://cam/live"]);
        let joined = args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-crf 21"));
        assert!(joined.contains("-preset superfast"));
        assert!(joined.contains("-g 30"));
        assert!(joined.contains("-sc_threshold 0"));
        assert!(joined.contains("-f hls"));
        assert!(joined.contains("-hls_flags delete_segments"));
        assert!(joined.ends_with("-hls_time 2"));
    }

    #[test]
    fn output_path_appended_last() {
        let session = SessionConfig::new("rtsp://cam/live", 8080, "Test");
        let args = build_arguments(
            &session,
            "rtsp://cam/live",
            Some(Path::new("/tmp/html-x/stream.m3u8")),
            6,
        );
        assert_eq!(args.last().map(String::as_str), Some("/tmp/html-x/stream.m3u8"));
        assert!(args.join(" ").contains("-hls_time 6"));
    }

    #[test]
    fn raw_mode_has_no_implicit_input() {
        let session = SessionConfig::new("rtsp://cam/live", 8080, "Test")
            .with_mode(TranscodeMode::Raw("-f mpegts".into()));
        let args = build_arguments(&session, "rtsp://cam/live", None, 2);
        assert_eq!(args, vec!["-f", "mpegts"]);
    }

    #[test]
    fn bad_uri_spawns_nothing() {
        let launcher = Launcher::new(TranscoderConfig {
            // Would be reported as ExecutableNotFound if the URI passed
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ..Default::default()
        });
        let session = SessionConfig::new("rtsp:///live", 8080, "Test");
        let err = launcher.start(&session, None).unwrap_err();
        assert!(matches!(err, LaunchError::BadUri(_)));
    }

    #[test]
    fn missing_explicit_binary() {
        let err = locate_ffmpeg(Some(Path::new("/nonexistent/ffmpeg"))).unwrap_err();
        assert!(matches!(err, LaunchError::ExecutableNotFound(p) if p == Path::new("/nonexistent/ffmpeg")));
    }

    #[tokio::test]
    async fn missing_transcoder_is_reported() {
        let launcher = Launcher::new(TranscoderConfig {
            ffmpeg_path: Some(PathBuf::from("/nonexistent/ffmpeg")),
            ..Default::default()
        });
        let session = SessionConfig::new("rtsp://cam.local/live", 8080, "Test");
        let err = launcher.start(&session, None).unwrap_err();
        assert!(matches!(err, LaunchError::ExecutableNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_and_terminate() {
        let launcher = Launcher::new(TranscoderConfig {
            ffmpeg_path: Some(PathBuf::from("/bin/sh")),
            ..Default::default()
        });
        let session = SessionConfig::new("rtsp://cam.local/live", 8080, "Test")
            .with_mode(TranscodeMode::Raw("-c exec sleep 30".into()))
            .with_http_server(false);
        let mut process = launcher.start(&session, None).unwrap();
        assert_eq!(process.args(), ["-c", "exec sleep 30"]);
        assert!(process.pid().is_some());
        assert!(process.is_running());
        assert!(process.take_stderr().is_some());
        assert!(process.take_stderr().is_none());
        process.terminate().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_observed_after_exit() {
        let launcher = Launcher::new(TranscoderConfig {
            ffmpeg_path: Some(PathBuf::from("/bin/sh")),
            ..Default::default()
        });
        let session = SessionConfig::new("rtsp://cam.local/live", 8080, "Test")
            .with_mode(TranscodeMode::Raw("-c sleep 0.2; exit 4".into()))
            .with_http_server(false);
        let mut process = launcher.start(&session, None).unwrap();
        assert!(process.try_exit_status().is_none());

        let status = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(status) = process.try_exit_status() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(status.code(), Some(4));
        assert!(!process.is_running());
        assert_eq!(process.terminate().await, Some(4));
    }
}
