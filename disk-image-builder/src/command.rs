use crate::{BuildContext, DiskImageBuilder, Request, duration::format_duration};
use anyhow::{Context, Result, anyhow, bail};
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader},
    process::{ChildStdin, Command},
    task::JoinSet,
};
use tracing::{debug, info, warn};

/// Program used when no other builder program is configured.
pub const DEFAULT_PROGRAM: &str = "gke-disk-image-builder-backend";

/// How long to keep reading output after the program exits. Background
/// processes it leaves behind may hold the pipes open indefinitely.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Delegates the build to an external program.
///
/// The program receives the JSON encoded [`Request`] on stdin. Its output is
/// forwarded to the log line by line and its exit status decides whether
/// the build succeeded. Output still arriving after the program exits is
/// only read for a short grace period.
#[derive(Clone, Debug)]
pub struct CommandBuilder {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandBuilder {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

async fn send_request(mut stdin: ChildStdin, payload: Vec<u8>) -> std::io::Result<()> {
    match stdin.write_all(&payload).await {
        // The exit status is what counts if the program stops reading early
        Err(error) if error.kind() == ErrorKind::BrokenPipe => {
            debug!("Builder program closed stdin before reading the request");
            Ok(())
        }
        result => result,
    }
}

async fn forward_output<R: AsyncRead + Unpin>(reader: R, stream: Stream) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        match stream {
            Stream::Stdout => info!(target: "disk_image_builder::backend", "{text}"),
            Stream::Stderr => warn!(target: "disk_image_builder::backend", "{text}"),
        }
    }
}

impl DiskImageBuilder for CommandBuilder {
    async fn generate_disk_image(&self, ctx: &BuildContext, request: Request) -> Result<()> {
        if ctx.is_cancelled() {
            bail!("Disk image build was cancelled before it started");
        }

        let payload = serde_json::to_vec(&request).context("Failed to encode build request")?;

        info!(
            program = %self.program.display(),
            image = %request.image_resource(),
            container_images = request.container_images().len(),
            timeout = %format_duration(request.timeout()),
            "Starting disk image build",
        );
        let start_time = Instant::now();

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!("Failed to start builder program {}", self.program.display())
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Builder program stdin is not available"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Builder program stdout is not available"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Builder program stderr is not available"))?;

        // Aborted on drop, so nothing keeps reading once we return
        let mut output = JoinSet::new();
        output.spawn(forward_output(stdout, Stream::Stdout));
        output.spawn(forward_output(stderr, Stream::Stderr));

        let status = {
            let run = async {
                let (sent, status) = tokio::join!(send_request(stdin, payload), child.wait());
                sent.context("Failed to send build request to builder program")?;
                let status = status.context("Failed to wait for builder program")?;

                let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
                    while let Some(result) = output.join_next().await {
                        result
                            .context("Builder program output task failed")?
                            .context("Failed to read builder program output")?;
                    }
                    anyhow::Ok(())
                })
                .await;
                match drained {
                    Ok(result) => result?,
                    Err(_) => debug!("Builder program output still open after exit, not waiting"),
                }

                anyhow::Ok(status)
            };

            tokio::select! {
                status = run => Some(status?),
                () = ctx.cancelled() => None,
            }
        };

        let Some(status) = status else {
            warn!("Disk image build cancelled, stopping builder program");
            child
                .kill()
                .await
                .context("Failed to stop builder program")?;
            bail!("Disk image build was cancelled");
        };

        if !status.success() {
            bail!(
                "Builder program {} failed with {}",
                self.program.display(),
                status
            );
        }

        info!(duration = ?start_time.elapsed(), "Builder program finished");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{ImagePullAuth, duration::parse_duration};

    fn shell(script: &str) -> CommandBuilder {
        CommandBuilder::new("/bin/sh").arg("-c").arg(script)
    }

    fn request() -> Request {
        Request::builder()
            .project_name("p")
            .image_name("i")
            .container_image("nginx:1.25")
            .container_image("nginx:1.25")
            .timeout(parse_duration("5m").unwrap())
            .image_pull_auth(ImagePullAuth::ServiceAccountToken)
            .build()
    }

    #[test_log::test(tokio::test)]
    async fn test_request_is_sent_on_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        let output = tmp.path().join("request.json");

        // Inside `sh -c`, the first extra argument becomes $0
        shell("cat > \"$0\"; echo done; echo warning >&2")
            .arg(output.to_string_lossy())
            .generate_disk_image(&BuildContext::background(), request())
            .await
            .unwrap();

        let received: Request = serde_json::from_slice(&std::fs::read(&output).unwrap()).unwrap();
        assert_eq!(received, request());
    }

    #[test_log::test(tokio::test)]
    async fn test_failing_program() {
        let error = shell("exit 3")
            .generate_disk_image(&BuildContext::background(), request())
            .await
            .unwrap_err();

        assert!(
            error.to_string().contains("exit status: 3"),
            "Unexpected error: {}",
            error
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_missing_program() {
        let error = CommandBuilder::new("/nonexistent/disk-image-builder")
            .generate_disk_image(&BuildContext::background(), request())
            .await
            .unwrap_err();

        assert!(error.to_string().starts_with("Failed to start builder program"));
    }

    #[test_log::test(tokio::test)]
    async fn test_cancelled_before_start() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("started");
        let ctx = BuildContext::background();
        ctx.cancel();

        let result = shell("touch \"$0\"")
            .arg(marker.to_string_lossy())
            .generate_disk_image(&ctx, request())
            .await;

        assert!(result.is_err());
        assert!(!marker.exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_cancel_stops_program() {
        let ctx = BuildContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let start_time = Instant::now();
        let error = shell("cat > /dev/null; exec sleep 30")
            .generate_disk_image(&ctx, request())
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Disk image build was cancelled");
        assert!(start_time.elapsed() < Duration::from_secs(30));
    }

    #[test_log::test(tokio::test)]
    async fn test_program_closing_stdin_early() {
        // Far larger than a pipe buffer, so the write fails with a broken pipe
        let request = Request::builder()
            .container_images((0..20_000).map(|i| format!("gcr.io/project/image-{i}:latest")))
            .build();

        shell("exec 0<&-; exit 0")
            .generate_disk_image(&BuildContext::background(), request)
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_lingering_output_does_not_block() {
        let start_time = Instant::now();

        shell("cat > /dev/null; (sleep 5 &); exit 0")
            .generate_disk_image(&BuildContext::background(), request())
            .await
            .unwrap();

        assert!(
            start_time.elapsed() < Duration::from_secs(4),
            "Build took {:?}",
            start_time.elapsed()
        );
    }

    /// Whether the process is gone or only waiting to be reaped.
    #[cfg(target_os = "linux")]
    fn is_dead(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // The state follows the parenthesized command name
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with(['Z', 'X'])),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[test_log::test(tokio::test)]
    async fn test_dropping_build_kills_program() {
        let tmp = tempfile::tempdir().unwrap();
        let pid_file = tmp.path().join("pid");

        let builder = shell("echo $$ > \"$0\"; exec sleep 30").arg(pid_file.to_string_lossy());
        let ctx = BuildContext::background();
        let result = tokio::time::timeout(
            Duration::from_millis(500),
            builder.generate_disk_image(&ctx, request()),
        )
        .await;
        assert!(result.is_err(), "Build should still be running");

        let pid = std::fs::read_to_string(&pid_file).unwrap();
        let pid = pid.trim();
        let start_time = Instant::now();
        while !is_dead(pid) {
            assert!(
                start_time.elapsed() < Duration::from_secs(5),
                "Builder program {} is still running",
                pid
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
