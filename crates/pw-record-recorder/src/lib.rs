//! Microphone capture through PipeWire's `pw-record`.

use std::io;
use std::process::Stdio;

use tokio::process::Command;
use tokio::select;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use mediatranslation_client::audio_stream::{AudioCapture, AudioStream};

const PW_RECORD: &str = "pw-record";

/// Records mono 16-bit PCM at the given sample rate.
#[derive(Debug, Clone, Copy)]
pub struct PwRecordRecorder {
    sample_rate: u32,
}

impl PwRecordRecorder {
    fn command(&self) -> Command {
        let mut command = Command::new(PW_RECORD);
        command
            .arg("--rate")
            .arg(self.sample_rate.to_string())
            .args(["--properties", r#"{ "media.class": "Stream/Input/Audio" }"#])
            .args([
                "--media-role",
                "Communication",
                "--media-category",
                "Capture",
                "--format",
                "s16",
                "--channels",
                "1",
                "--raw",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl AudioCapture for PwRecordRecorder {
    type CaptureOption = u32;

    fn new(sample_rate: Self::CaptureOption) -> io::Result<Self> {
        if sample_rate == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sample rate must be positive",
            ));
        }
        Ok(Self { sample_rate })
    }

    fn create(&self, cancellation_token: CancellationToken) -> io::Result<AudioStream> {
        let mut child = self.command().spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("pw-record has no stdout"))?;

        // The child is driven on its own task so it keeps recording while
        // the consumer awaits output.
        tokio::spawn(async move {
            select! {
                () = cancellation_token.cancelled() => {
                    debug!("PwRecordRecorder: cancellation requested");
                    if let Err(err) = child.kill().await {
                        warn!("PwRecordRecorder: failed to kill recorder: {err:?}");
                    }
                    debug!("PwRecordRecorder: recorder process killed");
                }
                status = child.wait() => {
                    match status {
                        Ok(status) => debug!("PwRecordRecorder: recorder exited with {status}"),
                        Err(err) => warn!("PwRecordRecorder: wait failed: {err:?}"),
                    }
                }
            }
        });

        Ok(AudioStream::new(ReaderStream::new(stdout)))
    }
}
