//! Replays a PCM WAV file at real-time pace.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Stream;
use tokio::time::{self, Interval};
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use mediatranslation_client::audio_stream::{AudioCapture, AudioStream};

const CHUNK_MILLIS: u64 = 100;
const WAVE_FORMAT_PCM: u16 = 1;

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("not a RIFF/WAVE file")]
    NotWave,

    #[error("missing `{0}` chunk")]
    MissingChunk(&'static str),

    #[error("unsupported wav format: {0}")]
    Unsupported(String),
}

impl From<WavError> for io::Error {
    fn from(e: WavError) -> Self {
        match e {
            WavError::Io(e) => e,
            other => Self::new(io::ErrorKind::InvalidData, other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    #[must_use]
    pub const fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align as usize
    }
}

fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Splits a WAV file into its format and its raw sample data.
pub fn parse_wav(wav: &Bytes) -> Result<(WavFormat, Bytes), WavError> {
    if wav.len() < 12 || &wav[0..4] != b"RIFF" || &wav[8..12] != b"WAVE" {
        return Err(WavError::NotWave);
    }

    let mut format = None;
    let mut offset = 12;
    while offset + 8 <= wav.len() {
        let id = &wav[offset..offset + 4];
        let size = read_u32(wav, offset + 4) as usize;
        let body = offset + 8;
        let end = body.saturating_add(size).min(wav.len());

        match id {
            b"fmt " => {
                if end - body < 16 {
                    return Err(WavError::Unsupported("truncated fmt chunk".to_string()));
                }
                let audio_format = read_u16(wav, body);
                if audio_format != WAVE_FORMAT_PCM {
                    return Err(WavError::Unsupported(format!(
                        "audio format {audio_format}, expected PCM"
                    )));
                }
                format = Some(WavFormat {
                    channels: read_u16(wav, body + 2),
                    sample_rate: read_u32(wav, body + 4),
                    block_align: read_u16(wav, body + 12),
                    bits_per_sample: read_u16(wav, body + 14),
                });
            }
            b"data" => {
                let format = format.ok_or(WavError::MissingChunk("fmt "))?;
                if format.block_align == 0 || format.sample_rate == 0 {
                    return Err(WavError::Unsupported("zero block size".to_string()));
                }
                return Ok((format, wav.slice(body..end)));
            }
            _ => {}
        }
        // Chunks are padded to an even length.
        offset = body.saturating_add(size).saturating_add(size % 2);
    }
    Err(WavError::MissingChunk("data"))
}

/// Options for [`WavPlayback`]: the file to replay.
pub type WavPlaybackOption = PathBuf;

pub struct WavPlayback {
    format: WavFormat,
    pcm: Bytes,
    chunk_size: usize,
}

impl WavPlayback {
    pub fn from_bytes(wav: Bytes) -> Result<Self, WavError> {
        let (format, pcm) = parse_wav(&wav)?;
        if pcm.is_empty() {
            return Err(WavError::Unsupported("wav payload is empty".to_string()));
        }
        let block_align = format.block_align as usize;
        let chunk_size = (format.bytes_per_second() * CHUNK_MILLIS as usize / 1000)
            / block_align
            * block_align;

        Ok(Self {
            format,
            pcm,
            chunk_size: chunk_size.max(block_align),
        })
    }

    #[must_use]
    pub const fn format(&self) -> WavFormat {
        self.format
    }
}

impl AudioCapture for WavPlayback {
    type CaptureOption = WavPlaybackOption;

    fn new(path: Self::CaptureOption) -> io::Result<Self> {
        let wav = std::fs::read(&path)?;
        let playback = Self::from_bytes(Bytes::from(wav))?;
        debug!(
            "WavPlayback: {} ({:?})",
            path.display(),
            playback.format()
        );
        Ok(playback)
    }

    fn create(&self, cancellation_token: CancellationToken) -> io::Result<AudioStream> {
        Ok(AudioStream(Box::pin(WavPlaybackStream {
            pcm: self.pcm.clone(),
            offset: 0,
            chunk_size: self.chunk_size,
            interval: time::interval(Duration::from_millis(CHUNK_MILLIS)),
            cancellation_token,
        })))
    }
}

struct WavPlaybackStream {
    pcm: Bytes,
    offset: usize,
    chunk_size: usize,
    interval: Interval,
    cancellation_token: CancellationToken,
}

impl Stream for WavPlaybackStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancellation_token.is_cancelled() {
            return Poll::Ready(None);
        }

        if self.offset >= self.pcm.len() {
            return Poll::Ready(None);
        }

        if self.interval.poll_tick(cx).is_pending() {
            return Poll::Pending;
        }

        let end = self
            .offset
            .saturating_add(self.chunk_size)
            .min(self.pcm.len());
        let chunk = self.pcm.slice(self.offset..end);
        self.offset = end;

        Poll::Ready(Some(Ok(chunk)))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tokio_stream::StreamExt;

    use super::*;

    fn wav(sample_rate: u32, samples: usize, extra_chunk: bool) -> Vec<u8> {
        let data_len = samples * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&0_u32.to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16_u32.to_le_bytes());
        out.extend_from_slice(&1_u16.to_le_bytes());
        out.extend_from_slice(&1_u16.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2_u16.to_le_bytes());
        out.extend_from_slice(&16_u16.to_le_bytes());
        if extra_chunk {
            out.extend_from_slice(b"LIST");
            out.extend_from_slice(&3_u32.to_le_bytes());
            out.extend_from_slice(b"abc\0");
        }
        out.extend_from_slice(b"data");
        out.extend_from_slice(&(data_len as u32).to_le_bytes());
        out.extend(std::iter::repeat_n(7_u8, data_len));
        out
    }

    #[test]
    fn finds_data_after_unknown_chunks() {
        let bytes = Bytes::from(wav(16000, 10, true));
        let (format, pcm) = parse_wav(&bytes).unwrap();
        assert_eq!(format.sample_rate, 16000);
        assert_eq!(format.channels, 1);
        assert_eq!(format.block_align, 2);
        assert_eq!(pcm.len(), 20);
        assert!(pcm.iter().all(|b| *b == 7));
    }

    #[test]
    fn rejects_non_wave_input() {
        assert!(matches!(
            parse_wav(&Bytes::from_static(b"not a wav file at all")),
            Err(WavError::NotWave)
        ));
        let mut no_data = wav(16000, 0, false);
        no_data.truncate(36);
        assert!(matches!(
            parse_wav(&Bytes::from(no_data)),
            Err(WavError::MissingChunk("data"))
        ));
    }

    #[tokio::test]
    async fn emits_paced_pcm_chunks() {
        // 250 ms of audio gives two full 100 ms chunks and a short tail.
        let playback = WavPlayback::from_bytes(Bytes::from(wav(16000, 4000, false))).unwrap();
        let stream = playback.create(CancellationToken::new()).unwrap();
        let sizes: Vec<usize> = stream.map(|chunk| chunk.unwrap().len()).collect().await;
        assert_eq!(sizes, vec![3200, 3200, 1600]);
    }

    #[tokio::test]
    async fn stops_on_cancellation() {
        let playback = WavPlayback::from_bytes(Bytes::from(wav(16000, 4000, false))).unwrap();
        let cancellation = CancellationToken::new();
        let mut stream = playback.create(cancellation.clone()).unwrap();
        assert!(stream.next().await.is_some());
        cancellation.cancel();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn opens_files_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&wav(8000, 100, false)).unwrap();
        let playback = WavPlayback::new(file.path().to_path_buf()).unwrap();
        assert_eq!(playback.format().sample_rate, 8000);

        let err = WavPlayback::new(PathBuf::from("/nonexistent.wav")).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
