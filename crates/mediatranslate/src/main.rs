#![cfg_attr(test, allow(warnings))]

mod args;
mod output;

use std::io;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use futures_util::StreamExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use config_tool::config_store::ConfigFile;
use config_tool::profile_config::ProfileConfig;
use mediatranslation_client::audio_stream::{AudioCapture, AudioStream};
use mediatranslation_client::{SpeechTranslationServiceAsyncClient, TransportChoice, TranslationSession};
use pw_record_recorder::PwRecordRecorder;
use wav_playback::{WavFormat, WavPlayback};

use crate::args::Args;
use crate::output::TranslationPrinter;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    // Use env filter when configured, fall back to warn-level logging on
    // stderr so translations own stdout.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn load_profile(args: &Args) -> anyhow::Result<ProfileConfig> {
    let config = match &args.config {
        Some(path) => ConfigFile::load_from(path),
        None => ConfigFile::load(),
    }
    .context("failed to load config")?;
    Ok(config.profile(&args.profile)?.clone())
}

/// Ways a WAV file differs from the audio the profile announces.
fn format_mismatches(format: &WavFormat, profile: &ProfileConfig) -> Vec<String> {
    let mut mismatches = Vec::new();
    if i64::from(format.sample_rate) != i64::from(profile.sample_rate_hertz) {
        mismatches.push(format!(
            "sampled at {} Hz but the profile announces {} Hz",
            format.sample_rate, profile.sample_rate_hertz
        ));
    }
    if profile.audio_encoding.eq_ignore_ascii_case("linear16") {
        if format.channels != 1 {
            mismatches.push(format!(
                "has {} channels but linear16 expects mono",
                format.channels
            ));
        }
        if format.bits_per_sample != 16 {
            mismatches.push(format!(
                "has {}-bit samples but linear16 expects 16-bit",
                format.bits_per_sample
            ));
        }
    }
    mismatches
}

fn open_audio(
    args: &Args,
    profile: &ProfileConfig,
    cancellation: CancellationToken,
) -> anyhow::Result<AudioStream> {
    if let Some(path) = &args.file {
        let playback = WavPlayback::new(path.clone())
            .with_context(|| format!("failed to open {}", path.display()))?;
        for mismatch in format_mismatches(&playback.format(), profile) {
            warn!("{}: {mismatch}", path.display());
        }
        return Ok(playback.create(cancellation)?);
    }

    let sample_rate = u32::try_from(profile.sample_rate_hertz)
        .context("sample_rate_hertz must be positive")?;
    let recorder = PwRecordRecorder::new(sample_rate)?;
    recorder
        .create(cancellation)
        .context("failed to start pw-record")
}

async fn run(args: Args) -> anyhow::Result<()> {
    let profile = load_profile(&args)?;

    let mut client_options = profile.client.clone();
    if let Some(endpoint) = &args.endpoint {
        client_options = client_options.with_api_endpoint(endpoint.clone());
    }
    let client = SpeechTranslationServiceAsyncClient::new(
        profile.credentials(),
        TransportChoice::default(),
        Some(client_options),
    )
    .await
    .context("failed to create client")?;

    let session = TranslationSession::new(profile.to_streaming_config());
    let cancellation = session.cancellation_token();
    let audio = open_audio(&args, &profile, cancellation.clone())?;
    let mut events = session.run(&client, audio, args.call_options()).await?;
    info!("translating {} -> {}", profile.source_language_code, profile.target_language_code);

    let mut printer = TranslationPrinter::new(io::stdout());
    let mut interrupted = false;
    loop {
        select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                if interrupted {
                    printer.finish()?;
                    bail!("interrupted");
                }
                // Closing the audio lets the service flush its final result.
                info!("interrupted, waiting for the final translation");
                interrupted = true;
                cancellation.cancel();
            }
            event = events.next() => {
                match event {
                    Some(event) => printer.print(&event?)?,
                    None => break,
                }
            }
        }
    }
    printer.finish()?;
    Ok(())
}
