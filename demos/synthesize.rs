//! Synthesize one line of text and write it to disk.
//!
//! ```text
//! TTS_STUDIO_CLOUD_KEY=... cargo run --example synthesize -- studio.toml en-US-AriaNeural "Hello there"
//! ```

use std::path::PathBuf;
use std::time::Instant;

use tts_studio::config::StudioConfig;
use tts_studio::studio::Studio;
use tts_studio::{AudioFormat, BackendKind, Mood, SynthesisEvent, SynthesisRequest, Tone};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => StudioConfig::load(path)?,
        None => StudioConfig::default().with_env_overrides(),
    };
    let voice = args.next().unwrap_or_else(|| "en-US-AriaNeural".to_string());
    let text = args.next().unwrap_or_else(|| {
        "Hello! This voice was generated, trimmed and exported by tts-studio.".to_string()
    });

    let mut studio = Studio::start(config).await?;
    for kind in BackendKind::ALL {
        let capability = studio.capabilities().get(kind);
        if capability.available {
            println!("{kind}: available");
        } else {
            println!("{kind}: {}", capability.reason_if_unavailable);
        }
    }

    let mut events = studio.take_events().ok_or("event stream already taken")?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SynthesisEvent::StateChanged { request, state } => println!("[{request}] {state}"),
                SynthesisEvent::WarmingUp { request, backend } => {
                    println!("[{request}] loading {backend}, this can take a while")
                }
                SynthesisEvent::Finished { .. } => {}
            }
        }
    });

    let request = SynthesisRequest::builder()
        .text(text)
        .voice_id(voice)
        .tone(Tone::Upbeat)
        .mood(Mood::new(7)?)
        .output_format(AudioFormat::Mp3)
        .output_path(PathBuf::from("output.mp3"))
        .build()?;

    let start = Instant::now();
    let outcome = studio.orchestrator().synthesize(request).await?;
    if let Some(sub) = &outcome.substitution {
        println!(
            "{} unavailable ({}); used {} instead of {}",
            sub.requested_backend, sub.reason, sub.fallback_voice, sub.requested_voice
        );
    }
    println!(
        "Synthesized {:.2}s (from {:.2}s raw) via {} in {:.2?}",
        outcome.artifact.duration.as_secs_f64(),
        outcome.pre_trim_duration.as_secs_f64(),
        outcome.backend,
        start.elapsed()
    );
    println!("Saved to output.mp3");
    Ok(())
}
