use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use tts_studio::capability::BackendCapability;
use tts_studio::engines::cloud::{
    CloudNeuralBackend, CloudParams, RetryPolicy, ServiceError, ServiceRequest, SpeechService,
};
use tts_studio::engines::{
    ensure_text_fits, BackendError, BackendLimits, GenerationContext, GenerationPhase,
    SpeechBackend,
};
use tts_studio::orchestrator::Events;
use tts_studio::postprocess::PostStage;
use tts_studio::profile::PARAM_REFERENCE_AUDIO;
use tts_studio::{
    AudioBuffer, AudioFormat, BackendKind, CapabilityMap, FallbackPolicy, Gender, Mood,
    Orchestrator, RequestState, SynthesisError, SynthesisEvent, SynthesisRequest, Tone,
    VoiceProfile, VoiceProfileStore, CANONICAL_SAMPLE_RATE,
};

const CLONED_VOICE: &str = "grandpa_joe";

/// 0.3 s silence, 1 s of tone, 0.3 s silence at the canonical rate.
fn padded_tone() -> AudioBuffer {
    let rate = CANONICAL_SAMPLE_RATE as usize;
    let pad = vec![0.0f32; rate * 3 / 10];
    let tone = (0..rate).map(|i| 0.5 * (i as f32 * 220.0 * std::f32::consts::TAU / rate as f32).sin());
    let samples = pad.iter().copied().chain(tone).chain(pad.iter().copied()).collect();
    AudioBuffer::mono(samples, CANONICAL_SAMPLE_RATE)
}

fn wav_bytes(buffer: &AudioBuffer) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: buffer.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
    for &s in &buffer.samples {
        writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();
    cursor.into_inner()
}

struct ToneBackend {
    kind: BackendKind,
    max_text_chars: usize,
    warm_up: bool,
    /// Copies of the padded tone per result.
    repeats: usize,
    calls: AtomicUsize,
}

impl ToneBackend {
    fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            max_text_chars: 500,
            warm_up: false,
            repeats: 1,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SpeechBackend for ToneBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_text_chars: self.max_text_chars,
            reentrant: true,
        }
    }

    async fn synthesize(
        &self,
        text: &str,
        _profile: &VoiceProfile,
        _tone: Tone,
        _mood: Mood,
        ctx: &GenerationContext,
    ) -> Result<AudioBuffer, BackendError> {
        ensure_text_fits(text, &self.limits())?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.warm_up && self.calls.load(Ordering::SeqCst) == 1 {
            ctx.report(GenerationPhase::WarmingUp);
        }
        ctx.report(GenerationPhase::Generating);
        let tone = padded_tone();
        Ok(AudioBuffer::mono(tone.samples.repeat(self.repeats), tone.sample_rate))
    }
}

/// Ignores the abort flag and only returns once released.
struct StallingBackend {
    started: Notify,
    release: Notify,
}

#[async_trait]
impl SpeechBackend for StallingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CloneEnglish
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_text_chars: 1000,
            reentrant: false,
        }
    }

    async fn synthesize(
        &self,
        _text: &str,
        _profile: &VoiceProfile,
        _tone: Tone,
        _mood: Mood,
        _ctx: &GenerationContext,
    ) -> Result<AudioBuffer, BackendError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(padded_tone())
    }
}

struct PanickingBackend;

#[async_trait]
impl SpeechBackend for PanickingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CloneMultilingual
    }

    fn limits(&self) -> BackendLimits {
        BackendLimits {
            max_text_chars: 600,
            reentrant: false,
        }
    }

    async fn synthesize(
        &self,
        _text: &str,
        _profile: &VoiceProfile,
        _tone: Tone,
        _mood: Mood,
        _ctx: &GenerationContext,
    ) -> Result<AudioBuffer, BackendError> {
        panic!("engine crashed");
    }
}

/// Fails with a transient error a fixed number of times, then answers.
struct FlakyService {
    failures_left: AtomicUsize,
    voices: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechService for FlakyService {
    async fn synthesize(&self, request: &ServiceRequest) -> Result<Vec<u8>, ServiceError> {
        self.voices.lock().push(request.voice.clone());
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ServiceError::Transient("connection reset".into()));
        }
        Ok(wav_bytes(&padded_tone()))
    }
}

fn capabilities(available: &[BackendKind]) -> Arc<CapabilityMap> {
    Arc::new(CapabilityMap::from_entries(BackendKind::ALL.map(|kind| {
        let capability = if available.contains(&kind) {
            BackendCapability::available()
        } else {
            BackendCapability::unavailable("engine runtime 3.12 is outside 3.10-3.11")
        };
        (kind, capability)
    })))
}

fn store_with_cloned_voice() -> Arc<VoiceProfileStore> {
    let store = VoiceProfileStore::in_memory();
    let mut backend_params = BTreeMap::new();
    backend_params.insert(PARAM_REFERENCE_AUDIO.to_string(), "/voices/joe.wav".to_string());
    store
        .create(VoiceProfile {
            voice_id: CLONED_VOICE.to_string(),
            name: "Grandpa Joe".to_string(),
            backend_kind: BackendKind::CloneEnglish,
            language: Some("en".to_string()),
            gender: Gender::Male,
            backend_params,
            builtin: false,
            created_at: chrono::Utc::now(),
        })
        .unwrap();
    Arc::new(store)
}

fn request(text: &str, voice: &str) -> SynthesisRequest {
    SynthesisRequest::new(text, voice).unwrap()
}

/// Collect events until `finished` requests have sent `Finished`.
async fn collect(events: &mut Events, finished: usize) -> Vec<SynthesisEvent> {
    let mut seen = Vec::new();
    let mut done = 0;
    while done < finished {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        if matches!(event, SynthesisEvent::Finished { .. }) {
            done += 1;
        }
        seen.push(event);
    }
    seen
}

fn states(events: &[SynthesisEvent]) -> Vec<RequestState> {
    events
        .iter()
        .filter_map(|e| match e {
            SynthesisEvent::StateChanged { state, .. } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn cloud_request_walks_every_state() {
    let (orchestrator, mut events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(ToneBackend::new(BackendKind::CloudNeural)))
    .build()
    .unwrap();

    let handle = orchestrator.submit(request("Hello there", "en-US-AriaNeural"));
    let seen = collect(&mut events, 1).await;

    assert_eq!(
        states(&seen),
        vec![
            RequestState::Pending,
            RequestState::Resolving,
            RequestState::Generating,
            RequestState::PostProcessing,
            RequestState::Done,
        ]
    );
    let Some(SynthesisEvent::Finished { request, result }) = seen.last() else {
        panic!("last event is not Finished");
    };
    assert_eq!(*request, handle.id());
    let outcome = result.as_ref().unwrap();
    assert_eq!(outcome.backend, BackendKind::CloudNeural);
    assert_eq!(outcome.voice_id, "en-US-AriaNeural");
    assert!(!outcome.substituted());
    assert_eq!(orchestrator.state(&handle), None);
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn unknown_voice_is_not_found() {
    let (orchestrator, _events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(ToneBackend::new(BackendKind::CloudNeural)))
    .build()
    .unwrap();

    let err = orchestrator
        .synthesize(request("Hello", "nobody"))
        .await
        .unwrap_err();
    assert_eq!(err, SynthesisError::NotFound("nobody".to_string()));
}

#[tokio::test]
async fn overlong_text_fails_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("long.wav");
    let mut backend = ToneBackend::new(BackendKind::CloudNeural);
    backend.max_text_chars = 10;
    let (orchestrator, _events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(backend))
    .build()
    .unwrap();

    let long = SynthesisRequest::builder()
        .text("a".repeat(20))
        .voice_id("en-US-AriaNeural")
        .output_path(out.clone())
        .build()
        .unwrap();
    let err = orchestrator.synthesize(long).await.unwrap_err();
    assert_eq!(
        err,
        SynthesisError::TextTooLong {
            backend: BackendKind::CloudNeural,
            len: 20,
            max: 10,
        }
    );
    assert!(!out.exists());
}

#[tokio::test]
async fn unavailable_backend_without_fallback_fails() {
    let (orchestrator, _events) = Orchestrator::builder(
        store_with_cloned_voice(),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(ToneBackend::new(BackendKind::CloudNeural)))
    .build()
    .unwrap();

    let err = orchestrator
        .synthesize(request("Hello", CLONED_VOICE))
        .await
        .unwrap_err();
    match err {
        SynthesisError::BackendUnavailable { backend, reason } => {
            assert_eq!(backend, BackendKind::CloneEnglish);
            assert!(reason.contains("3.12"), "{reason}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn fallback_substitutes_nearest_cloud_voice() {
    let store = store_with_cloned_voice();
    let expected_voice = store.best_builtin_voice(Some("en"), Gender::Male);
    let service = Arc::new(FlakyService {
        failures_left: AtomicUsize::new(2),
        voices: parking_lot::Mutex::new(Vec::new()),
    });
    let cloud = CloudNeuralBackend::new(
        service.clone(),
        CloudParams {
            max_text_chars: 5000,
            retry: RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                multiplier: 2.0,
            },
        },
    );
    let (orchestrator, _events) =
        Orchestrator::builder(store.clone(), capabilities(&[BackendKind::CloudNeural]))
            .backend(Arc::new(cloud))
            .fallback(FallbackPolicy::CloudNeural)
            .build()
            .unwrap();

    let outcome = orchestrator
        .synthesize(request("Hello there", CLONED_VOICE))
        .await
        .unwrap();
    assert!(outcome.substituted());
    assert_eq!(outcome.backend, BackendKind::CloudNeural);
    assert_eq!(outcome.voice_id, expected_voice);
    let substitution = outcome.substitution.unwrap();
    assert_eq!(substitution.requested_voice, CLONED_VOICE);
    assert_eq!(substitution.requested_backend, BackendKind::CloneEnglish);
    // two transient failures, then success
    assert_eq!(service.voices.lock().len(), 3);
    assert!(service.voices.lock().iter().all(|v| v == expected_voice));
}

#[tokio::test]
async fn cancel_during_generation_discards_late_result() {
    let backend = Arc::new(StallingBackend {
        started: Notify::new(),
        release: Notify::new(),
    });
    let (orchestrator, mut events) = Orchestrator::builder(
        store_with_cloned_voice(),
        capabilities(&[BackendKind::CloneEnglish]),
    )
    .backend(backend.clone())
    .build()
    .unwrap();

    let handle = orchestrator.submit(request("Hello", CLONED_VOICE));
    tokio::time::timeout(Duration::from_secs(5), backend.started.notified())
        .await
        .unwrap();
    assert_eq!(orchestrator.state(&handle), Some(RequestState::Generating));

    assert!(orchestrator.cancel(&handle));
    assert!(!orchestrator.cancel(&handle));
    assert_eq!(orchestrator.state(&handle), None);

    let seen = collect(&mut events, 1).await;
    let Some(SynthesisEvent::Finished { result, .. }) = seen.last() else {
        panic!("last event is not Finished");
    };
    assert_eq!(result, &Err(SynthesisError::Cancelled));

    // let the backend finish; nothing more may be reported
    backend.release.notify_one();
    tokio::time::sleep(Duration::from_millis(200)).await;
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(
                event,
                SynthesisEvent::Finished { .. }
                    | SynthesisEvent::StateChanged {
                        state: RequestState::Done | RequestState::PostProcessing,
                        ..
                    }
            ),
            "late event {event:?}"
        );
    }
}

#[tokio::test]
async fn every_request_finishes_exactly_once() {
    let (orchestrator, mut events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(ToneBackend::new(BackendKind::CloudNeural)))
    .build()
    .unwrap();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let voice = if i == 2 { "missing" } else { "en-GB-SoniaNeural" };
            orchestrator.submit(request("Good morning", voice))
        })
        .collect();

    let seen = collect(&mut events, handles.len()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.try_recv().is_err());

    let mut finished: HashMap<_, usize> = HashMap::new();
    for event in &seen {
        if let SynthesisEvent::Finished { request, .. } = event {
            *finished.entry(*request).or_default() += 1;
        }
    }
    for handle in &handles {
        assert_eq!(finished.get(&handle.id()), Some(&1));
    }
    assert_eq!(orchestrator.in_flight(), 0);
}

#[tokio::test]
async fn output_is_trimmed_and_deterministic() {
    let (orchestrator, _events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(ToneBackend::new(BackendKind::CloudNeural)))
    .build()
    .unwrap();

    let make = || {
        SynthesisRequest::builder()
            .text("Same words")
            .voice_id("en-US-GuyNeural")
            .tone(Tone::Upbeat)
            .mood(Mood::new(8).unwrap())
            .build()
            .unwrap()
    };
    let first = orchestrator.synthesize(make()).await.unwrap();
    let second = orchestrator.synthesize(make()).await.unwrap();

    assert!(first.artifact.duration > Duration::ZERO);
    assert!(first.artifact.duration <= first.pre_trim_duration);
    // 0.6 s of padding goes, 1 s of speech remains before speed-up
    assert!(first.artifact.duration < Duration::from_millis(1200));
    assert_eq!(first.artifact.duration, second.artifact.duration);
    assert_eq!(first.artifact.bytes, second.artifact.bytes);
}

#[tokio::test]
async fn output_path_receives_encoded_file() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("greeting.mp3");
    let (orchestrator, _events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(ToneBackend::new(BackendKind::CloudNeural)))
    .build()
    .unwrap();

    let outcome = orchestrator
        .synthesize(
            SynthesisRequest::builder()
                .text("Hello")
                .voice_id("en-US-AriaNeural")
                .output_format(AudioFormat::Mp3)
                .output_path(out.clone())
                .build()
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.artifact.format, AudioFormat::Mp3);
    assert_eq!(outcome.artifact.path.as_deref(), Some(out.as_path()));
    assert_eq!(std::fs::read(&out).unwrap(), outcome.artifact.bytes);
    // nothing but the published file
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn cancel_during_post_processing_publishes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("cancelled.wav");
    let mut backend = ToneBackend::new(BackendKind::CloudNeural);
    // about 50 s of audio keeps post-processing busy
    backend.repeats = 30;
    let (orchestrator, mut events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(backend))
    .build()
    .unwrap();

    let handle = orchestrator.submit(
        SynthesisRequest::builder()
            .text("A very long chapter")
            .voice_id("en-US-AriaNeural")
            .output_path(out.clone())
            .build()
            .unwrap(),
    );
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(
            event,
            SynthesisEvent::StateChanged {
                state: RequestState::PostProcessing,
                ..
            }
        ) {
            break;
        }
    }
    let cancelled = orchestrator.cancel(&handle);

    let seen = collect(&mut events, 1).await;
    let Some(SynthesisEvent::Finished { result, .. }) = seen.last() else {
        panic!("last event is not Finished");
    };
    assert_eq!(result.is_err(), cancelled);

    // give the abandoned pipeline time to run to its end
    for _ in 0..60 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(out.exists(), !cancelled, "published file must match the delivered result");
    }
    let files: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    if cancelled {
        assert!(files.is_empty(), "leftover files {files:?}");
    } else {
        assert_eq!(files.len(), 1);
    }
}

#[tokio::test]
async fn cancel_before_resolution_never_reaches_backend() {
    let backend = Arc::new(ToneBackend::new(BackendKind::CloudNeural));
    let (orchestrator, mut events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(backend.clone())
    .build()
    .unwrap();

    // the single-threaded test runtime has not polled the pipeline yet
    let handle = orchestrator.submit(request("Hello", "en-US-AriaNeural"));
    assert_eq!(orchestrator.state(&handle), Some(RequestState::Pending));
    assert!(orchestrator.cancel(&handle));

    let mut seen = collect(&mut events, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert_eq!(states(&seen), vec![RequestState::Pending, RequestState::Failed]);
    let finished: Vec<_> = seen
        .iter()
        .filter_map(|e| match e {
            SynthesisEvent::Finished { result, .. } => Some(result.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec![Err(SynthesisError::Cancelled)]);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unwritable_output_path_fails_post_processing() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("notes.txt");
    std::fs::write(&blocker, "not a directory").unwrap();
    let (orchestrator, mut events) = Orchestrator::builder(
        Arc::new(VoiceProfileStore::in_memory()),
        capabilities(&[BackendKind::CloudNeural]),
    )
    .backend(Arc::new(ToneBackend::new(BackendKind::CloudNeural)))
    .build()
    .unwrap();

    orchestrator.submit(
        SynthesisRequest::builder()
            .text("Hello")
            .voice_id("en-US-AriaNeural")
            .output_path(blocker.join("out.wav"))
            .build()
            .unwrap(),
    );
    let seen = collect(&mut events, 1).await;

    assert_eq!(
        states(&seen),
        vec![
            RequestState::Pending,
            RequestState::Resolving,
            RequestState::Generating,
            RequestState::PostProcessing,
            RequestState::Failed,
        ]
    );
    let Some(SynthesisEvent::Finished { result, .. }) = seen.last() else {
        panic!("last event is not Finished");
    };
    assert!(
        matches!(
            result,
            Err(SynthesisError::EncodingFailure {
                stage: PostStage::Write,
                ..
            })
        ),
        "{result:?}"
    );
    assert_eq!(std::fs::read_to_string(&blocker).unwrap(), "not a directory");
}

#[tokio::test]
async fn first_clone_request_reports_warm_up() {
    let mut backend = ToneBackend::new(BackendKind::CloneEnglish);
    backend.warm_up = true;
    let (orchestrator, mut events) = Orchestrator::builder(
        store_with_cloned_voice(),
        capabilities(&[BackendKind::CloneEnglish]),
    )
    .backend(Arc::new(backend))
    .build()
    .unwrap();

    let handle = orchestrator.submit(request("Hello", CLONED_VOICE));
    let seen = collect(&mut events, 1).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SynthesisEvent::WarmingUp { request, backend: BackendKind::CloneEnglish }
            if *request == handle.id()
    )));

    orchestrator.submit(request("Again", CLONED_VOICE));
    let seen = collect(&mut events, 1).await;
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SynthesisEvent::WarmingUp { .. })));
}

#[tokio::test]
async fn panicking_backend_is_an_engine_failure() {
    let store = VoiceProfileStore::in_memory();
    let mut backend_params = BTreeMap::new();
    backend_params.insert(PARAM_REFERENCE_AUDIO.to_string(), "/voices/ana.wav".to_string());
    store
        .create(VoiceProfile {
            voice_id: "ana".to_string(),
            name: "Ana".to_string(),
            backend_kind: BackendKind::CloneMultilingual,
            language: Some("es".to_string()),
            gender: Gender::Female,
            backend_params,
            builtin: false,
            created_at: chrono::Utc::now(),
        })
        .unwrap();
    let (orchestrator, _events) = Orchestrator::builder(
        Arc::new(store),
        capabilities(&[BackendKind::CloneMultilingual]),
    )
    .backend(Arc::new(PanickingBackend))
    .build()
    .unwrap();

    let err = orchestrator
        .synthesize(request("Hola", "ana"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SynthesisError::EngineFailure {
            backend: BackendKind::CloneMultilingual,
            ..
        }
    ));
}
