//! Engine worker process speaking JSON lines over stdio.
//!
//! The worker is started as
//! `<interpreter> -u <worker_script> --engine <name> --device <device>`
//! and must print `{"event":"ready"}` once the model is loaded. After that
//! each command line gets exactly one reply line:
//!
//! ```text
//! > {"op":"prepare_speaker","id":1,"reference_audio":"/voices/me.wav"}
//! < {"event":"speaker","id":1,"handle":"spk-3f2a"}
//! > {"op":"synthesize","id":2,"text":"Hi","speaker":"spk-3f2a","language":"en","output":"/tmp/a.wav"}
//! < {"event":"audio","id":2,"path":"/tmp/a.wav"}
//! < {"event":"error","id":2,"message":"..."}
//! ```
//!
//! `progress` events may appear at any time and are only logged.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::{CloneError, CloneRuntime, CloneSession, CloneVariant, SpeakerHandle};
use crate::audio::AudioBuffer;

/// How to start the engine worker.
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    pub interpreter: PathBuf,
    pub worker_script: PathBuf,
    /// `auto`, `cpu` or `cuda`.
    pub device: String,
    /// Where the worker writes generated audio.
    pub scratch_dir: PathBuf,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            interpreter: PathBuf::from("python3"),
            worker_script: PathBuf::from("tts_worker.py"),
            device: "auto".to_string(),
            scratch_dir: std::env::temp_dir(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WorkerCommand<'a> {
    PrepareSpeaker {
        id: u64,
        reference_audio: &'a Path,
    },
    Synthesize {
        id: u64,
        text: &'a str,
        speaker: &'a str,
        language: Option<&'a str>,
        output: &'a Path,
    },
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WorkerEvent {
    Ready {
        #[serde(default)]
        engine: Option<String>,
    },
    Progress {
        #[serde(default)]
        message: String,
    },
    Speaker {
        #[serde(default)]
        id: Option<u64>,
        handle: String,
    },
    Audio {
        #[serde(default)]
        id: Option<u64>,
        path: PathBuf,
    },
    Error {
        #[serde(default)]
        id: Option<u64>,
        message: String,
    },
}

/// Starts one worker process per loaded engine.
#[derive(Debug, Clone, Default)]
pub struct SidecarRuntime {
    config: SidecarConfig,
}

impl SidecarRuntime {
    pub fn new(config: SidecarConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CloneRuntime for SidecarRuntime {
    async fn load(&self, variant: CloneVariant) -> Result<Box<dyn CloneSession>, CloneError> {
        let mut child = Command::new(&self.config.interpreter)
            .arg("-u")
            .arg(&self.config.worker_script)
            .args(["--engine", variant.engine_name()])
            .args(["--device", self.config.device.as_str()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CloneError::Load(format!(
                    "cannot start {}: {e}",
                    self.config.interpreter.display()
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CloneError::Load("worker stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CloneError::Load("worker stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            let engine = variant.engine_name();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[{engine}] {line}");
                }
            });
        }

        let mut io = WorkerIo {
            _child: child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 1,
        };
        match io.next_event().await {
            Ok(WorkerEvent::Ready { .. }) => {}
            Ok(WorkerEvent::Error { message, .. }) => return Err(CloneError::Load(message)),
            Ok(other) => {
                return Err(CloneError::Load(format!(
                    "unexpected first event from worker: {other:?}"
                )))
            }
            Err(e) => return Err(CloneError::Load(e.to_string())),
        }
        log::info!("{variant} worker ready");

        Ok(Box::new(SidecarSession {
            variant,
            scratch_dir: self.config.scratch_dir.clone(),
            io: Mutex::new(io),
        }))
    }
}

struct WorkerIo {
    _child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl WorkerIo {
    /// Next non-progress event.
    async fn next_event(&mut self) -> Result<WorkerEvent, CloneError> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| CloneError::Worker(e.to_string()))?
                .ok_or_else(|| CloneError::Worker("worker exited".into()))?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WorkerEvent>(line) {
                Ok(WorkerEvent::Progress { message }) => log::debug!("worker: {message}"),
                Ok(event) => return Ok(event),
                // libraries inside the worker sometimes print to stdout
                Err(_) => log::debug!("worker (non-protocol): {line}"),
            }
        }
    }

    async fn send(&mut self, command: &WorkerCommand<'_>) -> Result<(), CloneError> {
        let mut line =
            serde_json::to_string(command).map_err(|e| CloneError::Worker(e.to_string()))?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| CloneError::Worker(format!("writing to worker: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| CloneError::Worker(format!("writing to worker: {e}")))
    }

    /// Reply to command `id`; replies to other ids are stale and skipped.
    async fn reply(&mut self, id: u64) -> Result<WorkerEvent, CloneError> {
        loop {
            let event = self.next_event().await?;
            let event_id = match &event {
                WorkerEvent::Speaker { id, .. }
                | WorkerEvent::Audio { id, .. }
                | WorkerEvent::Error { id, .. } => *id,
                _ => None,
            };
            if event_id.map_or(true, |e| e == id) {
                return Ok(event);
            }
            log::debug!("Skipping stale worker reply {event:?}");
        }
    }

    fn take_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

struct SidecarSession {
    variant: CloneVariant,
    scratch_dir: PathBuf,
    io: Mutex<WorkerIo>,
}

#[async_trait]
impl CloneSession for SidecarSession {
    fn reentrant(&self) -> bool {
        false
    }

    async fn prepare_speaker(&self, reference_audio: &Path) -> Result<SpeakerHandle, CloneError> {
        let mut io = self.io.lock().await;
        let id = io.take_id();
        io.send(&WorkerCommand::PrepareSpeaker {
            id,
            reference_audio,
        })
        .await?;
        match io.reply(id).await? {
            WorkerEvent::Speaker { handle, .. } => Ok(SpeakerHandle(handle)),
            WorkerEvent::Error { message, .. } => Err(CloneError::Speaker(message)),
            other => Err(CloneError::Worker(format!("unexpected reply {other:?}"))),
        }
    }

    async fn generate(
        &self,
        text: &str,
        speaker: &SpeakerHandle,
        language: Option<&str>,
    ) -> Result<AudioBuffer, CloneError> {
        let output = self.scratch_dir.join(format!(
            "{}-{}.wav",
            self.variant.engine_name(),
            uuid::Uuid::new_v4()
        ));

        let reply = {
            let mut io = self.io.lock().await;
            let id = io.take_id();
            io.send(&WorkerCommand::Synthesize {
                id,
                text,
                speaker: &speaker.0,
                language,
                output: &output,
            })
            .await?;
            io.reply(id).await?
        };

        let path = match reply {
            WorkerEvent::Audio { path, .. } => path,
            WorkerEvent::Error { message, .. } => {
                remove_scratch(&output).await;
                return Err(CloneError::Generation(message));
            }
            other => {
                remove_scratch(&output).await;
                return Err(CloneError::Worker(format!("unexpected reply {other:?}")));
            }
        };

        let decoded = tokio::task::spawn_blocking(move || {
            let buffer = AudioBuffer::from_wav_file(&path);
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Could not remove {}: {e}", path.display());
            }
            buffer
        })
        .await
        .map_err(|e| CloneError::Generation(format!("decode task failed: {e}")))?;
        decoded.map_err(|e| CloneError::Generation(format!("unreadable engine output: {e}")))
    }
}

/// Remove a partial output file the worker may have left behind.
async fn remove_scratch(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => log::debug!("Removed partial output {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove {}: {e}", path.display()),
    }
}
