// FFplay Preview Backend
// Adaptive engine that renders previews in an external ffplay process

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::models::PreviewSettings;
use crate::services::playback::{
    AdaptiveEngine, EngineErrorInfo, MediaSink, PlaybackErrorKind, PlaybackEvent,
    PlaybackPlatform, SessionEvents,
};

const WINDOW_TITLE: &str = "relay-console preview";

const NETWORK_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "http error",
    "server returned 4",
    "server returned 5",
    "i/o error",
    "network is unreachable",
    "failed to resolve hostname",
    "name or service not known",
];

const MEDIA_PATTERNS: &[&str] = &[
    "invalid data found",
    "error while decoding",
    "decoding error",
    "could not find codec",
    "unsupported codec",
    "non-existing pps",
    "no decoder",
];

/// Locate ffplay: the configured path if it exists, otherwise `PATH`
pub fn find_ffplay(configured: &str) -> Option<PathBuf> {
    let configured = configured.trim();
    if !configured.is_empty() {
        let path = Path::new(configured);
        if path.exists() {
            log::debug!("Using configured ffplay: {path:?}");
            return Some(path.to_path_buf());
        }
        log::warn!("Configured ffplay not found at {path:?}, searching PATH");
    }

    if let Ok(path) = which::which("ffplay") {
        log::debug!("Found ffplay in PATH: {path:?}");
        return Some(path);
    }

    log::warn!("ffplay not found, previews are unavailable");
    None
}

/// Classify one stderr line. `None` for lines that are not errors.
pub fn classify_stderr(line: &str) -> Option<PlaybackErrorKind> {
    let lower = line.to_ascii_lowercase();
    if NETWORK_PATTERNS.iter().any(|p| lower.contains(p)) {
        Some(PlaybackErrorKind::Network)
    } else if MEDIA_PATTERNS.iter().any(|p| lower.contains(p)) {
        Some(PlaybackErrorKind::Media)
    } else if lower.contains("error") || lower.contains("failed") {
        Some(PlaybackErrorKind::Other)
    } else {
        None
    }
}

fn ffplay_args(url: &str, headless: bool) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-autoexit"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if headless {
        args.push("-nodisp".to_string());
    } else {
        args.push("-window_title".to_string());
        args.push(WINDOW_TITLE.to_string());
    }
    args.push("-i".to_string());
    args.push(url.to_string());
    args
}

/// Event for a process exit not requested by `destroy`
fn exit_event(status: ExitStatus, last_kind: Option<PlaybackErrorKind>) -> PlaybackEvent {
    if status.success() {
        PlaybackEvent::Ended
    } else {
        PlaybackEvent::EngineError(EngineErrorInfo::fatal(
            last_kind.unwrap_or(PlaybackErrorKind::Other),
            format!("ffplay exited with {status}"),
        ))
    }
}

/// Output surface: ffplay draws its own window, so the sink only tracks the source
#[derive(Default)]
pub struct FfplaySink {
    source: Mutex<Option<String>>,
}

impl FfplaySink {
    pub fn source(&self) -> Option<String> {
        self.source.lock().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl MediaSink for FfplaySink {
    fn set_source(&self, url: &str) {
        if let Ok(mut source) = self.source.lock() {
            *source = Some(url.to_string());
        }
    }

    fn watch_errors(&self, events: SessionEvents) {
        log::debug!("ffplay sink has no native playback, ignoring watcher for {}", events.token());
    }

    async fn play(&self) -> Result<(), String> {
        match self.source() {
            Some(_) => Ok(()),
            None => Err("no source attached".to_string()),
        }
    }

    fn release(&self) {
        if let Ok(mut source) = self.source.lock() {
            *source = None;
        }
    }
}

pub struct FfplayPlatform {
    binary: Option<PathBuf>,
    headless: bool,
    sink: Arc<FfplaySink>,
}

impl FfplayPlatform {
    pub fn new(settings: &PreviewSettings) -> Self {
        let binary = if settings.enabled {
            find_ffplay(&settings.ffplay_path)
        } else {
            log::info!("Preview disabled in settings");
            None
        };
        Self {
            binary,
            headless: settings.headless,
            sink: Arc::new(FfplaySink::default()),
        }
    }

    pub fn binary(&self) -> Option<&Path> {
        self.binary.as_deref()
    }
}

impl PlaybackPlatform for FfplayPlatform {
    fn supports_adaptive(&self) -> bool {
        self.binary.is_some()
    }

    fn supports_native(&self) -> bool {
        false
    }

    fn create_engine(&self, events: SessionEvents) -> Box<dyn AdaptiveEngine> {
        Box::new(FfplayEngine {
            binary: self.binary.clone().unwrap_or_else(|| PathBuf::from("ffplay")),
            headless: self.headless,
            events,
            url: None,
            kill_tx: None,
        })
    }

    fn media_sink(&self) -> Arc<dyn MediaSink> {
        self.sink.clone()
    }
}

/// One ffplay process per session
struct FfplayEngine {
    binary: PathBuf,
    headless: bool,
    events: SessionEvents,
    url: Option<String>,
    kill_tx: Option<oneshot::Sender<()>>,
}

impl AdaptiveEngine for FfplayEngine {
    fn load_source(&mut self, url: &str) -> Result<(), String> {
        if url.trim().is_empty() {
            return Err("empty preview url".to_string());
        }
        self.url = Some(url.to_string());
        Ok(())
    }

    fn attach_media(&mut self, sink: &dyn MediaSink) -> Result<(), String> {
        let url = self
            .url
            .clone()
            .ok_or_else(|| "no source loaded".to_string())?;
        if self.kill_tx.is_some() {
            return Err("engine already attached".to_string());
        }

        let args = ffplay_args(&url, self.headless);
        log::info!("Starting ffplay for preview {}: {:?} {}", self.events.token(), self.binary, args.join(" "));

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to start ffplay: {e} (path: {:?})", self.binary))?;
        sink.set_source(&url);

        let last_kind: Arc<Mutex<Option<PlaybackErrorKind>>> = Arc::new(Mutex::new(None));

        let reader = child.stderr.take().map(|stderr| {
            let events = self.events.clone();
            let last_kind = last_kind.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let Some(kind) = classify_stderr(&line) else {
                        if !line.trim().is_empty() {
                            log::debug!("[ffplay {}] {}", events.token(), line);
                        }
                        continue;
                    };
                    log::debug!("[ffplay {}] {:?}: {}", events.token(), kind, line);
                    if let Ok(mut last) = last_kind.lock() {
                        *last = Some(kind);
                    }
                    events.send(PlaybackEvent::EngineError(EngineErrorInfo::recoverable(kind, line)));
                }
            })
        });

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        self.kill_tx = Some(kill_tx);
        let events = self.events.clone();

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    if let Some(reader) = reader {
                        let _ = reader.await;
                    }
                    match status {
                        Ok(status) => {
                            let kind = last_kind.lock().ok().and_then(|k| *k);
                            log::info!("ffplay for preview {} exited with {status}", events.token());
                            events.send(exit_event(status, kind));
                        }
                        Err(e) => {
                            log::warn!("Failed to wait on ffplay for preview {}: {e}", events.token());
                            events.send(PlaybackEvent::EngineError(EngineErrorInfo::fatal(
                                PlaybackErrorKind::Other,
                                e.to_string(),
                            )));
                        }
                    }
                }
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        log::warn!("Failed to stop ffplay for preview {}: {e}", events.token());
                    } else {
                        log::debug!("ffplay for preview {} stopped", events.token());
                    }
                }
            }
        });

        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
        self.url = None;
    }
}

impl Drop for FfplayEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}
