use chrono::Local;
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::{
    env,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

use relay_console::commands::{Console, ConsoleEventSink, Flow};
use relay_console::models::CredentialPolicy;
use relay_console::services::{
    apply_env_overrides, login, parse_level, prune_logs, ChannelConfig, ClientContext,
    EventSink, FfplayPlatform, PreviewManager, SettingsManager, SocketIoChannel, SyncEngine,
    LOG_FILE_NAME,
};

// ============================================================================
// Logging
// ============================================================================

struct ClientLogger {
    file: Mutex<std::fs::File>,
    level: LevelFilter,
}

impl ClientLogger {
    fn new(log_dir: &Path, level: LevelFilter) -> Result<Self, Box<dyn std::error::Error>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join(LOG_FILE_NAME))?;
        Ok(Self {
            file: Mutex::new(file),
            level,
        })
    }
}

impl Log for ClientLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Local::now();
        let date = timestamp.format("%Y-%m-%d");
        let time = timestamp.format("%H:%M:%S");
        let target = record.target();
        let level = record.level();
        let message = format!("{}", record.args());
        let line = format!("[{date}][{time}][{target}][{level}] {message}");

        if let Ok(mut file) = self.file.try_lock() {
            let _ = writeln!(file, "{line}");
        }

        // the console owns stdout
        if level == Level::Error {
            eprintln!("error: {message}");
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

fn init_logger(log_dir: &Path, level: LevelFilter) -> Result<(), Box<dyn std::error::Error>> {
    let logger = ClientLogger::new(log_dir, level)?;
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(level);
    Ok(())
}

fn default_data_dir() -> PathBuf {
    dirs_next::data_dir()
        .map(|dir| dir.join("relay-console"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Waits for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment
    let data_dir = env::var("RELAY_CONSOLE_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_data_dir());
    let log_dir = env::var("RELAY_CONSOLE_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("logs"));
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(&log_dir)?;

    let settings_manager = SettingsManager::new(data_dir.clone());
    let mut settings = settings_manager.load()?;
    apply_env_overrides(&mut settings);

    init_logger(&log_dir, parse_level(&settings.log_level))?;
    log::info!("Relay console starting, data dir {data_dir:?}");

    match prune_logs(&log_dir, settings.log_retention_days) {
        Ok(removed) if removed > 0 => log::info!("Pruned {removed} old log files"),
        Ok(_) => {}
        Err(e) => log::warn!("Log pruning failed: {e}"),
    }

    // Credentials take precedence over a stored cookie, which may have expired
    let session_cookie = if !settings.username.is_empty() && !settings.password.is_empty() {
        let cookie = login(&settings.server_url, &settings.username, &settings.password)
            .await
            .map_err(|e| {
                log::error!("{e}");
                e
            })?;
        Some(cookie)
    } else if !settings.session_cookie.is_empty() {
        Some(settings.session_cookie.clone())
    } else {
        log::warn!("No credentials configured, connecting without a session");
        None
    };

    let sink: Arc<dyn EventSink> = Arc::new(ConsoleEventSink::default());

    let (channel_tx, channel_rx) = mpsc::unbounded_channel();
    let channel = SocketIoChannel::spawn(
        ChannelConfig::from_settings(&settings, session_cookie),
        channel_tx,
    );
    let context = Arc::new(ClientContext::new(channel.clone()));

    let engine = Arc::new(SyncEngine::new(
        context.clone(),
        sink.clone(),
        CredentialPolicy::new(settings.credential_destinations.clone()),
    ));
    tokio::spawn(engine.clone().run(channel_rx));

    let platform = Arc::new(FfplayPlatform::new(&settings.preview));
    let (preview, preview_rx) = PreviewManager::new(context.clone(), platform, sink.clone());
    let preview = Arc::new(preview);
    tokio::spawn(preview.clone().run(preview_rx));

    let console = Console {
        engine,
        preview: preview.clone(),
        settings,
    };

    println!("Relay console ready. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                log::info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if console.handle_line(&line).await == Flow::Quit {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to read input: {e}");
                    break;
                }
            }
        }
    }

    preview.teardown().await;
    channel.shutdown();
    log::info!("Relay console stopped");
    log::logger().flush();
    Ok(())
}
