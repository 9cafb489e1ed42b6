// Console Commands
// Operator command parsing, dispatch and terminal rendering

use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::models::{
    ClientSettings, DestinationChoice, HealthView, InputChoice, StartRequest, StreamRow,
};
use crate::services::{
    EventSink, Notice, NoticeLevel, PreviewManager, PreviewPhase, SyncEngine, PREVIEW_ERROR,
    PREVIEW_ERROR_CLEARED, PREVIEW_STATE, STREAMS_UPDATED, UI_NOTICE,
};

const CUSTOM_PREFIX: &str = "custom:";

pub const HELP: &str = "\
Commands:
  list                                          show active streams
  sources                                       show the source catalog
  start <name> <source|custom:URL> <destination|custom:URL> [stream_key]
  stop <name>                                   stop a stream
  preview <source|custom|off>                   preview a catalog source
  dismiss                                       clear the preview error
  help                                          show this help
  quit                                          exit
Quote names containing spaces, e.g. start news \"Plex 1\" youtube KEY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewTarget {
    Source(String),
    Custom,
    Off,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Sources,
    Start(StartRequest),
    Stop(String),
    Preview(PreviewTarget),
    Dismiss,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("unknown source '{0}', type 'sources'")]
    UnknownSource(String),

    #[error("unterminated quote")]
    UnterminatedQuote,
}

/// Split a line on whitespace, keeping double-quoted runs together
fn tokenize(line: &str) -> Result<Vec<String>, ParseError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if in_quotes {
        return Err(ParseError::UnterminatedQuote);
    }
    if has_token {
        tokens.push(current);
    }
    Ok(tokens)
}

pub fn parse_command(line: &str, settings: &ClientSettings) -> Result<ConsoleCommand, ParseError> {
    let tokens = tokenize(line)?;
    let Some((verb, args)) = tokens.split_first() else {
        return Err(ParseError::Empty);
    };

    match verb.to_ascii_lowercase().as_str() {
        "list" | "ls" => Ok(ConsoleCommand::List),
        "sources" => Ok(ConsoleCommand::Sources),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "dismiss" => Ok(ConsoleCommand::Dismiss),
        "stop" => match args {
            [name] => Ok(ConsoleCommand::Stop(name.clone())),
            _ => Err(ParseError::Usage("stop <name>")),
        },
        "preview" => {
            if args.is_empty() {
                return Err(ParseError::Usage("preview <source|custom|off>"));
            }
            let target = args.join(" ");
            match target.to_ascii_lowercase().as_str() {
                "off" => Ok(ConsoleCommand::Preview(PreviewTarget::Off)),
                "custom" => Ok(ConsoleCommand::Preview(PreviewTarget::Custom)),
                _ => Ok(ConsoleCommand::Preview(PreviewTarget::Source(target))),
            }
        }
        "start" => {
            let (name, input, destination, stream_key) = match args {
                [name, input, destination] => (name, input, destination, String::new()),
                [name, input, destination, key] => (name, input, destination, key.clone()),
                _ => {
                    return Err(ParseError::Usage(
                        "start <name> <source|custom:URL> <destination|custom:URL> [stream_key]",
                    ))
                }
            };

            let input = match input.strip_prefix(CUSTOM_PREFIX) {
                Some(locator) => InputChoice::Custom {
                    locator: locator.to_string(),
                },
                None => {
                    let source = settings
                        .find_source(input)
                        .ok_or_else(|| ParseError::UnknownSource(input.clone()))?;
                    InputChoice::Catalog {
                        source_name: source.name.clone(),
                        locator: source.input.clone(),
                    }
                }
            };

            let destination = match destination.strip_prefix(CUSTOM_PREFIX) {
                Some(url) => DestinationChoice::Custom {
                    url: url.to_string(),
                },
                None => DestinationChoice::Platform(destination.to_ascii_lowercase()),
            };

            Ok(ConsoleCommand::Start(StartRequest {
                name: name.clone(),
                input,
                destination,
                stream_key,
            }))
        }
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

fn health_summary(health: &HealthView) -> String {
    match health {
        HealthView::NoData => "No data".to_string(),
        HealthView::Metrics {
            fps,
            bitrate,
            restarts,
            last_error,
            last_check,
        } => {
            let mut out = format!("{fps} fps, {bitrate}, {restarts} restarts, checked {last_check}");
            if let Some(error) = last_error {
                out.push_str(&format!(", error: {error}"));
            }
            out
        }
    }
}

/// Render stream rows as an aligned text table
pub fn format_table(rows: &[StreamRow]) -> String {
    if rows.is_empty() {
        return "No active streams".to_string();
    }

    let headers = ["NAME", "SOURCE", "DESTINATION", "STATUS", "OWNER", "STARTED", "STOP", "HEALTH"];
    let cells: Vec<[String; 8]> = rows
        .iter()
        .map(|row| {
            [
                row.name.clone(),
                row.source.clone(),
                row.destination.clone(),
                row.status.clone(),
                row.owner.clone(),
                row.started.clone(),
                if row.stop_enabled { "ready" } else { "stopping" }.to_string(),
                health_summary(&row.health),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &cells {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let format_line = |values: Vec<&str>| -> String {
        values
            .iter()
            .zip(widths.iter())
            .map(|(value, width)| format!("{value:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![format_line(headers.to_vec())];
    for row in &cells {
        lines.push(format_line(row.iter().map(String::as_str).collect()));
    }
    lines.join("\n")
}

/// Render the source catalog
pub fn format_sources(settings: &ClientSettings) -> String {
    if settings.sources.is_empty() {
        return "No sources configured; use custom:URL inputs".to_string();
    }
    settings
        .sources
        .iter()
        .map(|source| match &source.preview {
            Some(_) => format!("  {} (preview)", source.name),
            None => format!("  {}", source.name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Event sink that prints to the terminal. Table re-renders are printed only when
/// a stream appears, disappears or changes status.
#[derive(Default)]
pub struct ConsoleEventSink {
    last_shape: Mutex<Option<Vec<(String, String, bool)>>>,
}

impl ConsoleEventSink {
    fn table_changed(&self, rows: &[StreamRow]) -> bool {
        let shape: Vec<(String, String, bool)> = rows
            .iter()
            .map(|r| (r.name.clone(), r.status.clone(), r.stop_enabled))
            .collect();
        match self.last_shape.lock() {
            Ok(mut last) => {
                if last.as_ref() == Some(&shape) {
                    false
                } else {
                    *last = Some(shape);
                    true
                }
            }
            Err(_) => true,
        }
    }

    fn render(&self, event: &str, payload: Value) -> Option<String> {
        match event {
            STREAMS_UPDATED => {
                let rows: Vec<StreamRow> = serde_json::from_value(payload).ok()?;
                self.table_changed(&rows).then(|| format_table(&rows))
            }
            UI_NOTICE => {
                let notice: Notice = serde_json::from_value(payload).ok()?;
                Some(match notice.level {
                    NoticeLevel::Blocking => format!("!! {}", notice.message),
                    NoticeLevel::Inline => format!("! {}", notice.message),
                })
            }
            PREVIEW_STATE => {
                let phase: PreviewPhase = serde_json::from_value(payload.get("phase")?.clone()).ok()?;
                Some(format!("preview: {phase:?}").to_lowercase())
            }
            PREVIEW_ERROR => {
                let notice: Notice = serde_json::from_value(payload).ok()?;
                Some(format!("preview error: {} (type 'dismiss' to clear)", notice.message))
            }
            PREVIEW_ERROR_CLEARED => None,
            _ => None,
        }
    }
}

impl EventSink for ConsoleEventSink {
    fn emit(&self, event: &str, payload: Value) {
        if let Some(text) = self.render(event, payload) {
            println!("{text}");
        }
    }
}

/// What the input loop should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Components a console command acts on
pub struct Console {
    pub engine: Arc<SyncEngine>,
    pub preview: Arc<PreviewManager>,
    pub settings: ClientSettings,
}

impl Console {
    /// Parse and run one input line
    pub async fn handle_line(&self, line: &str) -> Flow {
        match parse_command(line, &self.settings) {
            Ok(command) => self.execute(command).await,
            Err(ParseError::Empty) => Flow::Continue,
            Err(e) => {
                println!("{e}");
                Flow::Continue
            }
        }
    }

    pub async fn execute(&self, command: ConsoleCommand) -> Flow {
        match command {
            ConsoleCommand::List => println!("{}", format_table(&self.engine.rows().await)),
            ConsoleCommand::Sources => println!("{}", format_sources(&self.settings)),
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => return Flow::Quit,
            ConsoleCommand::Dismiss => self.preview.dismiss_error().await,
            ConsoleCommand::Start(request) => {
                if let Ok(submitted) = self.engine.start_stream(&request).await {
                    println!("start submitted for '{}'", submitted.stream_name);
                }
            }
            ConsoleCommand::Stop(name) => {
                // acknowledgement is awaited in the background so the prompt stays live
                let engine = self.engine.clone();
                tokio::spawn(async move {
                    if let Ok(ack) = engine.stop_stream(&name).await {
                        println!("stopped '{}'", ack.stream_name);
                    }
                });
            }
            ConsoleCommand::Preview(PreviewTarget::Off) | ConsoleCommand::Preview(PreviewTarget::Custom) => {
                self.preview.select_custom().await;
            }
            ConsoleCommand::Preview(PreviewTarget::Source(name)) => {
                let Some(source) = self.settings.find_source(&name) else {
                    println!("{}", ParseError::UnknownSource(name));
                    return Flow::Continue;
                };
                match source.preview.clone() {
                    Some(url) => {
                        let preview = self.preview.clone();
                        tokio::spawn(async move {
                            let _ = preview.select_previewable(&url).await;
                        });
                    }
                    None => {
                        println!("'{}' has no preview", source.name);
                        self.preview.select_custom().await;
                    }
                }
            }
        }
        Flow::Continue
    }
}
