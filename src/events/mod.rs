//! Event extraction from the game server's diagnostic output.
//!
//! Every line becomes a [`ServerEvent::RawLine`], optionally followed by one
//! classified event. Classification is positional over space-separated
//! tokens and lives behind [`LineClassifier`].

use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    RawLine(String),
    PlayerJoined { name: String },
    PlayerLeft { name: String },
    PlayerSaid { name: String, message: String },
    PlayerIssuedCommand { name: String, command: String },
    StartupComplete,
}

pub trait LineClassifier: Send + Sync {
    fn classify(&self, line: &str) -> Option<ServerEvent>;
}

/// Matches the vanilla server log layout:
/// `<date> <time> [INFO] <name> ...`
#[derive(Debug, Default, Clone, Copy)]
pub struct PositionalClassifier;

impl LineClassifier for PositionalClassifier {
    fn classify(&self, line: &str) -> Option<ServerEvent> {
        let tokens: Vec<&str> = line.split(' ').collect();
        let len = tokens.len();

        if len >= 6 && tokens[5] == "logged" {
            return Some(ServerEvent::PlayerJoined { name: tokens[3].to_string() });
        }
        if len >= 5 && tokens[4] == "lost" {
            return Some(ServerEvent::PlayerLeft { name: tokens[3].to_string() });
        }
        if len >= 5 && tokens[3].starts_with('<') {
            // "<name>" → "name"
            let mut chars = tokens[3].chars();
            chars.next();
            chars.next_back();
            let offset: usize = tokens[..4].iter().map(|t| t.len() + 1).sum();
            return Some(ServerEvent::PlayerSaid {
                name: chars.as_str().to_string(),
                message: line[offset..].to_string(),
            });
        }
        if len >= 8 && tokens[4] == "issued" {
            return Some(ServerEvent::PlayerIssuedCommand {
                name: tokens[3].to_string(),
                command: tokens[7..].join(" "),
            });
        }
        if len >= 4 && tokens[3] == "Done" {
            return Some(ServerEvent::StartupComplete);
        }
        None
    }
}

/// Events for one line, `RawLine` first. Blank lines yield nothing.
pub fn extract(classifier: &dyn LineClassifier, line: &str) -> Vec<ServerEvent> {
    if line.trim().is_empty() {
        return Vec::new();
    }
    let mut events = vec![ServerEvent::RawLine(line.to_string())];
    events.extend(classifier.classify(line));
    events
}

pub struct EventExtractor;

impl EventExtractor {
    /// Read `reader` line by line until EOF or until `token` is cancelled,
    /// whichever comes first.
    pub fn spawn<R>(
        reader: R,
        token: CancellationToken,
        classifier: Arc<dyn LineClassifier>,
    ) -> (mpsc::Receiver<ServerEvent>, JoinHandle<()>)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                let line = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = lines.next_line() => match next {
                        Ok(Some(line)) => line,
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!("Server output read failed: {}", e);
                            break;
                        }
                    },
                };
                for event in extract(classifier.as_ref(), &line) {
                    // 소비자가 막혀 있어도 취소는 통해야 한다
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        sent = tx.send(event) => if sent.is_err() { return },
                    }
                }
            }
            tracing::debug!("Event extractor stopped");
        });
        (rx, handle)
    }
}
