//! Standalone relaybus node: reads messages line by line and delivers them through an
//! until-successful router backed by a directory on disk.

use std::fs::OpenOptions;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{info, warn};

use relaybus_core::EventStoreKey;
use relaybus_events::{DeadLetterSink, MessageEvent, MessageProcessor, ProcessingError};
use relaybus_infra::{FileObjectStore, ObjectStore, ObjectStoreError};
use relaybus_routing::{UntilSuccessful, UntilSuccessfulConfig};

pub const ENV_STORE_DIR: &str = "RELAYBUS_STORE_DIR";
pub const ENV_DEAD_LETTER_DIR: &str = "RELAYBUS_DEAD_LETTER_DIR";
pub const ENV_OUTPUT: &str = "RELAYBUS_OUTPUT";
pub const ENV_DRAIN_SECONDS: &str = "RELAYBUS_DRAIN_SECONDS";

/// Node-level settings; router settings live in [`UntilSuccessfulConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSettings {
    pub store_dir: PathBuf,
    /// Exhausted events are written here. Dropped when unset.
    pub dead_letter_dir: Option<PathBuf>,
    /// Delivered payloads are appended to this file; stdout when unset.
    pub output: Option<PathBuf>,
    /// How long to wait for in-flight events once input ends.
    pub drain_timeout: Duration,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("relaybus-store"),
            dead_letter_dir: None,
            output: None,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl NodeSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Self::default();
        if let Ok(dir) = std::env::var(ENV_STORE_DIR) {
            settings.store_dir = PathBuf::from(dir);
        }
        settings.dead_letter_dir = std::env::var(ENV_DEAD_LETTER_DIR).ok().map(PathBuf::from);
        settings.output = std::env::var(ENV_OUTPUT).ok().map(PathBuf::from);
        if let Ok(raw) = std::env::var(ENV_DRAIN_SECONDS) {
            let secs: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {ENV_DRAIN_SECONDS}: '{raw}'"))?;
            settings.drain_timeout = Duration::from_secs(secs);
        }
        Ok(settings)
    }
}

/// Delivers payload text, one line per event.
pub struct LineWriter {
    output: Option<PathBuf>,
}

impl LineWriter {
    pub fn new(output: Option<PathBuf>) -> Self {
        Self { output }
    }
}

impl MessageProcessor for LineWriter {
    fn process(&self, event: MessageEvent) -> Result<Option<MessageEvent>, ProcessingError> {
        let text = event.payload().as_text().unwrap_or_default();
        let written = match &self.output {
            Some(path) => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .and_then(|mut file| writeln!(file, "{text}")),
            None => writeln!(std::io::stdout().lock(), "{text}"),
        };
        written.map_err(|e| ProcessingError::unavailable(format!("output: {e}")))?;
        Ok(None)
    }
}

/// Keeps dead letters in their own file store, keyed by event id.
pub struct DirectoryDeadLetters {
    store: FileObjectStore<String>,
}

impl DirectoryDeadLetters {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, ObjectStoreError> {
        Ok(Self {
            store: FileObjectStore::open(dir.as_ref())?,
        })
    }
}

impl DeadLetterSink for DirectoryDeadLetters {
    fn send(&self, event: MessageEvent) -> Result<(), ProcessingError> {
        let key = format!("{}.{}", event.flow(), event.id());
        self.store
            .store(&key, &event)
            .map_err(|e| ProcessingError::unavailable(e.to_string()))?;
        warn!(key = %key, "event dead-lettered");
        Ok(())
    }
}

/// Line counts from [`Node::feed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub accepted: usize,
    pub rejected: usize,
}

/// A running node: router plus a handle on its store for draining.
pub struct Node {
    router: UntilSuccessful,
    store: Arc<FileObjectStore<EventStoreKey>>,
}

impl Node {
    pub fn build(config: UntilSuccessfulConfig, settings: &NodeSettings) -> anyhow::Result<Self> {
        let store = Arc::new(
            FileObjectStore::<EventStoreKey>::open(&settings.store_dir).with_context(|| {
                format!("failed to open store at {}", settings.store_dir.display())
            })?,
        );

        let mut builder = UntilSuccessful::builder(config)
            .processor(LineWriter::new(settings.output.clone()))
            .object_store(Arc::clone(&store));
        if let Some(dir) = &settings.dead_letter_dir {
            let sink = DirectoryDeadLetters::open(dir).with_context(|| {
                format!("failed to open dead-letter directory {}", dir.display())
            })?;
            builder = builder.dead_letter_sink(sink);
        }

        let router = builder.build().context("invalid router configuration")?;
        Ok(Self { router, store })
    }

    pub fn router(&self) -> &UntilSuccessful {
        &self.router
    }

    /// Submit every non-blank line of `input` as a text event.
    ///
    /// A line the router refuses is logged and counted; reading errors abort.
    pub fn feed<R: BufRead>(&self, input: R) -> anyhow::Result<FeedSummary> {
        let flow = self.router.config().flow.clone();
        let mut summary = FeedSummary::default();

        for line in input.lines() {
            let line = line.context("failed to read input")?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match self.router.submit(MessageEvent::new(flow.clone(), line)) {
                Ok(_) => summary.accepted += 1,
                Err(err) => {
                    warn!(error = %err, "line rejected");
                    summary.rejected += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Events of this router still in the store.
    pub fn pending(&self) -> anyhow::Result<usize> {
        let config = self.router.config();
        let keys = ObjectStore::<EventStoreKey, MessageEvent>::all_keys(&self.store)?;
        Ok(keys
            .filter(|k| k.belongs_to(&config.flow, &config.cluster_id))
            .count())
    }

    /// Wait until nothing is pending or `timeout` passes. Returns what is left.
    pub fn drain(&self, timeout: Duration) -> anyhow::Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            let pending = self.pending()?;
            if pending == 0 || Instant::now() >= deadline {
                return Ok(pending);
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn shutdown(self) {
        self.router.stop();
        info!(stats = ?self.router.stats(), "node stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybus_core::FlowName;
    use relaybus_infra::ExecutionMode;
    use std::io::Cursor;

    fn config() -> UntilSuccessfulConfig {
        UntilSuccessfulConfig::new(FlowName::parse("lines").unwrap())
            .with_execution_mode(ExecutionMode::Synchronous)
            .with_between_retries(Duration::ZERO)
            .with_max_retries(1)
            .with_worker_threads(1)
    }

    #[test]
    fn lines_are_delivered_to_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = NodeSettings {
            store_dir: dir.path().join("store"),
            output: Some(dir.path().join("out.txt")),
            ..NodeSettings::default()
        };

        let node = Node::build(config(), &settings).unwrap();
        let summary = node.feed(Cursor::new("first\n\n  second  \n")).unwrap();

        assert_eq!(summary, FeedSummary { accepted: 2, rejected: 0 });
        assert_eq!(node.pending().unwrap(), 0);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.txt")).unwrap(),
            "first\nsecond\n"
        );
        node.shutdown();
    }

    #[test]
    fn undeliverable_lines_end_up_in_the_dead_letter_directory() {
        let dir = tempfile::tempdir().unwrap();
        let settings = NodeSettings {
            store_dir: dir.path().join("store"),
            dead_letter_dir: Some(dir.path().join("dead")),
            // A directory cannot be opened for appending.
            output: Some(dir.path().to_path_buf()),
            ..NodeSettings::default()
        };

        let node = Node::build(config(), &settings).unwrap();
        node.feed(Cursor::new("doomed\n")).unwrap();

        assert_eq!(node.pending().unwrap(), 0);
        assert_eq!(node.router().stats().dead_lettered, 1);

        let dead = FileObjectStore::<String>::new(dir.path().join("dead"));
        let keys: Vec<String> = ObjectStore::<String, MessageEvent>::all_keys(&dead)
            .unwrap()
            .collect();
        assert_eq!(keys.len(), 1);
        let event: MessageEvent = dead.retrieve(&keys[0]).unwrap().unwrap();
        assert_eq!(event.process_attempt_count(), Some(2));
        assert_eq!(event.payload().as_text().as_deref(), Some("doomed"));
    }

    #[test]
    fn drain_returns_immediately_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let settings = NodeSettings {
            store_dir: dir.path().join("store"),
            output: Some(dir.path().join("out.txt")),
            ..NodeSettings::default()
        };
        let node = Node::build(config(), &settings).unwrap();
        assert_eq!(node.drain(Duration::from_secs(5)).unwrap(), 0);
    }
}
