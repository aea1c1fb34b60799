//! Streaming source for the USDA release documents
//!
//! A release is one huge JSON object of the form
//! `{ "<rootKey>": [ record, record, ... ] }`. The whole document never fits
//! in memory, so it is parsed in a single forward pass on a blocking task:
//! a [`serde::de::DeserializeSeed`] walks the top-level object, streams the
//! elements of the root-key array one at a time, and pushes each element
//! into a bounded channel. The bounded channel is the flow control: when the
//! pipeline is busy the parser blocks on `blocking_send` and intake stops.

use fdc_common::RawRecord;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Failed to open source file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Root key '{0}' not found in source document")]
    RootKeyMissing(String),

    #[error("Failed to parse source document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Source task failed: {0}")]
    Task(String),
}

/// Handle to an in-progress streaming parse.
///
/// Dropping the stream cancels the parse: the parser's next send fails and
/// the blocking task winds down on its own.
pub struct RecordStream {
    rx: mpsc::Receiver<RawRecord>,
    handle: JoinHandle<Result<u64, SourceError>>,
}

impl RecordStream {
    /// Next element in document order, or `None` once the document (or the
    /// parse) has ended.
    pub async fn next(&mut self) -> Option<RawRecord> {
        self.rx.recv().await
    }

    /// Consume the stream and surface the parse outcome: the total element
    /// count on success, or the error that ended the parse early.
    pub async fn finish(self) -> Result<u64, SourceError> {
        drop(self.rx);
        self.handle
            .await
            .map_err(|e| SourceError::Task(e.to_string()))?
    }
}

/// Start streaming the elements of `root_key`'s array from the JSON document
/// at `path`. `buffer` bounds how many parsed elements may be in flight
/// between the parser and the consumer.
pub fn stream_root_array(
    path: impl Into<PathBuf>,
    root_key: impl Into<String>,
    buffer: usize,
) -> RecordStream {
    let path = path.into();
    let root_key = root_key.into();
    let (tx, rx) = mpsc::channel(buffer.max(1));

    let handle = tokio::task::spawn_blocking(move || {
        let file = File::open(&path).map_err(|source| SourceError::Open {
            path: path.clone(),
            source,
        })?;
        let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(file));
        let seed = RootArraySeed {
            root_key: &root_key,
            tx: &tx,
        };
        let emitted = seed.deserialize(&mut deserializer)?;
        emitted.ok_or(SourceError::RootKeyMissing(root_key))
    });

    RecordStream { rx, handle }
}

/// Walks the top-level object: streams the root key's array, ignores every
/// other entry without buffering it.
struct RootArraySeed<'a> {
    root_key: &'a str,
    tx: &'a mpsc::Sender<RawRecord>,
}

impl<'de> DeserializeSeed<'de> for RootArraySeed<'_> {
    /// Elements emitted, or `None` if the root key never appeared
    type Value = Option<u64>;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for RootArraySeed<'_> {
    type Value = Option<u64>;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("a JSON object with a top-level record array")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut emitted = None;
        while let Some(key) = map.next_key::<String>()? {
            if key == self.root_key {
                emitted = Some(map.next_value_seed(ElementSink { tx: self.tx })?);
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(emitted)
    }
}

/// Forwards each array element into the channel as soon as it is parsed
struct ElementSink<'a> {
    tx: &'a mpsc::Sender<RawRecord>,
}

impl<'de> DeserializeSeed<'de> for ElementSink<'_> {
    type Value = u64;

    fn deserialize<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: de::Deserializer<'de>,
    {
        deserializer.deserialize_seq(self)
    }
}

impl<'de> Visitor<'de> for ElementSink<'_> {
    type Value = u64;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        formatter.write_str("an array of records")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut count = 0u64;
        while let Some(element) = seq.next_element::<RawRecord>()? {
            // A closed channel means the consumer is gone; end the parse.
            self.tx
                .blocking_send(element)
                .map_err(|_| de::Error::custom("record channel closed"))?;
            count += 1;
        }
        Ok(count)
    }
}
