//! JSON-lines trace decoding.
//!
//! One [`TraceEvent`] per line; blank lines and lines starting with `#` are
//! skipped. Files are decoded on a separate thread and handed to the
//! replaying thread through a bounded channel:
//!
//! ```text
//! decoder thread ── bounded(1000) ──▶ dispatch ──▶ handler
//! ```

use crate::domain::TraceError;
use crossbeam_channel::bounded;
use heaptrace_common::TraceEvent;
use log::debug;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread;

use super::handler::{dispatch, TraceEventHandler};

/// Decoded events buffered between the decoder and the replaying thread
pub const PIPELINE_CAPACITY: usize = 1000;

/// Iterator over the events of a JSON-lines trace.
pub struct TraceReader<R> {
    reader: R,
    line: usize,
    buffer: String,
}

impl TraceReader<BufReader<File>> {
    /// # Errors
    ///
    /// `Io` if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, TraceError> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, line: 0, buffer: String::new() }
    }

    /// Number of the line read last, starting at 1
    #[must_use]
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceEvent, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buffer.clear();
            match self.reader.read_line(&mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => self.line += 1,
                Err(e) => return Some(Err(e.into())),
            }
            let text = self.buffer.trim();
            if text.is_empty() || text.starts_with('#') {
                continue;
            }
            return Some(
                serde_json::from_str(text)
                    .map_err(|e| TraceError::Malformed { line: self.line, reason: e.to_string() }),
            );
        }
    }
}

/// Outcome of a completed replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: u64,
}

/// Replay `events` into `handler` on the calling thread.
///
/// # Errors
///
/// The first decoding or handler error; later events are not replayed.
pub fn replay<H, I>(events: I, handler: &mut H) -> Result<ReplaySummary, TraceError>
where
    H: TraceEventHandler + ?Sized,
    I: IntoIterator<Item = Result<TraceEvent, TraceError>>,
{
    let mut summary = ReplaySummary { events: 0 };
    for event in events {
        dispatch(handler, &event?)?;
        summary.events += 1;
    }
    Ok(summary)
}

/// Decode `path` on a background thread and replay it into `handler`.
///
/// # Errors
///
/// `Io` if the file cannot be opened, `PipelineFailed` if the decoder
/// thread dies, otherwise as [`replay`].
pub fn replay_file<H: TraceEventHandler + ?Sized>(path: &Path, handler: &mut H) -> Result<ReplaySummary, TraceError> {
    let reader = TraceReader::open(path)?;
    let (event_tx, event_rx) = bounded(PIPELINE_CAPACITY);

    let decoder = thread::Builder::new()
        .name("trace-decoder".to_string())
        .spawn(move || {
            for event in reader {
                let failed = event.is_err();
                // Receiver gone: the replay stopped early
                if event_tx.send(event).is_err() || failed {
                    break;
                }
            }
        })?;

    let result = replay(event_rx.iter(), handler);
    // Unblock the decoder if the replay stopped before the end
    drop(event_rx);
    decoder.join().map_err(|_| TraceError::PipelineFailed("decoder thread panicked".to_string()))?;
    if let Ok(summary) = &result {
        debug!("Replayed {} events from {}", summary.events, path.display());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::EventCounter;
    use std::io::Write;

    const TRACE: &str = r#"
# header comment
{"event": "space_create", "index": 0, "start": 4096, "size": 4096}

{"event": "cleanup"}
"#;

    #[test]
    fn test_reader_skips_blank_and_comment_lines() {
        let events: Vec<TraceEvent> = TraceReader::new(TRACE.as_bytes()).collect::<Result<_, _>>().unwrap();
        assert_eq!(events, vec![TraceEvent::SpaceCreate { index: 0, start: 4096, size: 4096 }, TraceEvent::Cleanup]);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let trace = "{\"event\": \"cleanup\"}\n{\"event\": \"warp_drive\"}\n";
        let mut reader = TraceReader::new(trace.as_bytes());
        assert!(reader.next().unwrap().is_ok());
        match reader.next() {
            Some(Err(TraceError::Malformed { line, .. })) => assert_eq!(line, 2),
            other => panic!("expected malformed line, got {other:?}"),
        }
    }

    #[test]
    fn test_replay_file_through_pipeline() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for _ in 0..2500 {
            writeln!(file, "{{\"event\": \"cleanup\"}}").unwrap();
        }
        let mut counter = EventCounter::new();
        let summary = replay_file(file.path(), &mut counter).unwrap();
        assert_eq!(summary.events, 2500);
        assert_eq!(counter.count("cleanup"), 2500);
    }
}
