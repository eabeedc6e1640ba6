use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use prime_core::runlog::StreamFile;
use tracing::warn;

#[derive(Debug)]
struct SinkState {
    file: Option<StreamFile>,
    captured: Vec<u8>,
    limit: usize,
    written: u64,
}

impl SinkState {
    fn new(file: Option<StreamFile>, limit: usize) -> Self {
        Self {
            file,
            captured: Vec::new(),
            limit,
            written: 0,
        }
    }
}

/// Where a handler's interim output goes while it runs: everything goes
/// straight to the run's pending stream file, and the first `limit` bytes
/// are also kept in memory for result data and the cache.
///
/// Clones share the same state, so the dispatcher keeps one handle while
/// the handler task writes through another.
#[derive(Debug, Clone)]
pub struct StreamSink {
    state: Arc<Mutex<SinkState>>,
}

impl Default for StreamSink {
    fn default() -> Self {
        Self::detached()
    }
}

impl StreamSink {
    pub fn to_file(file: StreamFile, limit: usize) -> Self {
        Self::with_state(SinkState::new(Some(file), limit))
    }

    /// A sink that only captures, without a cap.
    pub fn detached() -> Self {
        Self::capped(usize::MAX)
    }

    /// A sink that only captures, keeping at most `limit` bytes.
    pub fn capped(limit: usize) -> Self {
        Self::with_state(SinkState::new(None, limit))
    }

    fn with_state(state: SinkState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn write(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.written += bytes.len() as u64;
        let room = state.limit.saturating_sub(state.captured.len());
        let kept = room.min(bytes.len());
        state.captured.extend_from_slice(&bytes[..kept]);
        if let Some(file) = state.file.as_mut() {
            if let Err(e) = file.write_all(bytes).and_then(|_| file.flush()) {
                warn!(error = %e, "Failed to write stream output");
            }
        }
    }

    /// The in-memory head of the output.
    pub fn captured(&self) -> Vec<u8> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .captured
            .clone()
    }

    /// Total bytes written, kept or not.
    pub fn written(&self) -> u64 {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).written
    }

    /// Whether output went past the in-memory cap.
    pub fn truncated(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.written > state.captured.len() as u64
    }

    /// Detach the stream file so the run log can number it.
    pub fn take_file(&self) -> Option<StreamFile> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .file
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_core::model::{ActionId, EnvSnapshot};
    use prime_core::runlog::RunContext;
    use tempfile::TempDir;

    #[test]
    fn test_clones_share_capture() {
        let sink = StreamSink::detached();
        let writer = sink.clone();
        writer.write(b"hello ");
        writer.write(b"");
        writer.write(b"world");
        assert_eq!(sink.captured(), b"hello world");
        assert!(!sink.truncated());
        assert!(sink.take_file().is_none());
    }

    #[test]
    fn test_capture_is_capped_but_file_gets_everything() {
        let tmp = TempDir::new().unwrap();
        let env = EnvSnapshot::capture("test", "m", tmp.path(), &[]);
        let mut run = RunContext::create(tmp.path(), "big output", &env).unwrap();
        let id = ActionId::parse("r1").unwrap();
        let sink = StreamSink::to_file(run.open_stream(&id).unwrap(), 8);

        sink.write(b"0123");
        sink.write(b"456789");
        sink.write(b"abcdef");
        assert_eq!(sink.captured(), b"01234567");
        assert_eq!(sink.written(), 16);
        assert!(sink.truncated());

        let file = sink.take_file().unwrap();
        assert_eq!(file.len(), 16);
        let path = run.commit_stream(file).unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"0123456789abcdef");
    }
}
