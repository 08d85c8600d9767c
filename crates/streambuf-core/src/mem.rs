//! In-memory backends.
//!
//! `MemReader` serves a byte vector as chunked input; `MemSink` collects
//! output. They stand in for the out-of-scope file and pipe backends:
//! real enough to drive every core path (chunked refills force backup
//! and marker machinery, a small sink capacity forces overflow), and
//! instrumented with shared call counters so tests can assert how often
//! the backend was actually invoked.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::backend::{StreamBackend, Whence};
use crate::error::{StreamError, StreamResult};
use crate::stream::{StreamState, alloc_buffer};

/// Shared backend call counters.
///
/// Clones observe the same counters, so a copy taken before the backend
/// moves into a [`crate::stream::Stream`] stays readable.
#[derive(Debug, Default, Clone)]
pub struct BackendStats {
    refills: Arc<AtomicUsize>,
    overflows: Arc<AtomicUsize>,
}

impl BackendStats {
    /// Number of underflow refills performed.
    #[must_use]
    pub fn refill_calls(&self) -> usize {
        self.refills.load(Ordering::Relaxed)
    }

    /// Number of overflow invocations, flush sentinels included.
    #[must_use]
    pub fn overflow_calls(&self) -> usize {
        self.overflows.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// MemReader
// ---------------------------------------------------------------------------

/// Read-only backend over an in-memory byte vector, refilled in fixed
/// chunks.
#[derive(Debug)]
pub struct MemReader {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    stats: BackendStats,
}

impl MemReader {
    /// Serve `data` in one refill.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        let chunk = data.len().max(1);
        Self::with_chunk(data, chunk)
    }

    /// Serve `data` in refills of at most `chunk` bytes.
    #[must_use]
    pub fn with_chunk(data: Vec<u8>, chunk: usize) -> Self {
        assert!(chunk > 0, "chunk size must be positive");
        MemReader {
            data,
            pos: 0,
            chunk,
            stats: BackendStats::default(),
        }
    }

    /// Handle to this backend's call counters.
    #[must_use]
    pub fn stats(&self) -> BackendStats {
        self.stats.clone()
    }
}

impl StreamBackend for MemReader {
    fn underflow(&mut self, state: &mut StreamState) -> StreamResult<u8> {
        if state.buffer_len() == 0 {
            state.install_buffer(alloc_buffer(self.chunk)?, true);
        }
        let room = state.buffer_len().min(self.chunk);
        let n = room.min(self.data.len() - self.pos);
        if n == 0 {
            state.flags_mut().eof_seen = true;
            return Err(StreamError::EndOfData);
        }
        state.buffer_mut()[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        self.stats.refills.fetch_add(1, Ordering::Relaxed);
        state.set_get_area(0, 0, n);
        Ok(state.buffer()[0])
    }

    fn seekoff(
        &mut self,
        state: &mut StreamState,
        offset: i64,
        whence: Whence,
    ) -> StreamResult<u64> {
        let base = match whence {
            Whence::Set => 0,
            Whence::Cur => self.pos as i64 - state.remaining_get() as i64,
            Whence::End => self.data.len() as i64,
        };
        let target = base + offset;
        if target < 0 || target > self.data.len() as i64 {
            return Err(StreamError::Backend);
        }
        // Repositioning invalidates buffered history.
        state.unsave_markers();
        self.pos = target as usize;
        state.set_get_area(0, 0, 0);
        state.flags_mut().eof_seen = false;
        Ok(target as u64)
    }

    fn stat(&mut self, _state: &StreamState) -> StreamResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn showmanyc(&mut self, _state: &StreamState) -> Option<usize> {
        Some(self.data.len() - self.pos)
    }
}

// ---------------------------------------------------------------------------
// MemSink
// ---------------------------------------------------------------------------

/// Write-only backend collecting flushed output in a shared vector.
///
/// Flushed bytes stay in the stream buffer (marked consumed) until the
/// put area wraps, so a read following a flush can still see the written
/// content through the get/put switch.
#[derive(Debug)]
pub struct MemSink {
    capacity: usize,
    out: Arc<Mutex<Vec<u8>>>,
    stats: BackendStats,
}

impl MemSink {
    /// Sink with the default buffer capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(crate::stream::BUFSIZ)
    }

    /// Sink whose stream buffer holds `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        MemSink {
            capacity,
            out: Arc::new(Mutex::new(Vec::new())),
            stats: BackendStats::default(),
        }
    }

    /// Shared handle to the collected output.
    #[must_use]
    pub fn output(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.out)
    }

    /// Handle to this backend's call counters.
    #[must_use]
    pub fn stats(&self) -> BackendStats {
        self.stats.clone()
    }
}

impl Default for MemSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamBackend for MemSink {
    fn overflow(&mut self, state: &mut StreamState, byte: Option<u8>) -> StreamResult<()> {
        self.stats.overflows.fetch_add(1, Ordering::Relaxed);
        if state.flags().no_writes {
            return Err(StreamError::ReadOnly);
        }
        if state.buffer_len() == 0 {
            state.install_buffer(alloc_buffer(self.capacity)?, true);
            state.set_put_area(0, 0, self.capacity);
        }
        match byte {
            None => {
                self.out.lock().extend_from_slice(state.pending_output());
                state.mark_output_flushed();
            }
            Some(b) => {
                let (mut base, mut ptr, mut end) = state.put_area();
                if ptr >= end {
                    self.out.lock().extend_from_slice(state.pending_output());
                    base = 0;
                    ptr = 0;
                    end = state.buffer_len();
                }
                state.buffer_mut()[ptr] = b;
                state.set_put_area(base, ptr + 1, end);
            }
        }
        state.flags_mut().currently_putting = true;
        Ok(())
    }

    fn sync(&mut self, state: &mut StreamState) -> StreamResult<()> {
        if state.has_pending_output() {
            self.overflow(state, None)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;

    #[test]
    fn reader_refills_in_chunks() {
        let reader = MemReader::with_chunk(b"0123456789".to_vec(), 4);
        let stats = reader.stats();
        let mut s = Stream::new(reader);
        let mut out = [0u8; 10];
        assert_eq!(s.read(&mut out), 10);
        assert_eq!(stats.refill_calls(), 3);
        assert!(s.state().flags().eof_seen || s.getc() == Err(StreamError::EndOfData));
    }

    #[test]
    fn reader_eof_sets_flag() {
        let mut s = Stream::new(MemReader::new(b"x".to_vec()));
        assert_eq!(s.getc(), Ok(b'x'));
        assert_eq!(s.getc(), Err(StreamError::EndOfData));
        assert!(s.state().flags().eof_seen);
    }

    #[test]
    fn reader_seek_rewinds() {
        let mut s = Stream::new(MemReader::with_chunk(b"abcdef".to_vec(), 2));
        let mut out = [0u8; 3];
        s.read(&mut out);
        assert_eq!(s.seek(1, Whence::Set), Ok(1));
        assert_eq!(s.getc(), Ok(b'b'));
        assert_eq!(s.seek(-1, Whence::End), Ok(5));
        assert_eq!(s.getc(), Ok(b'f'));
    }

    #[test]
    fn reader_seek_out_of_range_fails() {
        let mut s = Stream::new(MemReader::new(b"abc".to_vec()));
        assert_eq!(s.seek(7, Whence::Set), Err(StreamError::Backend));
        assert_eq!(s.seek(-1, Whence::Set), Err(StreamError::Backend));
    }

    #[test]
    fn reader_reports_stat_and_available() {
        let reader = MemReader::with_chunk(b"abcd".to_vec(), 2);
        let mut s = Stream::new(reader);
        assert_eq!(s.available(), 4);
        assert_eq!(s.getc(), Ok(b'a'));
        assert_eq!(s.available(), 1);
    }

    #[test]
    fn sink_collects_flushed_output() {
        let sink = MemSink::with_capacity(4);
        let out = sink.output();
        let mut s = Stream::new(sink);
        assert_eq!(s.write(b"hello"), 5);
        s.flush().unwrap();
        assert_eq!(out.lock().as_slice(), b"hello");
    }

    #[test]
    fn sink_rejects_no_writes_stream() {
        let sink = MemSink::with_capacity(4);
        let mut s = Stream::new(sink);
        s.state_mut().flags_mut().no_writes = true;
        assert_eq!(s.write(b"hi"), 0);
    }

    #[test]
    fn sink_sync_flushes_pending() {
        let sink = MemSink::with_capacity(8);
        let out = sink.output();
        let mut s = Stream::new(sink);
        s.write(b"ab");
        s.sync().unwrap();
        assert_eq!(out.lock().as_slice(), b"ab");
    }
}
