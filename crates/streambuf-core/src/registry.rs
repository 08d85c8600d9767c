//! Process-wide stream registry.
//!
//! Every linked stream is reachable from a registry, so "flush
//! everything" and exit-time cleanup can walk the full set. The walk
//! never holds the registry lock across backend I/O: it snapshots the
//! stream list, releases the registry, then locks each stream in turn.
//! A stamp bumped on every link and unlink detects concurrent membership
//! changes; when the stamp moves mid-walk the walk restarts from the
//! head, so a stream present for the whole operation is flushed at least
//! once (and harmlessly possibly twice).
//!
//! Lock order is registry before stream, everywhere.

use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, MutexGuard};

use crate::stream::{Orientation, Stream, StreamId};

/// A registry-owned stream behind its own mutex.
///
/// Handles are cloned freely; the stream itself is reached only through
/// [`SharedStream::lock`], so the registry can flush it from any thread.
#[derive(Debug)]
pub struct SharedStream {
    id: StreamId,
    inner: Mutex<Stream>,
}

impl SharedStream {
    fn new(stream: Stream) -> Arc<Self> {
        Arc::new(SharedStream {
            id: stream.id(),
            inner: Mutex::new(stream),
        })
    }

    /// Identifier of the wrapped stream.
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Lock the stream, blocking until it is free.
    pub fn lock(&self) -> MutexGuard<'_, Stream> {
        self.inner.lock()
    }

    /// Lock the stream without blocking.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, Stream>> {
        self.inner.try_lock()
    }

    /// Close the stream: flush pending output best-effort, then release
    /// its buffers and markers. Unlink from the registry separately.
    pub fn finalize(&self) {
        let mut stream = self.lock();
        let _ = stream.flush();
        stream.finish();
    }
}

#[derive(Debug)]
struct RegistryInner {
    streams: Vec<Arc<SharedStream>>,
    stamp: u64,
}

/// Collection of linked streams with stamp-tracked membership.
#[derive(Debug)]
pub struct StreamRegistry {
    inner: Mutex<RegistryInner>,
}

impl StreamRegistry {
    #[must_use]
    pub const fn new() -> Self {
        StreamRegistry {
            inner: Mutex::new(RegistryInner {
                streams: Vec::new(),
                stamp: 0,
            }),
        }
    }

    /// Take ownership of `stream` and link it at the head of the list.
    pub fn link(&self, stream: Stream) -> Arc<SharedStream> {
        let shared = SharedStream::new(stream);
        let mut inner = self.inner.lock();
        inner.streams.insert(0, Arc::clone(&shared));
        inner.stamp += 1;
        shared.lock().state_mut().flags_mut().linked = true;
        shared
    }

    /// Remove the stream with `id`, returning its handle if it was
    /// linked here.
    pub fn unlink(&self, id: StreamId) -> Option<Arc<SharedStream>> {
        let mut inner = self.inner.lock();
        let idx = inner.streams.iter().position(|s| s.id == id)?;
        let shared = inner.streams.remove(idx);
        inner.stamp += 1;
        shared.lock().state_mut().flags_mut().linked = false;
        Some(shared)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().streams.is_empty()
    }

    /// Current membership stamp.
    #[must_use]
    pub fn stamp(&self) -> u64 {
        self.inner.lock().stamp
    }

    /// Handles to every linked stream, head first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<SharedStream>> {
        self.inner.lock().streams.clone()
    }

    /// Flush every linked stream with pending byte-oriented output.
    ///
    /// Returns the number of flushes performed.
    pub fn flush_all(&self) -> usize {
        self.flush_streams(true, |s| s.state().has_pending_output())
    }

    /// Flush only line-buffered writable streams. Used before a blocking
    /// read so prompts written elsewhere become visible.
    pub fn flush_all_line_buffered(&self) -> usize {
        self.flush_streams(true, |s| {
            let flags = s.state().flags();
            flags.line_buffered && !flags.no_writes && s.state().has_pending_output()
        })
    }

    /// Exit-time cleanup: flush what can be flushed without blocking,
    /// then drop internal buffers so later unmediated writes cannot be
    /// lost in a buffer nobody will flush again.
    pub fn cleanup(&self) {
        self.flush_streams(false, |s| s.state().has_pending_output());
        const MAX_TRIES: usize = 2;
        for shared in self.snapshot() {
            let mut guard = None;
            for attempt in 0..MAX_TRIES {
                if let Some(g) = shared.try_lock() {
                    guard = Some(g);
                    break;
                }
                if attempt + 1 < MAX_TRIES {
                    std::thread::yield_now();
                }
            }
            // A stream locked by a wedged thread keeps its buffer; a
            // blocking lock here could hang exit forever.
            let Some(mut stream) = guard else { continue };
            let flags = stream.state().flags();
            let writable = !flags.no_writes || flags.appending;
            if !flags.unbuffered && writable && stream.state().orientation() != Orientation::Unset
            {
                let _ = stream.set_buffer(None);
            }
            stream.state_mut().force_byte();
        }
    }

    fn flush_streams(&self, block: bool, should_flush: impl Fn(&Stream) -> bool) -> usize {
        let mut flushed = 0;
        'walk: loop {
            let (list, stamp) = {
                let inner = self.inner.lock();
                (inner.streams.clone(), inner.stamp)
            };
            for shared in list {
                let guard = if block {
                    Some(shared.lock())
                } else {
                    shared.try_lock()
                };
                if let Some(mut stream) = guard {
                    if should_flush(&stream) {
                        let _ = stream.flush();
                        flushed += 1;
                    }
                }
                if self.inner.lock().stamp != stamp {
                    continue 'walk;
                }
            }
            return flushed;
        }
    }
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_REGISTRY: OnceLock<StreamRegistry> = OnceLock::new();

/// The process-wide registry.
pub fn global_registry() -> &'static StreamRegistry {
    GLOBAL_REGISTRY.get_or_init(StreamRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::{MemReader, MemSink};

    #[test]
    fn link_sets_flag_and_bumps_stamp() {
        let registry = StreamRegistry::new();
        let before = registry.stamp();
        let shared = registry.link(Stream::new(MemSink::with_capacity(8)));
        assert!(shared.lock().state().flags().linked);
        assert_eq!(registry.len(), 1);
        assert!(registry.stamp() > before);
    }

    #[test]
    fn unlink_removes_and_clears_flag() {
        let registry = StreamRegistry::new();
        let shared = registry.link(Stream::new(MemSink::with_capacity(8)));
        let id = shared.id();
        let removed = registry.unlink(id).unwrap();
        assert!(!removed.lock().state().flags().linked);
        assert!(registry.is_empty());
        assert!(registry.unlink(id).is_none());
    }

    #[test]
    fn newest_stream_is_walked_first() {
        let registry = StreamRegistry::new();
        let a = registry.link(Stream::new(MemSink::with_capacity(8)));
        let b = registry.link(Stream::new(MemSink::with_capacity(8)));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].id(), b.id());
        assert_eq!(snapshot[1].id(), a.id());
    }

    #[test]
    fn flush_all_reaches_every_pending_stream() {
        let registry = StreamRegistry::new();
        let sink_a = MemSink::with_capacity(16);
        let sink_b = MemSink::with_capacity(16);
        let out_a = sink_a.output();
        let out_b = sink_b.output();
        let a = registry.link(Stream::new(sink_a));
        let b = registry.link(Stream::new(sink_b));
        a.lock().write(b"left");
        b.lock().write(b"right");
        assert_eq!(registry.flush_all(), 2);
        assert_eq!(out_a.lock().as_slice(), b"left");
        assert_eq!(out_b.lock().as_slice(), b"right");
        // Nothing pending any more.
        assert_eq!(registry.flush_all(), 0);
    }

    #[test]
    fn line_buffered_flush_skips_block_buffered() {
        let registry = StreamRegistry::new();
        let lined = MemSink::with_capacity(16);
        let block = MemSink::with_capacity(16);
        let lined_out = lined.output();
        let block_out = block.output();
        let a = registry.link(Stream::new(lined));
        let b = registry.link(Stream::new(block));
        a.lock().state_mut().flags_mut().line_buffered = true;
        a.lock().write(b"prompt");
        b.lock().write(b"bulk");
        assert_eq!(registry.flush_all_line_buffered(), 1);
        assert_eq!(lined_out.lock().as_slice(), b"prompt");
        assert!(block_out.lock().is_empty());
    }

    #[test]
    fn cleanup_unbuffers_writable_streams() {
        let registry = StreamRegistry::new();
        let sink = MemSink::with_capacity(16);
        let out = sink.output();
        let shared = registry.link(Stream::new(sink));
        shared.lock().write(b"tail");
        registry.cleanup();
        assert_eq!(out.lock().as_slice(), b"tail");
        let stream = shared.lock();
        assert!(stream.state().flags().unbuffered);
        assert_eq!(stream.state().orientation(), Orientation::Byte);
    }

    #[test]
    fn cleanup_leaves_readers_buffered() {
        let registry = StreamRegistry::new();
        let shared = registry.link(Stream::new(MemReader::new(b"data".to_vec())));
        {
            let mut stream = shared.lock();
            stream.state_mut().flags_mut().no_writes = true;
            assert_eq!(stream.getc(), Ok(b'd'));
        }
        registry.cleanup();
        assert!(!shared.lock().state().flags().unbuffered);
    }

    #[test]
    fn finalize_flushes_and_releases() {
        let registry = StreamRegistry::new();
        let sink = MemSink::with_capacity(16);
        let out = sink.output();
        let shared = registry.link(Stream::new(sink));
        shared.lock().write(b"bye");
        shared.finalize();
        registry.unlink(shared.id());
        assert_eq!(out.lock().as_slice(), b"bye");
        assert_eq!(shared.lock().state().buffer_len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_link_unlink_leaves_registry_consistent() {
        use std::thread;
        static REGISTRY: StreamRegistry = StreamRegistry::new();
        let initial = REGISTRY.stamp();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                thread::spawn(|| {
                    for _ in 0..50 {
                        let shared = REGISTRY.link(Stream::new(MemSink::with_capacity(8)));
                        REGISTRY.unlink(shared.id());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(REGISTRY.is_empty());
        assert!(REGISTRY.stamp() >= initial + 800);
    }

    #[test]
    fn global_registry_is_a_singleton() {
        let a = global_registry() as *const StreamRegistry;
        let b = global_registry() as *const StreamRegistry;
        assert_eq!(a, b);
    }
}
