//! Generic buffered-stream state machine.
//!
//! Safe Rust model of a buffered byte stream over an abstract backend.
//! The stream keeps a main buffer that serves as either a *get area*
//! (unconsumed input) or a *put area* (pending output), an optional
//! *backup area* for pushed-back and marker-preserved history, and a set
//! of position markers that survive buffer refills.
//!
//! Design: raw pointer triples become index triples ([`Area`]) into
//! explicitly-owned `Vec<u8>` storage. The get area indexes the main
//! buffer, or the backup buffer while `in_backup` is set; the inactive
//! pair is parked in `stash` and the two are swapped by the switching
//! functions in [`backup`]. A stream is either getting or putting at any
//! instant; [`Stream::switch_to_get_mode`] performs the transition.

mod backup;
pub mod marker;

pub use marker::Marker;

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::StreamBackend;
use crate::error::{StreamError, StreamResult};
use marker::MarkerSlot;

/// Default size of an internally allocated stream buffer.
pub const BUFSIZ: usize = 8192;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a stream, embedded in marker handles and
/// used by the registry for unlinking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    fn fresh() -> Self {
        StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value, for diagnostics.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Stream orientation, bound on first use and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// Not yet used; first operation binds the orientation.
    #[default]
    Unset,
    /// Byte-oriented.
    Byte,
    /// Wide-oriented. Wide transcoding is outside this engine; a stream
    /// bound wide only rejects byte operations.
    Wide,
}

/// Per-stream state flags.
///
/// A plain bool-struct instead of a bit set; the meaning of each flag
/// matches its classic stdio counterpart.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamFlags {
    /// Registered in a [`crate::registry::StreamRegistry`].
    pub linked: bool,
    /// Buffer was supplied by the caller rather than allocated internally.
    pub user_buf: bool,
    /// Stream runs with the one-byte short buffer.
    pub unbuffered: bool,
    /// Flush pending output on newline (registry line-buffered flush).
    pub line_buffered: bool,
    /// Stream never accepts output.
    pub no_writes: bool,
    /// Output is appended; relevant to exit-time unbuffering.
    pub appending: bool,
    /// The get area currently lives in the backup buffer.
    pub in_backup: bool,
    /// The put area is active.
    pub currently_putting: bool,
    /// The backend reported end of input.
    pub eof_seen: bool,
}

/// Explicit name for the get/put phase a stream is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GetPutState {
    /// Put area active; pending output may exist.
    Putting,
    /// Get area active, main buffer.
    GettingMain,
    /// Get area active, backup buffer.
    GettingBackup,
}

/// Index triple delimiting an active buffer region.
///
/// Invariant: `base <= ptr <= end <= storage.len()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Area {
    pub base: usize,
    pub ptr: usize,
    pub end: usize,
}

/// Parked `(base, end)` pair of the inactive get area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Span {
    pub base: usize,
    pub end: usize,
}

/// Allocate a zeroed buffer, surfacing allocation failure instead of
/// aborting.
pub fn alloc_buffer(len: usize) -> StreamResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| StreamError::Allocation(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Recompute an output column after emitting `data`.
///
/// Returns the column of the character following `data` when the previous
/// column was `start`: zero-based distance from the last newline, or
/// `start + data.len()` if no newline was written.
#[must_use]
pub fn adjust_column(start: usize, data: &[u8]) -> usize {
    match data.iter().rposition(|&b| b == b'\n') {
        Some(i) => data.len() - i - 1,
        None => start + data.len(),
    }
}

// ---------------------------------------------------------------------------
// StreamState
// ---------------------------------------------------------------------------

/// Buffer and pointer state of a stream, shared between the core engine
/// and the backend.
///
/// Backends receive `&mut StreamState` in every [`StreamBackend`]
/// operation and manipulate the areas through the checked setters.
#[derive(Debug)]
pub struct StreamState {
    id: StreamId,
    orientation: Orientation,
    pub(crate) flags: StreamFlags,
    /// Main storage.
    pub(crate) buf: Vec<u8>,
    /// Backup storage; exists only while pushed-back or marker-preserved
    /// history exists.
    pub(crate) save: Option<Vec<u8>>,
    /// Active get area. Indexes `buf`, or `save` while `in_backup`.
    pub(crate) get: Area,
    /// The inactive `(base, end)` pair swapped out by the area switches.
    pub(crate) stash: Span,
    /// Put area; always indexes `buf`.
    pub(crate) put: Area,
    /// Start of preserved content inside the backup storage.
    pub(crate) backup_base: usize,
    pub(crate) markers: Vec<MarkerSlot>,
}

impl StreamState {
    fn new() -> Self {
        StreamState {
            id: StreamId::fresh(),
            orientation: Orientation::Unset,
            flags: StreamFlags::default(),
            buf: Vec::new(),
            save: None,
            get: Area::default(),
            stash: Span::default(),
            put: Area::default(),
            backup_base: 0,
            markers: Vec::new(),
        }
    }

    /// Identity of this stream.
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Current orientation.
    #[must_use]
    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Bind the orientation if still unset and report the result.
    ///
    /// An already-bound stream keeps its orientation; `Unset` requests
    /// only query.
    pub fn set_orientation(&mut self, want: Orientation) -> Orientation {
        if self.orientation == Orientation::Unset && want != Orientation::Unset {
            self.orientation = want;
        }
        self.orientation
    }

    /// Bind to byte orientation, failing if the stream is already wide.
    pub(crate) fn bind_byte(&mut self) -> StreamResult<()> {
        match self.set_orientation(Orientation::Byte) {
            Orientation::Wide => Err(StreamError::Orientation),
            _ => Ok(()),
        }
    }

    /// Force byte orientation unconditionally (exit-time poisoning of
    /// wide use).
    pub(crate) fn force_byte(&mut self) {
        self.orientation = Orientation::Byte;
    }

    /// Copy of the flag set.
    #[must_use]
    pub fn flags(&self) -> StreamFlags {
        self.flags
    }

    /// Mutable access to the flag set.
    pub fn flags_mut(&mut self) -> &mut StreamFlags {
        &mut self.flags
    }

    /// Which phase the stream is in.
    #[must_use]
    pub fn get_put_state(&self) -> GetPutState {
        if self.flags.currently_putting {
            GetPutState::Putting
        } else if self.flags.in_backup {
            GetPutState::GettingBackup
        } else {
            GetPutState::GettingMain
        }
    }

    #[must_use]
    pub(crate) fn in_put_mode(&self) -> bool {
        self.flags.currently_putting
    }

    /// True while backup storage exists.
    #[must_use]
    pub fn have_backup(&self) -> bool {
        self.save.is_some()
    }

    /// Capacity of the backup storage, 0 when absent.
    #[must_use]
    pub fn backup_capacity(&self) -> usize {
        self.save.as_ref().map_or(0, Vec::len)
    }

    // -- main buffer ---------------------------------------------------------

    /// The main buffer contents.
    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Mutable main buffer, for backend refills.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Main buffer capacity.
    #[must_use]
    pub fn buffer_len(&self) -> usize {
        self.buf.len()
    }

    /// Install `buf` as the main buffer, dropping the previous one.
    ///
    /// `internal` records whether the engine owns the sizing decision
    /// (clears `user_buf`) or the caller supplied the storage.
    pub fn install_buffer(&mut self, buf: Vec<u8>, internal: bool) {
        self.buf = buf;
        self.flags.user_buf = !internal;
    }

    /// Apply a setbuf request: `None` (or an empty buffer) switches to
    /// unbuffered operation on the one-byte short buffer, otherwise the
    /// supplied storage becomes the stream buffer. Both areas are reset.
    pub fn apply_setbuf(&mut self, buf: Option<Vec<u8>>) {
        match buf {
            Some(b) if !b.is_empty() => {
                self.flags.unbuffered = false;
                self.install_buffer(b, false);
            }
            _ => {
                self.flags.unbuffered = true;
                self.install_buffer(vec![0], false);
            }
        }
        self.get = Area::default();
        self.put = Area::default();
    }

    // -- areas ---------------------------------------------------------------

    fn get_storage_len(&self) -> usize {
        if self.flags.in_backup {
            self.backup_capacity()
        } else {
            self.buf.len()
        }
    }

    /// The storage the get area currently indexes.
    #[must_use]
    pub(crate) fn get_slice(&self) -> &[u8] {
        if self.flags.in_backup {
            self.save.as_deref().unwrap_or(&[])
        } else {
            &self.buf
        }
    }

    /// Replace the get area. Panics if the triple violates
    /// `base <= ptr <= end <= storage.len()`.
    pub fn set_get_area(&mut self, base: usize, ptr: usize, end: usize) {
        assert!(
            base <= ptr && ptr <= end && end <= self.get_storage_len(),
            "get area out of bounds"
        );
        self.get = Area { base, ptr, end };
    }

    /// Replace the put area. Panics if the triple violates
    /// `base <= ptr <= end <= buffer_len()`.
    pub fn set_put_area(&mut self, base: usize, ptr: usize, end: usize) {
        assert!(
            base <= ptr && ptr <= end && end <= self.buf.len(),
            "put area out of bounds"
        );
        self.put = Area { base, ptr, end };
    }

    /// Current get area as `(base, ptr, end)`.
    #[must_use]
    pub fn get_area(&self) -> (usize, usize, usize) {
        (self.get.base, self.get.ptr, self.get.end)
    }

    /// Current put area as `(base, ptr, end)`.
    #[must_use]
    pub fn put_area(&self) -> (usize, usize, usize) {
        (self.put.base, self.put.ptr, self.put.end)
    }

    /// Unconsumed bytes in the get area.
    #[must_use]
    pub fn remaining_get(&self) -> usize {
        self.get.end.saturating_sub(self.get.ptr)
    }

    /// Pending output not yet handed to the backend.
    #[must_use]
    pub fn pending_output(&self) -> &[u8] {
        &self.buf[self.put.base..self.put.ptr]
    }

    /// Whether a registry flush must visit this stream.
    #[must_use]
    pub fn has_pending_output(&self) -> bool {
        self.orientation != Orientation::Wide && self.put.ptr > self.put.base
    }

    /// Mark the pending output region as consumed by the backend,
    /// keeping its bytes readable in the buffer.
    pub fn mark_output_flushed(&mut self) {
        self.put.base = self.put.ptr;
    }

    fn lookahead(&self) -> Option<u8> {
        if self.get.ptr < self.get.end {
            Some(self.get_slice()[self.get.ptr])
        } else {
            None
        }
    }

    fn consume_one(&mut self) {
        if self.get.ptr < self.get.end {
            self.get.ptr += 1;
        }
    }

    /// Release buffers and invalidate every outstanding marker. The
    /// stream keeps rejecting marker handles afterwards.
    pub fn finish(&mut self) {
        self.buf = Vec::new();
        self.save = None;
        self.get = Area::default();
        self.stash = Span::default();
        self.put = Area::default();
        self.backup_base = 0;
        self.markers.clear();
    }
}

// ---------------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------------

/// A buffered stream: shared state plus the backend that refills and
/// drains it.
pub struct Stream {
    state: StreamState,
    backend: Box<dyn StreamBackend>,
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("state", &self.state).finish()
    }
}

impl Stream {
    /// Create a stream over `backend` with empty areas and no buffer.
    pub fn new<B: StreamBackend + 'static>(backend: B) -> Self {
        Stream {
            state: StreamState::new(),
            backend: Box::new(backend),
        }
    }

    /// Shared buffer/pointer state.
    #[must_use]
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Mutable shared state.
    pub fn state_mut(&mut self) -> &mut StreamState {
        &mut self.state
    }

    /// Stream identity.
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.state.id
    }

    // -- get side ------------------------------------------------------------

    /// Return the next input byte without consuming it (underflow
    /// contract).
    pub fn peek(&mut self) -> StreamResult<u8> {
        self.underflow_common(false)
    }

    /// Return and consume the next input byte (uflow contract).
    pub fn getc(&mut self) -> StreamResult<u8> {
        self.underflow_common(true)
    }

    fn underflow_common(&mut self, consume: bool) -> StreamResult<u8> {
        self.state.bind_byte()?;
        if self.state.in_put_mode() {
            self.switch_to_get_mode()?;
        }
        if let Some(b) = self.state.lookahead() {
            if consume {
                self.state.consume_one();
            }
            return Ok(b);
        }
        if self.state.flags.in_backup {
            self.state.switch_to_main_get_area();
            if let Some(b) = self.state.lookahead() {
                if consume {
                    self.state.consume_one();
                }
                return Ok(b);
            }
        }
        if self.state.have_markers() {
            let end = self.state.get.end;
            self.state.save_for_backup(end)?;
        } else if self.state.have_backup() {
            self.state.free_backup_area();
        }
        let b = self.backend.underflow(&mut self.state)?;
        if consume {
            self.state.consume_one();
        }
        Ok(b)
    }

    /// Bulk read into `out`; returns the number of bytes delivered.
    ///
    /// Stops early at end of data or on a backend failure, after
    /// delivering everything buffered so far.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        if out.is_empty() {
            return 0;
        }
        match self.backend.xsgetn(&mut self.state, out) {
            Some(n) => n,
            None => self.default_xsgetn(out),
        }
    }

    fn default_xsgetn(&mut self, out: &mut [u8]) -> usize {
        let mut filled = 0;
        loop {
            let avail = self.state.remaining_get();
            if avail > 0 {
                let count = avail.min(out.len() - filled);
                let start = self.state.get.ptr;
                out[filled..filled + count]
                    .copy_from_slice(&self.state.get_slice()[start..start + count]);
                self.state.get.ptr += count;
                filled += count;
            }
            if filled == out.len() || self.peek().is_err() {
                break;
            }
        }
        filled
    }

    /// Buffered bytes immediately readable without blocking, falling back
    /// to the backend's estimate when the get area is empty.
    pub fn available(&mut self) -> usize {
        let buffered = self.state.remaining_get();
        if buffered > 0 {
            buffered
        } else {
            self.backend.showmanyc(&self.state).unwrap_or(0)
        }
    }

    // -- put side ------------------------------------------------------------

    /// Accept one more output byte, or flush pending output when given
    /// `None` (the end-of-input sentinel). Binds byte orientation.
    pub fn overflow(&mut self, byte: Option<u8>) -> StreamResult<()> {
        self.state.bind_byte()?;
        self.backend.overflow(&mut self.state, byte)
    }

    /// Bulk write; returns the number of bytes accepted.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        match self.backend.xsputn(&mut self.state, data) {
            Some(n) => n,
            None => self.default_xsputn(data),
        }
    }

    fn default_xsputn(&mut self, data: &[u8]) -> usize {
        let mut written = 0;
        loop {
            let room = self.state.put.end.saturating_sub(self.state.put.ptr);
            if room > 0 {
                let count = room.min(data.len() - written);
                let dst = self.state.put.ptr;
                self.state.buf[dst..dst + count]
                    .copy_from_slice(&data[written..written + count]);
                self.state.put.ptr += count;
                written += count;
            }
            if written == data.len() {
                break;
            }
            // Put area exhausted: hand the next byte to the backend. A
            // failed overflow does not count its byte as accepted.
            if self.overflow(Some(data[written])).is_err() {
                break;
            }
            written += 1;
        }
        written
    }

    /// Flush pending output if any.
    pub fn flush(&mut self) -> StreamResult<()> {
        if self.state.has_pending_output() {
            self.overflow(None)
        } else {
            Ok(())
        }
    }

    // -- mode switching ------------------------------------------------------

    /// Leave put mode: flush pending output, then expose previously
    /// written buffer content as consumed input and collapse the put area
    /// to a zero-length window at the read position.
    pub fn switch_to_get_mode(&mut self) -> StreamResult<()> {
        if self.state.put.ptr > self.state.put.base {
            self.overflow(None)?;
        }
        if self.state.flags.in_backup {
            self.state.get.base = self.state.backup_base;
        } else {
            self.state.get.base = 0;
            if self.state.put.ptr > self.state.get.end {
                self.state.get.end = self.state.put.ptr;
            }
        }
        self.state.get.ptr = self.state.put.ptr;
        let at = self.state.get.ptr;
        self.state.put = Area {
            base: at,
            ptr: at,
            end: at,
        };
        self.state.flags.currently_putting = false;
        Ok(())
    }

    // -- pushback ------------------------------------------------------------

    /// Push `byte` back into the input. The fast path rewinds over a
    /// matching just-read byte; anything else goes through the backend's
    /// pushback-failure handler. Clears `eof_seen` on success.
    pub fn putback(&mut self, byte: u8) -> StreamResult<u8> {
        let result = if self.state.get.ptr > self.state.get.base
            && self.state.get_slice()[self.state.get.ptr - 1] == byte
        {
            self.state.get.ptr -= 1;
            Ok(byte)
        } else {
            self.backend.pbackfail(&mut self.state, Some(byte))
        };
        if result.is_ok() {
            self.state.flags.eof_seen = false;
        }
        result
    }

    /// Step back over the last consumed byte and return it. Clears
    /// `eof_seen` on success.
    pub fn unget(&mut self) -> StreamResult<u8> {
        let result = if self.state.get.ptr > self.state.get.base {
            self.state.get.ptr -= 1;
            Ok(self.state.get_slice()[self.state.get.ptr])
        } else {
            self.backend.pbackfail(&mut self.state, None)
        };
        if result.is_ok() {
            self.state.flags.eof_seen = false;
        }
        result
    }

    // -- buffer management ---------------------------------------------------

    /// Ensure a main buffer exists: ask the backend to allocate one, or
    /// fall back to the one-byte short buffer when the stream is
    /// unbuffered or allocation is refused.
    pub fn ensure_buffer(&mut self) -> StreamResult<()> {
        if self.state.buffer_len() > 0 {
            return Ok(());
        }
        if !self.state.flags.unbuffered && self.backend.doallocate(&mut self.state).is_ok() {
            return Ok(());
        }
        self.state.install_buffer(vec![0], false);
        Ok(())
    }

    /// Install a caller-supplied buffer, or switch to unbuffered
    /// operation when `buf` is `None`. Syncs pending output first.
    pub fn set_buffer(&mut self, buf: Option<Vec<u8>>) -> StreamResult<()> {
        self.backend.setbuf(&mut self.state, buf)
    }

    /// Flush without closing.
    pub fn sync(&mut self) -> StreamResult<()> {
        self.backend.sync(&mut self.state)
    }

    /// Reposition via the backend.
    pub fn seek(&mut self, offset: i64, whence: crate::backend::Whence) -> StreamResult<u64> {
        self.backend.seekoff(&mut self.state, offset, whence)
    }

    /// Release buffers and invalidate markers. The registry link, if
    /// any, is removed by [`crate::registry::SharedStream::finalize`].
    pub fn finish(&mut self) {
        self.state.finish();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
