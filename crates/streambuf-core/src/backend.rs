//! Backend capability set.
//!
//! A [`StreamBackend`] is the concrete data source/sink behind a
//! [`crate::stream::Stream`]: a file, a pipe, a memory region. The core
//! engine calls these operations when the buffered state cannot satisfy
//! a request; every operation receives the shared
//! [`StreamState`] and manipulates its areas through the checked
//! setters.
//!
//! Every method has a default: a backend only implements what it
//! supports. The defaults mirror classic stdio fallback behavior —
//! underflow reports end of data, seeking is unsupported, `doallocate`
//! installs a [`BUFSIZ`]-sized internal buffer, `setbuf` syncs and
//! installs the requested buffer, and `pbackfail` applies the
//! backup-area pushback policy.

use crate::error::{StreamError, StreamResult};
use crate::stream::{BUFSIZ, StreamState, alloc_buffer};

/// Origin of a seek offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the data.
    Set,
    /// From the current position.
    Cur,
    /// From the end of the data.
    End,
}

/// Operations a concrete stream backend supplies to the core.
pub trait StreamBackend: Send {
    /// Refill the get area and return the next byte without consuming
    /// it.
    fn underflow(&mut self, _state: &mut StreamState) -> StreamResult<u8> {
        Err(StreamError::EndOfData)
    }

    /// Accept one output byte, or flush pending output when `byte` is
    /// `None`.
    fn overflow(&mut self, _state: &mut StreamState, _byte: Option<u8>) -> StreamResult<()> {
        Err(StreamError::Unsupported)
    }

    /// Handle a pushback the fast path could not satisfy. `None` means
    /// the caller wants the previous byte back but none is known.
    fn pbackfail(&mut self, state: &mut StreamState, byte: Option<u8>) -> StreamResult<u8> {
        state.default_pbackfail(byte)
    }

    /// Bulk-read override. Return `None` to use the core's default
    /// engine.
    fn xsgetn(&mut self, _state: &mut StreamState, _out: &mut [u8]) -> Option<usize> {
        None
    }

    /// Bulk-write override. Return `None` to use the core's default
    /// engine.
    fn xsputn(&mut self, _state: &mut StreamState, _data: &[u8]) -> Option<usize> {
        None
    }

    /// Reposition relative to `whence`; returns the new absolute offset.
    fn seekoff(
        &mut self,
        _state: &mut StreamState,
        _offset: i64,
        _whence: Whence,
    ) -> StreamResult<u64> {
        Err(StreamError::Unsupported)
    }

    /// Reposition to an absolute offset.
    fn seekpos(&mut self, state: &mut StreamState, pos: i64) -> StreamResult<u64> {
        self.seekoff(state, pos, Whence::Set)
    }

    /// Install a caller-provided buffer, or switch to unbuffered
    /// operation when `buffer` is `None`.
    fn setbuf(&mut self, state: &mut StreamState, buffer: Option<Vec<u8>>) -> StreamResult<()> {
        self.sync(state)?;
        state.apply_setbuf(buffer);
        Ok(())
    }

    /// Flush without closing.
    fn sync(&mut self, _state: &mut StreamState) -> StreamResult<()> {
        Ok(())
    }

    /// Allocate an internal buffer of default size.
    fn doallocate(&mut self, state: &mut StreamState) -> StreamResult<()> {
        state.install_buffer(alloc_buffer(BUFSIZ)?, true);
        Ok(())
    }

    /// Backend metadata: total size of the underlying data, if known.
    fn stat(&mut self, _state: &StreamState) -> StreamResult<u64> {
        Err(StreamError::Unsupported)
    }

    /// Bytes readable without blocking beyond what is buffered, if the
    /// backend can tell.
    fn showmanyc(&mut self, _state: &StreamState) -> Option<usize> {
        None
    }
}

/// Backend with nothing behind it: every default applies. Useful for
/// streams that only ever exercise the in-memory machinery (pushback,
/// markers) and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl StreamBackend for NullBackend {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Stream;

    #[test]
    fn null_backend_has_no_input() {
        let mut s = Stream::new(NullBackend);
        assert_eq!(s.getc(), Err(StreamError::EndOfData));
    }

    #[test]
    fn default_seek_is_unsupported() {
        let mut s = Stream::new(NullBackend);
        assert_eq!(s.seek(0, Whence::Set), Err(StreamError::Unsupported));
    }

    #[test]
    fn default_overflow_rejects_output() {
        let mut s = Stream::new(NullBackend);
        assert_eq!(s.write(b"abc"), 0);
    }

    #[test]
    fn default_doallocate_installs_bufsiz() {
        let mut state_holder = Stream::new(NullBackend);
        state_holder.ensure_buffer().unwrap();
        assert_eq!(state_holder.state().buffer_len(), BUFSIZ);
    }
}
