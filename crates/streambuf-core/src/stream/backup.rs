//! Backup-area management.
//!
//! The backup area holds input history that is no longer in the main
//! buffer but is still needed: bytes pushed back past the main get area,
//! and bytes an outstanding marker may want to seek back to. The get
//! area switches between the main and backup storage by swapping its
//! `(base, end)` pair with the parked [`super::Span`]; `save_for_backup`
//! grows the backup area when the main get area is about to be discarded
//! while markers still reference it.

use std::mem;

use crate::error::{StreamError, StreamResult};

use super::{Area, Span, StreamState, alloc_buffer};

/// Initial backup capacity allocated on the first general pushback.
pub(crate) const DEFAULT_BACKUP_SIZE: usize = 128;

/// Extra room reserved when the backup area is reallocated.
const GROWTH_SLACK: usize = 100;

impl StreamState {
    /// Make the main buffer the get area again, resuming at its start.
    pub fn switch_to_main_get_area(&mut self) {
        self.flags.in_backup = false;
        mem::swap(&mut self.get.end, &mut self.stash.end);
        mem::swap(&mut self.get.base, &mut self.stash.base);
        self.get.ptr = self.get.base;
    }

    /// Make the backup buffer the get area, positioned at its end so
    /// reading proceeds from the most recently pushed-back byte.
    pub fn switch_to_backup_area(&mut self) {
        self.flags.in_backup = true;
        mem::swap(&mut self.get.end, &mut self.stash.end);
        mem::swap(&mut self.get.base, &mut self.stash.base);
        self.get.ptr = self.get.end;
    }

    /// Drop the backup storage. Switches back to the main get area first
    /// if the backup area is still active.
    pub fn free_backup_area(&mut self) {
        if self.flags.in_backup {
            self.switch_to_main_get_area();
        }
        self.save = None;
        self.stash = Span::default();
        self.backup_base = 0;
    }

    /// Minimum marker position relative to `get.base`, bounded above by
    /// the length of `[get.base, end)`. Negative values denote positions
    /// already inside existing backup content. Assumes the main get area
    /// is active.
    pub(crate) fn least_marker(&self, end: usize) -> isize {
        let mut least = (end - self.get.base) as isize;
        for slot in self.markers.iter().filter(|s| s.live) {
            if slot.pos < least {
                least = slot.pos;
            }
        }
        least
    }

    /// Preserve `[get.base, end)` — about to be discarded from the main
    /// buffer — into the backup area, together with any older backup
    /// content a marker still references, and shift every marker by the
    /// discarded length.
    ///
    /// On allocation failure the stream state is left untouched.
    pub(crate) fn save_for_backup(&mut self, end: usize) -> StreamResult<()> {
        debug_assert!(!self.flags.in_backup);
        let least = self.least_marker(end);
        let span = end - self.get.base;
        let needed = (span as isize - least) as usize;
        let current = self.backup_capacity();

        if needed > current {
            let mut fresh = alloc_buffer(GROWTH_SLACK + needed)?;
            let avail = GROWTH_SLACK;
            if least < 0 {
                let keep = least.unsigned_abs();
                let old = self.save.as_deref().unwrap_or(&[]);
                fresh[avail..avail + keep].copy_from_slice(&old[old.len() - keep..]);
                fresh[avail + keep..avail + keep + span]
                    .copy_from_slice(&self.buf[self.get.base..end]);
            } else {
                let start = self.get.base + least as usize;
                fresh[avail..avail + needed].copy_from_slice(&self.buf[start..end]);
            }
            self.stash = Span {
                base: 0,
                end: fresh.len(),
            };
            self.save = Some(fresh);
            self.backup_base = avail;
        } else {
            let avail = current - needed;
            if least < 0 {
                let keep = least.unsigned_abs();
                let main = &self.buf[self.get.base..end];
                if let Some(save) = self.save.as_mut() {
                    let len = save.len();
                    // Old backup tail first, then the discarded main
                    // region; sources and destinations may overlap.
                    save.copy_within(len - keep..len, avail);
                    save[avail + keep..avail + keep + span].copy_from_slice(main);
                }
            } else if needed > 0 {
                let start = self.get.base + least as usize;
                let main = &self.buf[start..end];
                if let Some(save) = self.save.as_mut() {
                    save[avail..avail + needed].copy_from_slice(main);
                }
            }
            self.backup_base = avail;
        }

        let delta = span as isize;
        for slot in self.markers.iter_mut().filter(|s| s.live) {
            slot.pos -= delta;
        }
        Ok(())
    }

    /// Default pushback-failure policy: grow into the backup area.
    ///
    /// `byte` is the character to push back; `None` (nothing left to
    /// unget and the history is exhausted) fails with end-of-data.
    pub fn default_pbackfail(&mut self, byte: Option<u8>) -> StreamResult<u8> {
        if let Some(b) = byte {
            if self.get.ptr > self.get.base
                && !self.flags.in_backup
                && self.get_slice()[self.get.ptr - 1] == b
            {
                self.get.ptr -= 1;
                return Ok(b);
            }
        }
        let Some(b) = byte else {
            return Err(StreamError::EndOfData);
        };

        if !self.flags.in_backup {
            if self.get.ptr > self.get.base && self.have_backup() {
                // Keep the invariant that the main get area logically
                // follows the backup area.
                let consumed_end = self.get.ptr;
                self.save_for_backup(consumed_end)?;
            } else if !self.have_backup() {
                let fresh = alloc_buffer(DEFAULT_BACKUP_SIZE)?;
                self.stash = Span {
                    base: 0,
                    end: fresh.len(),
                };
                self.backup_base = fresh.len();
                self.save = Some(fresh);
            }
            // Stash the resume point of the main area before swapping.
            self.get.base = self.get.ptr;
            self.switch_to_backup_area();
        } else if self.get.ptr <= self.get.base {
            // Writing past the start of the backup buffer: double it,
            // keeping existing content at the tail so pushback keeps
            // growing downwards.
            let old_size = self.get.end - self.get.base;
            let new_size = old_size * 2;
            let mut fresh = alloc_buffer(new_size)?;
            if let Some(old) = self.save.as_ref() {
                fresh[new_size - old_size..]
                    .copy_from_slice(&old[self.get.base..self.get.end]);
            }
            self.save = Some(fresh);
            self.get = Area {
                base: 0,
                ptr: new_size - old_size,
                end: new_size,
            };
            self.backup_base = self.get.ptr;
        }

        self.get.ptr -= 1;
        if let Some(save) = self.save.as_mut() {
            save[self.get.ptr] = b;
        }
        Ok(b)
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::NullBackend;
    use crate::error::StreamError;
    use crate::mem::MemReader;
    use crate::stream::backup::DEFAULT_BACKUP_SIZE;
    use crate::stream::{GetPutState, Stream};

    #[test]
    fn pushback_into_fresh_stream_allocates_default_backup() {
        let mut s = Stream::new(NullBackend);
        assert_eq!(s.putback(b'z'), Ok(b'z'));
        assert_eq!(s.state().backup_capacity(), DEFAULT_BACKUP_SIZE);
        assert_eq!(s.state().get_put_state(), GetPutState::GettingBackup);
        assert_eq!(s.getc(), Ok(b'z'));
    }

    #[test]
    fn pushback_capacity_boundary_triggers_one_doubling() {
        let mut s = Stream::new(NullBackend);
        for i in 0..DEFAULT_BACKUP_SIZE {
            assert_eq!(s.putback(i as u8), Ok(i as u8));
        }
        assert_eq!(s.state().backup_capacity(), DEFAULT_BACKUP_SIZE);
        assert_eq!(s.putback(0xEE), Ok(0xEE));
        assert_eq!(s.state().backup_capacity(), DEFAULT_BACKUP_SIZE * 2);
    }

    #[test]
    fn pushed_back_bytes_come_back_in_reverse_order() {
        let mut s = Stream::new(NullBackend);
        for b in [b'a', b'b', b'c'] {
            s.putback(b).unwrap();
        }
        assert_eq!(s.getc(), Ok(b'c'));
        assert_eq!(s.getc(), Ok(b'b'));
        assert_eq!(s.getc(), Ok(b'a'));
        assert_eq!(s.getc(), Err(StreamError::EndOfData));
    }

    #[test]
    fn mismatched_putback_replaces_history() {
        let mut s = Stream::new(MemReader::new(b"ABCD".to_vec()));
        let mut out = [0u8; 3];
        assert_eq!(s.read(&mut out), 3);
        // Push back a byte that differs from the one just read.
        assert_eq!(s.putback(b'X'), Ok(b'X'));
        assert_eq!(s.getc(), Ok(b'X'));
        // The main area resumes where it left off.
        assert_eq!(s.getc(), Ok(b'D'));
    }

    #[test]
    fn backup_is_freed_once_unreferenced() {
        let mut s = Stream::new(MemReader::with_chunk(b"abcdef".to_vec(), 3));
        assert_eq!(s.getc(), Ok(b'a'));
        s.putback(b'q').unwrap();
        assert_eq!(s.getc(), Ok(b'q'));
        assert!(s.state().have_backup());
        // Drain the main area; the next refill drops the stale backup.
        assert_eq!(s.getc(), Ok(b'b'));
        assert_eq!(s.getc(), Ok(b'c'));
        assert_eq!(s.getc(), Ok(b'd'));
        assert!(!s.state().have_backup());
    }

    #[test]
    fn unget_at_start_of_input_fails() {
        let mut s = Stream::new(NullBackend);
        assert_eq!(s.unget(), Err(StreamError::EndOfData));
    }
}
