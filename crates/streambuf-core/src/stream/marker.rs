//! Position markers.
//!
//! A marker remembers a spot in a stream's input history and keeps
//! tracking it as the buffer is refilled: `save_for_backup` shifts every
//! outstanding marker by the length of each discarded region, so a
//! marker's offset stays correct relative to the current read base.
//!
//! Markers are generation-checked handles into a per-stream slab rather
//! than an intrusive linked chain; a handle survives `Copy` but is
//! rejected once removed or once its stream is finalized.
//!
//! Position encoding: non-negative offsets are relative to the main get
//! area's base; negative offsets are relative to the backup area's end.

use crate::error::{StreamError, StreamResult};

use super::{Stream, StreamId, StreamState};

/// Slab entry backing one marker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MarkerSlot {
    pub(crate) generation: u32,
    pub(crate) pos: isize,
    pub(crate) live: bool,
}

/// Handle to a saved read position on a specific stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    stream: StreamId,
    slot: usize,
    generation: u32,
}

impl StreamState {
    /// Current read position in marker encoding.
    fn read_pos(&self) -> isize {
        if self.flags.in_backup {
            self.get.ptr as isize - self.get.end as isize
        } else {
            self.get.ptr as isize - self.get.base as isize
        }
    }

    /// Any live markers outstanding?
    #[must_use]
    pub fn have_markers(&self) -> bool {
        self.markers.iter().any(|s| s.live)
    }

    pub(crate) fn insert_marker(&mut self) -> Marker {
        let pos = self.read_pos();
        let stream = self.id();
        for (slot, entry) in self.markers.iter_mut().enumerate() {
            if !entry.live {
                entry.generation = entry.generation.wrapping_add(1);
                entry.pos = pos;
                entry.live = true;
                return Marker {
                    stream,
                    slot,
                    generation: entry.generation,
                };
            }
        }
        self.markers.push(MarkerSlot {
            generation: 0,
            pos,
            live: true,
        });
        Marker {
            stream: self.id(),
            slot: self.markers.len() - 1,
            generation: 0,
        }
    }

    fn resolve(&self, marker: Marker) -> StreamResult<&MarkerSlot> {
        if marker.stream != self.id() {
            return Err(StreamError::ForeignMarker);
        }
        let slot = self
            .markers
            .get(marker.slot)
            .ok_or(StreamError::StaleMarker)?;
        if !slot.live || slot.generation != marker.generation {
            return Err(StreamError::StaleMarker);
        }
        Ok(slot)
    }

    /// Drop a marker. The handle is rejected from here on.
    pub fn remove_marker(&mut self, marker: Marker) -> StreamResult<()> {
        self.resolve(marker)?;
        self.markers[marker.slot].live = false;
        Ok(())
    }

    /// Bytes consumed since the marker was created.
    pub fn marker_delta(&self, marker: Marker) -> StreamResult<isize> {
        let pos = self.resolve(marker)?.pos;
        Ok(self.read_pos() - pos)
    }

    /// Signed distance between two markers of this stream.
    pub fn marker_difference(&self, a: Marker, b: Marker) -> StreamResult<isize> {
        let pa = self.resolve(a)?.pos;
        let pb = self.resolve(b)?.pos;
        Ok(pa - pb)
    }

    /// Reposition reading at the marker, switching get areas as needed.
    pub fn seek_to_marker(&mut self, marker: Marker) -> StreamResult<()> {
        let pos = self.resolve(marker)?.pos;
        if pos >= 0 {
            if self.flags.in_backup {
                self.switch_to_main_get_area();
            }
            let target = self.get.base + pos as usize;
            if target > self.get.end {
                return Err(StreamError::StaleMarker);
            }
            self.get.ptr = target;
        } else {
            if !self.flags.in_backup {
                self.switch_to_backup_area();
            }
            let target = self.get.end as isize + pos;
            if target < self.get.base as isize {
                return Err(StreamError::StaleMarker);
            }
            self.get.ptr = target as usize;
        }
        Ok(())
    }

    /// Discard every marker and release the backup area.
    pub fn unsave_markers(&mut self) {
        self.markers.clear();
        if self.have_backup() {
            self.free_backup_area();
        }
    }
}

impl Stream {
    /// Save the current read position. Leaves put mode first so the
    /// position refers to consumed input.
    pub fn create_marker(&mut self) -> StreamResult<Marker> {
        if self.state().in_put_mode() {
            self.switch_to_get_mode()?;
        }
        Ok(self.state_mut().insert_marker())
    }

    /// Bytes consumed since `marker` was created.
    pub fn marker_delta(&self, marker: Marker) -> StreamResult<isize> {
        self.state().marker_delta(marker)
    }

    /// Drop `marker`.
    pub fn remove_marker(&mut self, marker: Marker) -> StreamResult<()> {
        self.state_mut().remove_marker(marker)
    }

    /// Signed distance between two markers of this stream.
    pub fn marker_difference(&self, a: Marker, b: Marker) -> StreamResult<isize> {
        self.state().marker_difference(a, b)
    }

    /// Rewind (or advance) reading to the marker's position.
    pub fn seek_to_marker(&mut self, marker: Marker) -> StreamResult<()> {
        self.state_mut().seek_to_marker(marker)
    }

    /// Discard all markers and the backup area.
    pub fn unsave_markers(&mut self) {
        self.state_mut().unsave_markers();
    }
}
