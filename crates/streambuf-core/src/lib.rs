//! Buffered stream I/O core.
//!
//! A [`Stream`] owns a byte buffer split into a get area and a put area
//! and drives a pluggable [`StreamBackend`] for the actual transport.
//! The core contributes the buffering discipline: lazy refills, deferred
//! writebacks, switching between reading and writing on one buffer,
//! pushback into a growable backup area, and [`Marker`]s that pin a past
//! read position and survive buffer reallocation.
//!
//! Linked streams live in a [`StreamRegistry`], which supports
//! flush-everything walks that tolerate concurrent opens and closes, and
//! an exit-time [`StreamRegistry::cleanup`] that drains what it can
//! without blocking on wedged streams.
//!
//! # Design notes
//!
//! - No raw pointers anywhere: areas are index triples into owned
//!   storage, markers are generation-checked slab handles, and the
//!   registry holds `Arc`s instead of an intrusive list.
//! - Buffer allocation is fallible throughout (`try_reserve_exact`), so
//!   an allocation failure surfaces as [`StreamError::Allocation`]
//!   instead of aborting.
//! - Locks are `parking_lot` mutexes; lock order is registry before
//!   stream.

#![deny(unsafe_code)]

pub mod backend;
pub mod error;
pub mod mem;
pub mod registry;
pub mod stream;

pub use backend::{NullBackend, StreamBackend, Whence};
pub use error::{StreamError, StreamResult};
pub use mem::{BackendStats, MemReader, MemSink};
pub use registry::{SharedStream, StreamRegistry, global_registry};
pub use stream::{
    BUFSIZ, GetPutState, Marker, Orientation, Stream, StreamFlags, StreamId, StreamState,
    adjust_column, alloc_buffer,
};
