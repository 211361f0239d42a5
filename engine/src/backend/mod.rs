//! §6.1: reference backend implementations. Non-goals exclude the wire
//! protocols of the two real backend stores, but the engine needs a
//! concrete, locally testable pair of clients to drive C1-C7 against. A
//! production deployment replaces these with a real networked client
//! behind the same two traits; nothing above this module depends on the
//! implementation chosen here.

pub mod memory_vector_store;
pub mod sqlite_versioning;
