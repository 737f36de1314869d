//! Lattice integration test infrastructure.
//!
//! End-to-end tests wiring the transport and primitive crates together over
//! real loopback sockets, plus property-based coverage of the framing codec.

pub mod harness;

mod events_tests;
mod proptest_framing;
