//! Scripted device-control backend for testing.
//!
//! [`MockControl`] implements [`vfio_bench_core::DeviceControl`] without touching the
//! kernel. Region memory is a zeroed host buffer, any step can be made to fail with a
//! chosen errno, and every request is recorded in a journal of [`Event`]s.
//!
//! # Use Cases
//!
//! - Testing the acquisition sequence and its teardown order
//! - Running benchmarks and inspections without VFIO hardware

#![warn(missing_docs)]

mod mock;

pub use mock::{Event, HandleKind, MockControl};
