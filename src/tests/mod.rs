//! Kernel scenario tests on the host port.
//!
//! Every test builds its own leaked kernel and becomes its main thread, so
//! tests stay independent under the parallel test runner.

mod helpers;
mod property;
mod scheduling;
