//! Test support utilities for end-to-end engine tests.

pub mod harness;
