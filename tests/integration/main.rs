//! Integration tests: the detection engine wired to deterministic fakes.

mod detection;
mod polling;
