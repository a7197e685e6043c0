//! # Quantum-Chain Chain Sync Test Suite
//!
//! Multi-node scenarios for the chain sync subsystem, wired over the
//! in-process transport.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/           # Criterion benchmarks (consensus, envelope, archive)
//! └── src/integration/   # Node-to-node scenarios
//!     ├── block_sync.rs
//!     ├── checkpoint_bootstrap.rs
//!     ├── failure_ladder.rs
//!     └── resumable_transfer.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p qc-tests
//!
//! # One scenario group
//! cargo test -p qc-tests integration::checkpoint_bootstrap::
//!
//! # Benchmarks
//! cargo bench -p qc-tests
//! ```

#![allow(dead_code)]

pub mod integration;
