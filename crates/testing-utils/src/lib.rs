//! # Dispatch Testing Utils
//!
//! Shared testing utilities for the dispatch workspace: in-memory doubles for
//! every port trait and builders for domain entities.
//!
//! ## Usage
//!
//! ```toml
//! [dev-dependencies]
//! dispatch-testing-utils = { path = "../testing-utils" }
//! ```
//!
//! ```rust
//! use dispatch_testing_utils::mocks::*;
//! use dispatch_testing_utils::builders::CandidateBuilder;
//! ```

pub mod builders;
pub mod mocks;

pub use builders::{CandidateBuilder, DispatchBuilder};
pub use mocks::{
    MockDispatchRepository, MockProviderDirectory, MockRequestRepository, RecordingEventBus,
    RecordingHandler, RecordingNotifier,
};
