//! Test support utilities for the Xtrieve workspace.
//!
//! This crate provides testing infrastructure including:
//! - An isolated [`Engine`](engine::Engine) test context over a temporary
//!   data directory
//! - A batch request runner for scripting a sequence of opcodes
//! - Record and `CreateSpec` fixtures
//! - An in-process [`TestServer`](server::TestServer) for wire-level
//!   integration tests
//! - Property-based generators for records and composite keys
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```
//! use testsupport::prelude::*;
//!
//! let ctx = TestContext::new();
//! let create = ctx
//!     .create_file("orders.xtr", unique_unsigned_key_spec(16, 4096))
//!     .unwrap();
//! assert_success(&create);
//! ```

pub mod assertions;
pub mod context;
pub mod fixtures;
pub mod macros;
pub mod proptest_generators;
pub mod runner;
pub mod server;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::context::*;
    pub use crate::fixtures::*;
    pub use crate::runner::*;
    pub use crate::server::*;
}
