//! # Scribe Platform
//!
//! Shared platform types for the Scribe remote-transport engine.
//!
//! This crate provides the unified error type (`ScribeError`, `ScribeResult`)
//! used by every other crate in the workspace.
//!
//! # Examples
//!
//! ```
//! use scribe_platform::{ScribeError, ScribeResult};
//!
//! fn example_function() -> ScribeResult<String> {
//!     Ok("Hello, Scribe!".to_string())
//! }
//!
//! # fn main() -> ScribeResult<()> {
//! let result = example_function()?;
//! assert_eq!(result, "Hello, Scribe!");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{ScribeError, ScribeResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
