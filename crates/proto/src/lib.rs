//! Remote transport engine for the Scribe editor.
//!
//! Implements the SSH2 client protocol suite: encrypted transport,
//! host verification, authentication, channel multiplexing, interactive
//! sessions, and the file transfer subsystem. The editor front end
//! plugs in through the prompt traits; this crate never reads
//! terminals or blocks on user input itself.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod ssh;

pub use scribe_platform::{ScribeError, ScribeResult};
