//! File transfer subsystem (SFTP version 3) carried over a session
//! channel.
//!
//! - [`types`]: protocol constants, open flags, file attributes
//! - [`message`]: packet framing and reassembly
//! - [`client`]: the request/reply client with pipelined bulk transfers

pub mod client;
pub mod message;
pub mod types;

pub use client::{SftpClient, SftpHandle, TRANSFER_CHUNK};
pub use types::{DirEntry, FileAttributes, OpenFlags};
