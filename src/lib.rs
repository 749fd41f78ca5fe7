//! # netmux - Pooled SSH Shells for Network Devices
//!
//! `netmux` runs command batches on switches and routers over interactive SSH
//! shells and keeps those shells open between calls. A shell is an unframed
//! byte stream, so the end of a device's response is inferred from timing (a
//! quiet gap after the last byte) or from prompt patterns, and the output of a
//! batch is cut out of the transcript around the echo of its first command.
//!
//! ## Features
//!
//! - **Session Pooling**: One shell per credentials and address, reused across calls
//! - **Per-device Serialization**: Concurrent calls for one device never interleave
//! - **Self-healing**: Cached shells are probed before reuse and replaced when dead
//! - **Idle Eviction**: A background sweep closes shells left unused
//! - **Vendor Awareness**: Huawei, H3C and Cisco are detected and paging is disabled
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use netmux::config::SshConfig;
//! use netmux::device::DeviceFamily;
//! use netmux::session::{SessionPool, Target};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = Arc::new(SessionPool::new(SshConfig::default())?);
//!     let _sweep = pool.spawn_idle_sweep();
//!
//!     let target = Target::from_host_port("admin", "password", "192.168.1.1:22")?
//!         .with_family(DeviceFamily::Huawei);
//!     let output = pool
//!         .run(&target, &["display version".to_string()])
//!         .await?;
//!
//!     println!("{output}");
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::SessionPool`] - Session cache, per-key locking and idle sweep
//! - [`session::ShellSession`] - One interactive shell and its read strategies
//! - [`framer`] - Extracts a command's output from a raw transcript
//! - [`device::DeviceFamily`] - Vendor-specific paging and detection
//! - [`config::SshConfig`] - Algorithms, PTY settings, prompt patterns and timings
//! - [`error::ConnectError`] - Error types for connecting and running commands

pub mod config;
pub mod device;
pub mod error;
pub mod framer;
pub mod session;
