//! # netconf
//!
//! Minimal NETCONF 1.0 client for Junos-style devices.
//!
//! Sessions run over the system `ssh` client (`ssh -s netconf`), so host
//! keys, agents and `~/.ssh/config` behave exactly as they do interactively.
//! Only the operations needed for candidate-based provisioning are provided:
//! reading configuration in `set` format, locking, loading `set` text,
//! comparing against the active configuration, committing and discarding.
//!
//! ## Example
//!
//! ```no_run
//! use netconf::{Session, SshConfig};
//!
//! let config = SshConfig::new("172.20.20.11", 830, "josemi");
//! let mut session = Session::connect(&config)?;
//!
//! session.lock()?;
//! session.load_set("set system syslog archive size 10m")?;
//! if let Some(diff) = session.compare()? {
//!     println!("{diff}");
//!     session.commit("Syslog archive size")?;
//! }
//! session.unlock()?;
//! session.close()?;
//! # Ok::<(), netconf::Error>(())
//! ```

pub mod client;
pub mod error;
pub mod framing;
pub mod reply;
pub mod rpc;

pub use client::{Session, SshConfig};
pub use error::{Error, ErrorCategory, Result, RpcError};
pub use reply::Reply;
