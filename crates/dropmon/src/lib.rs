//! Async client for the Linux kernel drop monitor (`NET_DM`).
//!
//! The kernel's drop monitor reports packet drops (software drops in the
//! network stack and hardware drops from offload devices) over a generic
//! netlink family with one multicast alert group. This crate negotiates
//! with that family and turns its binary attribute records into typed,
//! queryable drop events:
//!
//! - [`Session`] resolves the family, switches it into per-packet alert
//!   mode, starts and stops monitoring (with rollback on partial failure),
//!   and drives a cancellable read loop over the alert group.
//! - [`DropEvent`] is the decoded view of one alert: kernel symbol, program
//!   counter, protocol, truncated payload, originating interface, origin.
//! - [`codec`] and [`schema`] hold the attribute codec and the family's
//!   closed wire vocabulary.
//!
//! # Example
//!
//! ```rust,no_run
//! use tokio::time::{Duration, Instant};
//!
//! #[tokio::main]
//! async fn main() -> dropmon::Result<()> {
//!     let mut session = dropmon::Session::new().await?;
//!
//!     // Monitor software drops for five seconds.
//!     session.start(true, false).await?;
//!     let deadline = Instant::now() + Duration::from_secs(5);
//!     session
//!         .read_until(Some(deadline), |event| {
//!             println!("{} dropped at {} (pc {:#x})",
//!                 event.length(), event.symbol(), event.pc());
//!             true
//!         })
//!         .await?;
//!     session.stop(true, false).await?;
//!     Ok(())
//! }
//! ```
//!
//! Packet-mode alerting carries payloads and needs CAP_NET_ADMIN.

pub mod attr;
pub mod builder;
pub mod codec;
mod error;
pub mod event;
pub mod genl;
pub mod link;
pub mod message;
pub mod schema;
mod session;
mod socket;

pub use codec::{AttrValue, AttributeSet};
pub use error::{Error, Result};
pub use event::{ConfigSnapshot, DropEvent, StatsSnapshot};
pub use schema::{AlertMode, Origin};
pub use session::Session;
pub use socket::{NetlinkSocket, Protocol};
