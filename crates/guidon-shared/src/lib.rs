//! # guidon-shared
//!
//! Types shared by every Guidon component: the platform-agnostic
//! [`Interaction`](interaction::Interaction), the bus [`Envelope`](envelope::Envelope),
//! command replies and their Discord/web renderings, request signature
//! verification and the command-to-topic routing table.
//!
//! Nothing in this crate performs I/O.

pub mod color;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod interaction;
pub mod reply;
pub mod router;
pub mod signature;
pub mod types;
