//! # sigilo
//!
//! Identity and session backend with tamper-evident user records.
//!
//! Every persisted user record carries a SHA-256 signature over its own
//! canonical (recursively key-sorted) JSON form; a record whose stored
//! signature disagrees with the recomputed one is tampered and never trusted
//! for any decision. On top of that protocol sit four independently-keyed
//! token kinds (online, offline, challenge, system), a per-account daily
//! rate limiter with lazy midnight rollover, an email one-time-code
//! challenge engine, and a device-fingerprint binding chain with its own
//! nested signatures.
//!
//! External collaborators (document store, mail delivery, wall clock) are
//! consumed through narrow traits so the workflows stay deterministic under
//! test.

pub mod canonical;
pub mod catalog;
pub mod challenge;
pub mod cli;
pub mod clock;
pub mod device;
pub mod error;
pub mod mail;
pub mod model;
pub mod password;
pub mod ratelimit;
pub mod session;
pub mod sigilo;
pub mod store;
pub mod tokens;
