//! bnckeeper - automated ZNC account management over IRC.
//!
//! An IRC client bot that fields BNC account requests in channel, walks
//! admins through approval, and keeps a local JSON record of accounts
//! and their bindhosts reconciled with the bouncer.

pub mod config;
pub mod conn;
pub mod error;
pub mod event;
pub mod handlers;
pub mod pending;
pub mod proto;
pub mod store;
pub mod sync;
pub mod util;
