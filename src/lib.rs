//! Code Relay — watch a Discord channel for invite codes and type them in.

pub mod auth;
pub mod channels;
pub mod codes;
pub mod config;
pub mod error;
pub mod filters;
pub mod ledger;
pub mod monitor;
pub mod prompt;
pub mod selftest;
pub mod sink;

pub use error::{Error, Result};
