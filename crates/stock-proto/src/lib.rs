//! Wire types, configuration and platform paths shared by the stock
//! analysis poller and its command-line front end.

pub mod config;
pub mod platform;
pub mod protocol;
