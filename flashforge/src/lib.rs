//! Wire vocabulary for FlashForge Adventurer-series printers: the `~M…` TCP
//! command set, UDP discovery replies, the HTTP JSON models, and the
//! material-station mapping rules.

#![deny(missing_docs)]

pub mod command;
pub mod discovery;
pub mod http;
pub mod material;
pub mod mode;
pub mod status;
