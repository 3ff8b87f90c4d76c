#![deny(missing_docs)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! A network emulator for FlashForge printers.
//!
//! One [`state::PrinterState`] is shared by three listeners: UDP discovery,
//! the `~M…` command port and the JSON HTTP API. The simulation only moves
//! when [`supervisor::Emulator::tick`] is called, so tests control time.

pub mod config;
pub mod discovery;
pub mod fault;
pub mod logging;
pub mod net;
pub mod server;
pub mod state;
pub mod supervisor;
pub mod tcp;

pub use config::Config;
pub use supervisor::Emulator;
