//! Session management: terminals, process supervision, the registry and the
//! relay between a connection and a terminal.

pub mod bridge;
pub mod launcher;
pub mod process;
pub mod pty;
pub mod registry;
pub mod service;

#[cfg(test)]
pub(crate) mod testutil;

pub use launcher::Launcher;
pub use registry::Registry;
pub use service::SessionService;
