//! Local IPC: length-prefixed s-expression messages over a Unix socket.

pub mod dispatch;
pub mod plist;
pub mod server;

pub use server::IpcServer;
