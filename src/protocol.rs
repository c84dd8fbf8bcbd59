//! Line oriented remote control protocol.
//!
//! ```text
//! COMMAND [--key=value ...]
//! ```
//!
//! Requests end with a newline, replies with CRLF. A `Hello` line greets
//! every new client.

pub mod codec;
pub mod commands;
pub mod parser;
pub mod server;

pub use commands::CommandHandler;
pub use parser::Request;
pub use server::RemoteProtocolServer;
