//! The storage host negotiation engine and its process-level glue: CLI
//! argument parsing, `host.json` settings persistence, and the TCP RPC
//! surface.

pub mod negotiation;
pub mod settings;
