//! Integration test entry point
//!
//! Each test drives a real `ClientHandler` over an in-memory client stream
//! against two scripted in-process clusters listening on ephemeral ports.

mod events;
mod handshake;
mod support;
