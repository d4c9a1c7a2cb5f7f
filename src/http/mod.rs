//! HTTP front door
//!
//! A deliberately thin layer: accept a TCP connection, parse one
//! `GET /live` request, write the FLV response preamble, bind the socket to
//! a viewer session, and hand the session to the hub. Everything after the
//! preamble is the session pump draining its queue as a chunked body.

pub mod connection;
pub mod listener;
pub mod request;
pub mod response;

pub use listener::RelayServer;
