//! Embeddable HTTP/1.1 server over raw TCP sockets.
//!
//! The accept loop in [`Server`] spawns one task per connection. Each task
//! reads a request head into a pooled buffer, parses it with
//! `toolbridge-net`, buffers the body, calls the [`Handler`] and writes the
//! fully buffered response before reading the next request.

mod config;
mod connection;
mod error;
mod handler;
mod pool;
mod server;

pub use config::{
    DefaultHeader, KeepAliveConfig, LimitsConfig, ListenConfig, PoolConfig, ServerConfig,
};
pub use connection::Stage;
pub use error::{ErrorClass, ServerError};
pub use handler::{
    Handler, HandlerError, HandlerFn, Request, Response, ResponseContent, canonical_reason,
    handler_fn,
};
pub use pool::{BufferPool, BytePool, MemoryPool, Pooled, Pools, Reusable};
pub use server::{Server, StopHandle};
pub use toolbridge_net::{HeaderCollection, HttpVersion, RequestLine};
