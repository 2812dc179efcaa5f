//! A user-space TCP endpoint implementation over an IPv6 network-layer interface.
//!
//! A wire codec ([`wire`]), a fixed receive-buffer pool ([`buffer_pool`]), a timer service
//! ([`timer`]), a retransmission/RTO estimator ([`retransmit`]), the connection-control-block
//! state machine ([`ccb`], [`fsm`]), a single dispatch thread ([`eventloop`]) and the blocking
//! public surface ([`api`]), all orchestrated by [`stack::Stack`]. See `DESIGN.md` for how each
//! piece is grounded.

pub mod api;
pub mod buffer_pool;
pub mod ccb;
pub mod config;
pub mod endpoint;
pub mod error;
mod eventloop;
pub mod fsm;
pub mod mailbox;
pub mod netif;
pub mod retransmit;
pub mod stack;
pub mod timer;
pub mod wire;

pub use api::{accept, connect, listen, TcpStream};
pub use stack::Listener;
pub use config::Config;
pub use endpoint::{ep_from_str, Endpoint, Quad};
pub use error::{tcp_error, tcp_error_kind, TcpErrorKind};
pub use netif::NetIf;
pub use stack::Stack;
