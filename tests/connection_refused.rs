//! A SYN answered with RST before the handshake completes is a refusal, not a mid-session reset.

mod common;

use std::net::Ipv6Addr;
use std::sync::Arc;

use utcp::error::{tcp_error_kind, TcpErrorKind};
use utcp::{Config, Endpoint, Stack};

use common::RefusingNetIf;

#[test]
fn rst_during_handshake_is_reported_as_connection_refused() {
    let netif = Arc::new(RefusingNetIf::default());
    let stack = Stack::new(Config::default(), netif.clone());
    netif.set_self(stack.shared.network_tx.clone());

    let local = Endpoint::new(Ipv6Addr::LOCALHOST, 45400);
    let remote = Endpoint::new(Ipv6Addr::LOCALHOST, 9070);

    let err = utcp::connect(&stack, local, remote).expect_err("peer refuses every SYN");
    assert_eq!(tcp_error_kind(&err), Some(TcpErrorKind::ConnRefused));
}
