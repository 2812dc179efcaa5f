//! Connection-establishment timeout, and tearing down an established connection via abort.

mod common;

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use utcp::error::{tcp_error_kind, TcpErrorKind};
use utcp::{Config, Endpoint, Stack};

use common::LoopbackNetIf;

#[test]
fn connect_to_nothing_times_out() {
    let netif = Arc::new(LoopbackNetIf::default());
    // No peer is ever wired up: every SYN vanishes, so the connection timer is the only thing
    // that can ever resolve this call.
    let cfg = Config {
        connection_timeout: Duration::from_millis(100),
        ..Config::default()
    };
    let stack = Stack::new(cfg, netif);

    let local = Endpoint::new(Ipv6Addr::LOCALHOST, 45100);
    let remote = Endpoint::new(Ipv6Addr::LOCALHOST, 45101);

    let err = utcp::connect(&stack, local, remote).expect_err("connect should time out");
    assert_eq!(tcp_error_kind(&err), Some(TcpErrorKind::TimedOut));
}

#[test]
fn abort_tears_down_an_established_connection() {
    let (client, server) = common::build_pair(Config::default());

    let server_ep = Endpoint::new(Ipv6Addr::LOCALHOST, 9050);
    let client_ep = Endpoint::new(Ipv6Addr::LOCALHOST, 45200);
    let listener = utcp::listen(&server, server_ep, 4).unwrap();

    let accept_thread = std::thread::spawn(move || utcp::accept(&server, &listener));
    let client_stream = utcp::connect(&client, client_ep, server_ep).expect("connect");
    let _server_stream = accept_thread.join().unwrap().expect("accept");

    client_stream.abort().expect("abort always succeeds locally");

    // A second call on an aborted connection must not panic; the CCB is already gone.
    let err = client_stream.send(b"too late").expect_err("send after abort must fail");
    assert_eq!(tcp_error_kind(&err), Some(TcpErrorKind::NotConnected));
}
