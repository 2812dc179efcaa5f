//! A `recv_timeout` that elapses with nothing to read must not disturb the connection: a later
//! call on the same stream succeeds once the peer actually sends something.

mod common;

use std::net::Ipv6Addr;
use std::thread;
use std::time::Duration;

use utcp::error::{tcp_error_kind, TcpErrorKind};
use utcp::{Config, Endpoint};

#[test]
fn recv_timeout_expires_without_killing_the_connection() {
    let (client, server) = common::build_pair(Config::default());

    let server_ep = Endpoint::new(Ipv6Addr::LOCALHOST, 9060);
    let client_ep = Endpoint::new(Ipv6Addr::LOCALHOST, 45300);
    let listener = utcp::listen(&server, server_ep, 4).expect("bind listener");

    let accept_thread = thread::spawn(move || utcp::accept(&server, &listener));
    let client_stream = utcp::connect(&client, client_ep, server_ep).expect("client connect");
    let server_stream = accept_thread.join().unwrap().expect("server accept");

    let mut buf = [0u8; 16];
    let err = client_stream
        .recv_timeout(&mut buf, Duration::from_millis(100))
        .expect_err("idle connection has nothing to read");
    assert_eq!(tcp_error_kind(&err), Some(TcpErrorKind::TimedOut));

    // The timeout above must not have torn anything down: a normal send/recv still works.
    server_stream.send(b"still here").expect("server send");
    let n = client_stream
        .recv_timeout(&mut buf, Duration::from_secs(5))
        .expect("recv after data has arrived");
    assert_eq!(&buf[..n], b"still here");

    let client_close = thread::spawn(move || client_stream.close());
    thread::sleep(Duration::from_millis(50));
    server_stream.close().expect("server close");
    client_close.join().unwrap().expect("client close");
}
