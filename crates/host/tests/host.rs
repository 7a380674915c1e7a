//! Host behaviour over real loopback sockets.

use std::time::Duration;

use assert_matches::assert_matches;
use futures::{AsyncReadExt, AsyncWriteExt};
use peerscope_connmgr::ConnManagerConfig;
use peerscope_host::{DialError, Direction, Host, HostConfig, HostError, Stream};
use peerscope_identity::{LocalIdentity, Multiaddr, PeerAddrInfo, PeerId};
use peerscope_transport::{NOISE_PROTOCOL, SecurityRegistry, TLS_PROTOCOL, YAMUX_PROTOCOL};

const ECHO: &str = "/echo/1.0.0";

fn loopback() -> Multiaddr {
    "/ip4/127.0.0.1/tcp/0".parse().unwrap()
}

fn test_config() -> HostConfig {
    HostConfig {
        dial_timeout: Duration::from_secs(5),
        connect_timeout: Duration::from_secs(10),
        ..HostConfig::default()
    }
}

fn build_with(config: HostConfig, security: Option<SecurityRegistry>) -> Host {
    let mut builder = Host::builder(LocalIdentity::generate().unwrap()).with_config(config);
    if let Some(security) = security {
        builder = builder.with_security(security);
    }
    builder.build().unwrap()
}

fn build(security: Option<SecurityRegistry>) -> Host {
    build_with(test_config(), security)
}

fn only(name: &str) -> SecurityRegistry {
    SecurityRegistry::from_names(&[name]).unwrap()
}

async fn echo(_peer: PeerId, stream: Stream) {
    let (mut reader, mut writer) = stream.split();
    let _ = futures::io::copy(&mut reader, &mut writer).await;
    let _ = writer.close().await;
}

/// A listening host that echoes everything on `/echo/1.0.0`.
async fn echo_server(security: Option<SecurityRegistry>) -> (Host, PeerAddrInfo) {
    let host = build(security);
    host.set_stream_handler(ECHO, echo);
    let addrs = host.listen(&[loopback()]).await.unwrap();
    let info = PeerAddrInfo::new(host.local_peer_id(), addrs);
    (host, info)
}

async fn round_trip(stream: &mut Stream, message: &[u8]) -> Vec<u8> {
    stream.write_all(message).await.unwrap();
    stream.flush().await.unwrap();
    let mut echoed = vec![0; message.len()];
    stream.read_exact(&mut echoed).await.unwrap();
    echoed
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_connect_and_protocols() {
    let (server, info) = echo_server(None).await;
    let server_id = server.local_peer_id();
    let client = build(None);

    client.connect(&info).await.unwrap();
    assert!(client.is_connected(&server_id));
    assert_eq!(client.protocols(&server_id).unwrap(), vec![ECHO.to_string()]);

    let conn = client.connection_info(&server_id).unwrap();
    assert_eq!(conn.direction, Direction::Outbound);
    assert_eq!(conn.security_protocol, NOISE_PROTOCOL);
    assert_eq!(conn.muxer_protocol, YAMUX_PROTOCOL);
    assert_eq!(
        client
            .address_book()
            .public_key(&server_id)
            .map(|k| k.to_peer_id()),
        Some(server_id)
    );
    assert_eq!(
        client.address_book().agent_version(&server_id),
        Some(peerscope_host::DEFAULT_AGENT_VERSION.to_string())
    );

    let (selected, mut stream) = client
        .new_stream(&server_id, &["/missing/1.0.0", ECHO])
        .await
        .unwrap();
    assert_eq!(selected, ECHO);
    assert_eq!(round_trip(&mut stream, b"hello").await, b"hello");

    // A second connect reuses the live connection.
    client.connect(&info).await.unwrap();
    assert_eq!(client.connection_info(&server_id).unwrap().id, conn.id);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn test_unsupported_stream_protocol() {
    let (server, info) = echo_server(None).await;
    let client = build(None);
    client.connect(&info).await.unwrap();

    let err = client
        .new_stream(&server.local_peer_id(), &["/missing/1.0.0"])
        .await
        .unwrap_err();
    assert_matches!(err, HostError::OpenStream { .. });
    assert_matches!(
        client.new_stream(&server.local_peer_id(), &["no-slash"]).await,
        Err(HostError::InvalidProtocol(_))
    );
}

#[tokio::test]
async fn test_handler_registered_after_connect_is_served() {
    let (server, info) = echo_server(None).await;
    let client = build(None);
    client.connect(&info).await.unwrap();

    server.set_stream_handler("/late/1.0.0", echo);
    let (selected, mut stream) = client
        .new_stream(&server.local_peer_id(), &["/late/1.0.0"])
        .await
        .unwrap();
    assert_eq!(selected, "/late/1.0.0");
    assert_eq!(round_trip(&mut stream, b"late").await, b"late");
}

#[tokio::test]
async fn test_connect_over_websocket() {
    let server = build(None);
    server.set_stream_handler(ECHO, echo);
    let ws: Multiaddr = "/ip4/127.0.0.1/tcp/0/ws".parse().unwrap();
    let addrs = server.listen(&[ws]).await.unwrap();
    let client = build(None);

    client
        .connect(&PeerAddrInfo::new(server.local_peer_id(), addrs))
        .await
        .unwrap();
    assert_eq!(
        client.protocols(&server.local_peer_id()).unwrap(),
        vec![ECHO.to_string()]
    );
}

#[tokio::test]
async fn test_single_connection_when_dials_race() {
    let server = build(None);
    let addrs = server.listen(&[loopback(), loopback()]).await.unwrap();
    assert_eq!(addrs.len(), 2);
    let info = PeerAddrInfo::new(server.local_peer_id(), addrs);
    let client = build(None);

    let (a, b) = tokio::join!(client.connect(&info), client.connect(&info));
    a.unwrap();
    b.unwrap();

    assert_eq!(client.connected_peers(), vec![server.local_peer_id()]);
    assert!(server.connected_peers().len() <= 1);
    assert_eq!(client.conn_manager().connection_count(), 1);
}

#[tokio::test]
async fn test_second_security_preference() {
    let (server, info) = echo_server(Some(only(TLS_PROTOCOL))).await;
    let client = build(None);

    client.connect(&info).await.unwrap();
    let conn = client.connection_info(&server.local_peer_id()).unwrap();
    assert_eq!(conn.security_protocol, TLS_PROTOCOL);
}

#[tokio::test]
async fn test_disjoint_security_fails() {
    let (server, info) = echo_server(Some(only(TLS_PROTOCOL))).await;
    let client = build(Some(only(NOISE_PROTOCOL)));

    let err = client.connect(&info).await.unwrap_err();
    assert_matches!(err, HostError::NegotiationFailed { peer_id, ref attempts }
        if peer_id == server.local_peer_id() && attempts.len() == 1);
    assert!(!client.is_connected(&server.local_peer_id()));
}

#[tokio::test]
async fn test_peer_id_mismatch() {
    let (server, info) = echo_server(None).await;
    let impostor = LocalIdentity::generate().unwrap().peer_id();
    let client = build(None);

    let err = client
        .connect(&PeerAddrInfo::new(impostor, info.addrs.clone()))
        .await
        .unwrap_err();
    let HostError::NoReachableAddress { attempts, .. } = err else {
        panic!("expected NoReachableAddress, got {err}");
    };
    assert_matches!(
        attempts.first().map(|a| &a.error),
        Some(DialError::PeerIdMismatch { obtained }) if *obtained == server.local_peer_id()
    );
}

#[tokio::test]
async fn test_partial_listen_failure_releases_everything() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();
    let taken: Multiaddr = format!("/ip4/127.0.0.1/tcp/{port}").parse().unwrap();

    let host = build(None);
    let err = host.listen(&[loopback(), taken.clone()]).await.unwrap_err();
    assert_matches!(err, HostError::Listen { addr, .. } if addr == taken);
    assert!(host.listen_addrs().is_empty());
}

#[tokio::test]
async fn test_unreachable_and_unsupported_addresses() {
    let client = build(None);
    let target = LocalIdentity::generate().unwrap().peer_id();

    let udp: Multiaddr = "/ip4/127.0.0.1/udp/4001".parse().unwrap();
    let err = client
        .connect(&PeerAddrInfo::new(target, [udp]))
        .await
        .unwrap_err();
    assert_matches!(err, HostError::NoReachableAddress { ref attempts, .. }
        if matches!(attempts.as_slice(), [a] if matches!(a.error, DialError::UnsupportedAddress)));

    // Bind and drop to find a port nobody listens on.
    let closed_port = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let refused: Multiaddr = format!("/ip4/127.0.0.1/tcp/{closed_port}").parse().unwrap();
    let other = LocalIdentity::generate().unwrap().peer_id();
    let err = client
        .connect(&PeerAddrInfo::new(other, [refused]))
        .await
        .unwrap_err();
    assert_matches!(err, HostError::NoReachableAddress { .. });

    let nowhere = LocalIdentity::generate().unwrap().peer_id();
    assert_matches!(
        client.connect(&PeerAddrInfo::new(nowhere, [])).await,
        Err(HostError::NoReachableAddress { ref attempts, .. }) if attempts.is_empty()
    );
}

#[tokio::test]
async fn test_not_connected_and_dial_self() {
    let host = build(None);
    let stranger = LocalIdentity::generate().unwrap().peer_id();

    assert_matches!(host.protocols(&stranger), Err(HostError::NotConnected(p)) if p == stranger);
    assert!(matches!(
        host.new_stream(&stranger, &[ECHO]).await,
        Err(HostError::NotConnected(_))
    ));

    let me = PeerAddrInfo::new(host.local_peer_id(), [loopback()]);
    assert_matches!(host.connect(&me).await, Err(HostError::DialSelf));
}

#[tokio::test]
async fn test_close_connection_and_host() {
    let (server, info) = echo_server(None).await;
    let server_id = server.local_peer_id();
    let client = build(None);
    client.connect(&info).await.unwrap();

    assert!(client.close_connection(&server_id).await);
    assert!(!client.is_connected(&server_id));
    assert_matches!(client.protocols(&server_id), Err(HostError::NotConnected(_)));
    assert!(!client.close_connection(&server_id).await);
    assert_eq!(client.conn_manager().connection_count(), 0);

    eventually("server to drop the connection", || !server.is_connected(&client.local_peer_id()))
        .await;
    client.connect(&info).await.unwrap();
    client.close().await;
    assert!(client.is_closed());
    assert!(client.connected_peers().is_empty());
    assert!(client.listen_addrs().is_empty());
    assert_matches!(client.connect(&info).await, Err(HostError::Closed));
}

#[tokio::test]
async fn test_server_identifies_dialer() {
    let (server, info) = echo_server(None).await;
    let client = build(None);
    client.set_stream_handler("/ping/1.0.0", |_peer: PeerId, _stream: Stream| async {});
    client.connect(&info).await.unwrap();

    let client_id = client.local_peer_id();
    eventually("server to identify the dialer", || {
        !server.address_book().protocols(&client_id).unwrap_or_default().is_empty()
    })
    .await;
    assert_eq!(
        server.address_book().protocols(&client_id).unwrap(),
        vec!["/ping/1.0.0".to_string()]
    );
    let inbound = server.connection_info(&client_id).unwrap();
    assert_eq!(inbound.direction, Direction::Inbound);
}

#[tokio::test]
async fn test_stalled_stream_leaves_other_streams_working() {
    let (server, info) = echo_server(None).await;
    let server_id = server.local_peer_id();
    let client = build(None);
    client.connect(&info).await.unwrap();

    // Far beyond the flow control window, and nobody reads the echo yet:
    // this stream stalls in both directions.
    const LEN: usize = 4 * 1024 * 1024;
    let (_, stalled) = client.new_stream(&server_id, &[ECHO]).await.unwrap();
    let (mut stalled_reader, mut stalled_writer) = stalled.split();
    let writer = tokio::spawn(async move {
        stalled_writer.write_all(&vec![7u8; LEN]).await.unwrap();
        stalled_writer.close().await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (_, mut other) = client.new_stream(&server_id, &[ECHO]).await.unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(5), round_trip(&mut other, b"still here"))
        .await
        .expect("second stream blocked behind the stalled one");
    assert_eq!(echoed, b"still here");
    assert!(client.is_connected(&server_id));

    let mut received = Vec::with_capacity(LEN);
    tokio::time::timeout(Duration::from_secs(20), stalled_reader.read_to_end(&mut received))
        .await
        .expect("stalled stream never drained")
        .unwrap();
    writer.await.unwrap();
    assert_eq!(received.len(), LEN);
}

#[tokio::test]
async fn test_trimming_closes_unprotected_peers() {
    let config = HostConfig {
        conn_manager: ConnManagerConfig {
            low_water: 0,
            high_water: 1,
            grace_period: Duration::ZERO,
            trim_interval: Duration::from_millis(100),
        },
        ..test_config()
    };
    let client = build_with(config, None);
    let (kept, kept_info) = echo_server(None).await;
    let (trimmed, trimmed_info) = echo_server(None).await;
    let (kept_id, trimmed_id) = (kept.local_peer_id(), trimmed.local_peer_id());

    client.conn_manager().protect(kept_id, "keep");
    client.connect(&kept_info).await.unwrap();
    client.connect(&trimmed_info).await.unwrap();

    eventually("the unprotected peer to be trimmed", || !client.is_connected(&trimmed_id)).await;
    assert!(client.is_connected(&kept_id));
    assert!(client.conn_manager().is_tracked(&kept_id));
    assert!(!client.conn_manager().is_tracked(&trimmed_id));
    eventually("the trimmed peer to see the close", || {
        !trimmed.is_connected(&client.local_peer_id())
    })
    .await;
}
