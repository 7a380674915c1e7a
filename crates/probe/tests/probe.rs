//! Whole probe runs against hosts on loopback.

use std::time::Duration;

use assert_matches::assert_matches;
use futures::AsyncWriteExt;
use parking_lot::Mutex;
use peerscope_host::{Host, HostConfig, Stream};
use peerscope_identity::{LocalIdentity, Multiaddr, PeerAddrInfo, PeerId};
use peerscope_kad::{KadConfig, Mode};
use peerscope_probe::{
    BootstrapConfig, ErrorKind, LocatorError, ProbeConfig, ProbeError, ProbeEvent, Prober,
};
use peerscope_transport::{NOISE_PROTOCOL, SecurityRegistry, TLS_PROTOCOL, YAMUX_PROTOCOL};

const CHAT: &str = "/chat/1.0.0";

fn loopback() -> Multiaddr {
    "/ip4/127.0.0.1/tcp/0".parse().unwrap()
}

fn registry(names: &[&str]) -> SecurityRegistry {
    SecurityRegistry::from_names(names).unwrap()
}

fn probe_config(seeds: Vec<Multiaddr>) -> ProbeConfig {
    ProbeConfig {
        probe_timeout: Duration::from_secs(30),
        host: HostConfig {
            dial_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            ..HostConfig::default()
        },
        dht: KadConfig {
            query_timeout: Duration::from_secs(5),
            lookup_timeout: Duration::from_secs(20),
            ..KadConfig::local()
        },
        bootstrap: BootstrapConfig {
            seeds,
            resolve_dnsaddr: false,
            connect_timeout: Duration::from_secs(5),
        },
    }
}

#[derive(Default)]
struct Recorder(Mutex<Vec<ProbeEvent>>);

impl Recorder {
    fn observer(&self) -> impl Fn(&ProbeEvent) + Send + Sync + '_ {
        move |event: &ProbeEvent| self.0.lock().push(event.clone())
    }

    fn lines(&self) -> Vec<String> {
        self.0.lock().iter().map(ToString::to_string).collect()
    }
}

/// A listening host speaking `/chat/1.0.0`, optionally restricted to some
/// security protocols.
async fn chat_server(security: Option<&[&str]>) -> (Host, PeerAddrInfo) {
    let mut builder = Host::builder(LocalIdentity::generate().unwrap());
    if let Some(names) = security {
        builder = builder.with_security(registry(names));
    }
    let host = builder.build().unwrap();
    host.set_stream_handler(CHAT, |_peer: PeerId, mut stream: Stream| async move {
        let _ = stream.close().await;
    });
    let addrs = host.listen(&[loopback()]).await.unwrap();
    let info = PeerAddrInfo::new(host.local_peer_id(), addrs);
    (host, info)
}

fn overlay(info: &PeerAddrInfo) -> String {
    info.to_p2p_addrs().first().unwrap().to_string()
}

fn closed_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_probe_overlay_address() {
    let (server, info) = chat_server(None).await;
    let recorder = Recorder::default();

    let report = Prober::new(probe_config(Vec::new()))
        .run(&overlay(&info), &recorder.observer())
        .await
        .unwrap();

    assert_eq!(report.peer_id, server.local_peer_id());
    assert_eq!(report.protocols, vec![CHAT.to_string()]);
    assert_eq!(report.security, NOISE_PROTOCOL);
    assert_eq!(report.muxer, YAMUX_PROTOCOL);
    assert_eq!(Some(&report.remote_addr), info.addrs.first());
    assert_eq!(
        report.agent_version.as_deref(),
        Some(server.config().agent_version.as_str())
    );

    assert_eq!(
        recorder.lines(),
        vec![
            "host made...".to_string(),
            format!("connecting to {info}..."),
            "connected...".to_string(),
            format!("protocols: [{CHAT}]"),
        ]
    );
}

#[tokio::test]
async fn test_probe_bare_id_with_unreachable_seeds() {
    let seeds = (0..3)
        .map(|_| {
            let peer = LocalIdentity::generate().unwrap().peer_id();
            format!("/ip4/127.0.0.1/tcp/{}/p2p/{peer}", closed_port())
                .parse()
                .unwrap()
        })
        .collect();
    let target = LocalIdentity::generate().unwrap().peer_id();
    let recorder = Recorder::default();

    let err = Prober::new(probe_config(seeds))
        .run(&target.to_string(), &recorder.observer())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResolutionFailed);
    assert_matches!(
        err,
        ProbeError::Locate(LocatorError::NoBootstrapPeers { attempted: 3 })
    );
    assert!(err.to_string().starts_with("could not find peer: "));
    assert_eq!(recorder.lines(), vec!["host made...", "bootstrapping..."]);
}

#[tokio::test]
async fn test_probe_picks_shared_security_protocol() {
    let (_server, info) = chat_server(Some(&[TLS_PROTOCOL])).await;

    let report = Prober::new(probe_config(Vec::new()))
        .with_security(registry(&[NOISE_PROTOCOL, TLS_PROTOCOL]))
        .run(&overlay(&info), &|_: &ProbeEvent| {})
        .await
        .unwrap();

    assert_eq!(report.security, TLS_PROTOCOL);
    assert_eq!(report.protocols, vec![CHAT.to_string()]);
}

#[tokio::test]
async fn test_probe_disjoint_security_fails_negotiation() {
    let (_server, info) = chat_server(Some(&[TLS_PROTOCOL])).await;
    let recorder = Recorder::default();

    let err = Prober::new(probe_config(Vec::new()))
        .with_security(registry(&[NOISE_PROTOCOL]))
        .run(&overlay(&info), &recorder.observer())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NegotiationFailed);
    assert!(err.to_string().starts_with("could not connect: "));
    assert_eq!(recorder.lines().last().unwrap(), &format!("connecting to {info}..."));
}

#[tokio::test]
async fn test_probe_bare_id_through_dht() {
    let seed_host = Host::builder(LocalIdentity::generate().unwrap())
        .with_kad(KadConfig {
            mode: Mode::Server,
            ..KadConfig::local()
        })
        .build()
        .unwrap();
    let seed_addrs = seed_host.listen(&[loopback()]).await.unwrap();
    let seed = PeerAddrInfo::new(seed_host.local_peer_id(), seed_addrs);

    let (target, target_info) = chat_server(None).await;
    seed_host.connect(&target_info).await.unwrap();
    // The target does not serve kad, so the seed learns it by hand.
    assert!(seed_host.kad().add_peer(&target_info).await.unwrap());

    let recorder = Recorder::default();
    let report = Prober::new(probe_config(seed.to_p2p_addrs()))
        .run(&target.local_peer_id().to_string(), &recorder.observer())
        .await
        .unwrap();

    assert_eq!(report.peer_id, target.local_peer_id());
    assert_eq!(report.protocols, vec![CHAT.to_string()]);

    let lines = recorder.lines();
    assert_eq!(
        lines.iter().take(3).collect::<Vec<_>>(),
        vec!["host made...", "bootstrapping...", "starting DHT..."]
    );
    assert!(lines.get(3).unwrap().starts_with("connecting to "));
    assert_eq!(lines.get(4).unwrap(), "connected...");
}

#[tokio::test]
async fn test_probe_rejects_unparsable_target() {
    let recorder = Recorder::default();

    let err = Prober::new(probe_config(Vec::new()))
        .run("definitely not a peer", &recorder.observer())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.to_string().starts_with("could not parse peer: "));
    assert_eq!(recorder.lines(), vec!["host made..."]);
}

#[tokio::test]
async fn test_probe_deadline() {
    // Accepts TCP connections and never speaks.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let peer = LocalIdentity::generate().unwrap().peer_id();
    let target = format!("/ip4/127.0.0.1/tcp/{port}/p2p/{peer}");
    let config = ProbeConfig {
        probe_timeout: Duration::from_millis(500),
        ..probe_config(Vec::new())
    };

    let err = Prober::new(config)
        .run(&target, &|_: &ProbeEvent| {})
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Deadline);
    assert_matches!(err, ProbeError::DeadlineExceeded(d) if d == Duration::from_millis(500));
}

#[tokio::test]
async fn test_probe_with_fixed_identity_listens() {
    let (_server, info) = chat_server(None).await;
    let identity = LocalIdentity::generate().unwrap();
    let local = identity.peer_id();
    let recorder = Recorder::default();

    let config = ProbeConfig {
        host: HostConfig {
            listen_addrs: vec![loopback()],
            ..probe_config(Vec::new()).host
        },
        ..probe_config(Vec::new())
    };
    Prober::new(config)
        .with_identity(identity)
        .run(&overlay(&info), &recorder.observer())
        .await
        .unwrap();

    assert_matches!(
        recorder.0.lock().first(),
        Some(ProbeEvent::HostReady { peer_id }) if *peer_id == local
    );
}
