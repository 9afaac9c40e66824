//! The Tokio runner over real loopback sockets.

use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use wtp_core::{MessageType, Wtp, WtpConfig, WtpState, runner};
use wtp_crypto::ClearSecurityService;
use wtp_integration_tests::{SimulatedAc, addr};
use wtp_transport::{AsyncUdpTransport, TransportConfig};

fn loopback_config(ac: std::net::SocketAddr) -> WtpConfig {
    let mut config = WtpConfig::default();
    config.identity.name = "ap-loopback".into();
    config.discovery.search = false;
    config.discovery.static_hosts = vec![ac.to_string()];
    config.discovery.interval = Duration::from_millis(100);
    config
}

#[tokio::test]
async fn test_runner_joins_over_loopback() {
    let ac_socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let ac_addr = ac_socket.local_addr().unwrap();

    let mut wtp = Wtp::new(
        loopback_config(ac_addr),
        Box::new(ClearSecurityService::default()),
    )
    .unwrap();
    let transport = AsyncUdpTransport::bind(addr("127.0.0.1:0"), &TransportConfig::default())
        .await
        .unwrap();

    let (joined_tx, joined_rx) = oneshot::channel();
    let ac_task = tokio::spawn(async move {
        let mut ac = SimulatedAc::clear(ac_addr);
        let mut joined = Some(joined_tx);
        let mut buf = vec![0u8; 65_535];
        loop {
            let Ok((len, from)) = ac_socket.recv_from(&mut buf).await else {
                return;
            };
            for reply in ac.handle(&buf[..len]) {
                let _ = ac_socket.send_to(&reply, from).await;
            }
            if ac
                .request_types()
                .contains(&MessageType::ChangeStateEventRequest)
            {
                if let Some(tx) = joined.take() {
                    let _ = tx.send(());
                }
            }
        }
    });

    let shutdown = async {
        let _ = tokio::time::timeout(Duration::from_secs(10), joined_rx).await;
        // Let the final response reach the WTP
        tokio::time::sleep(Duration::from_millis(200)).await;
    };
    runner::run(&mut wtp, &transport, shutdown).await.unwrap();
    ac_task.abort();

    let stats = wtp.stats();
    assert_eq!(wtp.state(), WtpState::Dead);
    assert!(stats.history.iter().any(|&(_, to)| to == WtpState::Run));
    assert_eq!(stats.joins, 1);
}

#[tokio::test]
async fn test_runner_stops_while_discovering() {
    // Nothing listens on the configured AC
    let mut wtp = Wtp::new(
        loopback_config(addr("127.0.0.1:9")),
        Box::new(ClearSecurityService::default()),
    )
    .unwrap();
    let transport = AsyncUdpTransport::bind(addr("127.0.0.1:0"), &TransportConfig::default())
        .await
        .unwrap();

    runner::run(
        &mut wtp,
        &transport,
        tokio::time::sleep(Duration::from_millis(350)),
    )
    .await
    .unwrap();

    let stats = wtp.stats();
    assert_eq!(wtp.state(), WtpState::Dead);
    assert!(stats.discovery_rounds >= 2);
    assert_eq!(stats.joins, 0);
}
