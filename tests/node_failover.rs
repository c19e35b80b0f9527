//! 실행 중인 노드의 인터페이스 장애 조치
//!
//! 루프백 멀티캐스트를 쓸 수 없는 환경에서는 시작 단계에서 건너뜀

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use lanchat::{ChatEvent, ChatNode, Config, NicInfo};

fn loopback_node() -> ChatNode {
    let config = Config {
        multicast_port: 0,
        tcp_enabled: false,
        // 주기 재검사가 끼어들지 않도록
        network_check_interval_ms: 3_600_000,
        ..Config::loopback_test().with_interface("127.0.0.1")
    };
    ChatNode::new(config).unwrap()
}

fn lo() -> NicInfo {
    NicInfo::new("lo", Ipv4Addr::LOCALHOST)
}

/// 조건에 맞는 이벤트가 올 때까지 받은 이벤트 전부 반환
fn wait_for(events: &Receiver<ChatEvent>, pred: impl Fn(&ChatEvent) -> bool) -> Vec<ChatEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) => {
                let done = pred(&event);
                seen.push(event);
                if done {
                    return seen;
                }
            }
            Err(_) => break,
        }
    }
    panic!("expected event not received, got {:?}", seen);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relogon_after_interface_returns() {
    let node = loopback_node();
    let events = node.subscribe();
    if node.start().await.is_err() {
        return;
    }
    assert!(node.is_logged_on());
    let _ = events.try_iter().count();

    // 인터페이스가 두 번 연속 사라져도 알림은 한 번
    node.update_interfaces(Vec::new()).unwrap();
    node.update_interfaces(Vec::new()).unwrap();
    wait_for(&events, |e| matches!(e, ChatEvent::NetworkLost { .. }));
    assert!(!node.is_logged_on());
    assert!(node.interfaces().is_empty());

    node.update_interfaces(vec![lo()]).unwrap();
    let seen = wait_for(&events, |e| matches!(e, ChatEvent::NetworkUp { .. }));
    let lost = seen
        .iter()
        .filter(|e| matches!(e, ChatEvent::NetworkLost { .. }))
        .count();
    assert_eq!(lost, 0);

    // 복구 직후 메인 태스크가 다시 로그온
    let deadline = Instant::now() + Duration::from_secs(5);
    while !node.is_logged_on() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(node.is_logged_on());
    assert_eq!(node.interfaces(), vec![lo()]);

    node.stop().await;
    assert!(!node.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_relogon_after_manual_log_off() {
    let node = loopback_node();
    let events = node.subscribe();
    if node.start().await.is_err() {
        return;
    }
    node.log_off().await.unwrap();
    let _ = events.try_iter().count();

    node.update_interfaces(Vec::new()).unwrap();
    wait_for(&events, |e| matches!(e, ChatEvent::NetworkLost { .. }));
    node.update_interfaces(vec![lo()]).unwrap();
    wait_for(&events, |e| matches!(e, ChatEvent::NetworkUp { .. }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!node.is_logged_on());
    node.stop().await;
}
