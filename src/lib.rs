//! # lanchat
//!
//! 서버 없는 LAN 그룹 채팅 코어
//!
//! ## 핵심 특징
//! - **멀티캐스트 접속 관리**: LOGON/EXPOSE/IDLE로 참여자 목록 유지
//! - **텍스트 프로토콜**: `<코드>!<타입>#<닉>:<내용>` 한 줄 메시지
//! - **TCP 개인 연결**: 멀티캐스트가 막힌 구간을 보완, 중복은 코드별로 제거
//! - **파일 전송**: SENDFILE 제안 후 받는 쪽이 연 TCP 포트로 스트리밍
//! - **장애 조치**: 인터페이스가 사라지면 로그오프, 돌아오면 다시 로그온

pub mod config;
pub mod controller;
pub mod counter;
pub mod dedup;
pub mod error;
pub mod event;
pub mod interfaces;
pub mod message;
pub mod node;
pub mod outbox;
pub mod registry;
pub mod tcp;
pub mod topic;
pub mod transfer;
pub mod transport;
pub mod user;

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

pub use config::Config;
pub use controller::SessionController;
pub use dedup::{Deduplicator, Origin};
pub use error::{Error, Result};
pub use event::{ChatEvent, EventBus};
pub use interfaces::{InterfaceManager, NicInfo};
pub use message::{Message, MessageBody, MessageType};
pub use node::ChatNode;
pub use outbox::{Action, Outgoing, Route};
pub use registry::UserRegistry;
pub use topic::Topic;
pub use transfer::{TransferId, TransferInfo, TransferManager, TransferState};
pub use user::{User, UserCode};

/// 기본 멀티캐스트 그룹
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 168, 5, 1);

/// 기본 멀티캐스트 포트
pub const MULTICAST_PORT: u16 = 50050;

/// 기본 TCP 개인 연결 포트
pub const PRIVATE_CHAT_PORT: u16 = 50051;

/// 데이터그램 최대 크기 (바이트)
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// 닉네임 최대 길이 (문자)
pub const MAX_NICK_LEN: usize = 10;

/// 현재 시각 (유닉스 밀리초)
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
