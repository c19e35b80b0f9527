//! 노드 설정

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::user::is_valid_nick;
use crate::{Error, Result, MAX_DATAGRAM_SIZE, MULTICAST_GROUP, MULTICAST_PORT, PRIVATE_CHAT_PORT};

/// 채팅 노드 설정
///
/// 설정 파일 저장/로드는 외부 협력자 책임. 여기서는 값과 기본값만 정의
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 시작 닉네임
    pub nick: String,

    /// 클라이언트 이름 (CLIENT 메시지로 광고)
    pub client_name: String,

    /// 사용할 네트워크 인터페이스 (이름 또는 IPv4 주소)
    /// None이면 사용 가능한 모든 인터페이스에서 멀티캐스트 그룹 가입
    pub interface: Option<String>,

    /// 멀티캐스트 그룹 주소
    pub multicast_group: Ipv4Addr,

    /// 멀티캐스트 UDP 포트
    pub multicast_port: u16,

    /// 멀티캐스트 TTL (1 = 로컬 서브넷)
    pub multicast_ttl: u32,

    /// TCP 개인 연결 활성화
    pub tcp_enabled: bool,

    /// 개인 채팅 TCP 포트 (0이면 임의 포트)
    pub private_port: u16,

    /// IDLE 브로드캐스트 주기 (밀리초)
    pub idle_interval_ms: u64,

    /// 응답 없는 사용자 제거 기준 (밀리초)
    pub idle_timeout_ms: u64,

    /// 네트워크 인터페이스 재검사 주기 (밀리초)
    pub network_check_interval_ms: u64,

    /// 파일 전송 연결 대기 타임아웃 (밀리초)
    pub file_connect_timeout_ms: u64,

    /// 파일 스트리밍 버퍼 크기 (바이트)
    pub file_chunk_size: usize,

    /// 수신 데이터그램 버퍼 크기
    pub max_datagram_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nick: "Peer".to_string(),
            client_name: format!("lanchat v{}", env!("CARGO_PKG_VERSION")),
            interface: None,
            multicast_group: MULTICAST_GROUP,
            multicast_port: MULTICAST_PORT,
            multicast_ttl: 1,
            tcp_enabled: true,
            private_port: PRIVATE_CHAT_PORT,
            idle_interval_ms: 15_000,          // 15초
            idle_timeout_ms: 120_000,          // 2분
            network_check_interval_ms: 15_000, // 15초
            file_connect_timeout_ms: 30_000,   // 30초
            file_chunk_size: 8 * 1024,         // 8KB
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl Config {
    /// 닉네임을 지정해 새 설정 생성
    pub fn new(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            ..Self::default()
        }
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.multicast_port = port;
        self
    }

    pub fn with_private_port(mut self, port: u16) -> Self {
        self.private_port = port;
        self
    }

    pub fn with_tcp(mut self, enabled: bool) -> Self {
        self.tcp_enabled = enabled;
        self
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if !is_valid_nick(&self.nick) {
            return Err(Error::InvalidNick(self.nick.clone()));
        }
        if !self.multicast_group.is_multicast() {
            return Err(Error::Config(format!(
                "멀티캐스트 주소가 아님: {}",
                self.multicast_group
            )));
        }
        if self.multicast_port == 0 {
            return Err(Error::Config("멀티캐스트 포트는 0일 수 없음".into()));
        }
        if self.idle_interval_ms == 0 || self.idle_timeout_ms <= self.idle_interval_ms {
            return Err(Error::Config(format!(
                "idle_timeout_ms({})는 idle_interval_ms({})보다 커야 함",
                self.idle_timeout_ms, self.idle_interval_ms
            )));
        }
        if self.file_chunk_size == 0 {
            return Err(Error::Config("file_chunk_size는 0일 수 없음".into()));
        }
        Ok(())
    }

    /// 패킷 손실이 잦은 네트워크용 설정
    ///
    /// IDLE을 자주 보내고 제거는 늦게 함
    pub fn quiet_network() -> Self {
        Self {
            idle_interval_ms: 10_000,
            idle_timeout_ms: 180_000,
            network_check_interval_ms: 30_000,
            file_connect_timeout_ms: 60_000,
            ..Self::default()
        }
    }

    /// 루프백 테스트용 설정 (임의 TCP 포트, 짧은 타이머)
    pub fn loopback_test() -> Self {
        Self {
            nick: "Tester".to_string(),
            private_port: 0,
            idle_interval_ms: 500,
            idle_timeout_ms: 2_000,
            network_check_interval_ms: 1_000,
            file_connect_timeout_ms: 5_000,
            ..Self::default()
        }
    }
}
