//! 컨트롤러/전송 엔진이 노드에 요청하는 출력 동작

use std::net::{IpAddr, SocketAddr};

use crate::message::Message;
use crate::user::UserCode;

/// 메시지 전송 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// 멀티캐스트 그룹 + 열린 모든 TCP 연결
    Multicast,
    /// 특정 피어 (TCP 연결이 있으면 TCP, 없으면 UDP 유니캐스트)
    Direct { code: UserCode, ip: Option<IpAddr> },
}

/// 보낼 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub route: Route,
    pub message: Message,
}

/// 노드가 실행할 동작
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(Outgoing),
    /// 피어에게 TCP 개인 연결 시도
    ConnectTcp { code: UserCode, addr: SocketAddr },
    /// 퇴장/타임아웃한 피어의 TCP 연결과 파일 전송 정리
    DropPeer(UserCode),
}

impl Action {
    pub fn multicast(message: Message) -> Self {
        Action::Send(Outgoing {
            route: Route::Multicast,
            message,
        })
    }

    pub fn direct(code: UserCode, ip: Option<IpAddr>, message: Message) -> Self {
        Action::Send(Outgoing {
            route: Route::Direct { code, ip },
            message,
        })
    }

    /// 전송 동작이면 메시지 반환
    pub fn outgoing(&self) -> Option<&Outgoing> {
        match self {
            Action::Send(out) => Some(out),
            _ => None,
        }
    }
}
