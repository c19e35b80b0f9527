//! 전송 경로 간 메시지 중복 제거
//!
//! 같은 논리 메시지가 멀티캐스트와 TCP 두 경로로 올 수 있음.
//! TCP가 활성인 피어의 멀티캐스트 사본은 버리고 TCP 사본만 통과시킴.
//! 메시지 타입과 무관하게 적용됨

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::message::Message;
use crate::user::User;

/// 메시지가 도착한 경로
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// 멀티캐스트 그룹 소켓 (같은 포트로 온 유니캐스트 포함)
    Multicast,
    /// TCP 개인 연결
    Tcp,
}

/// 중복 제거기
#[derive(Debug, Default)]
pub struct Deduplicator {
    forwarded: AtomicU64,
    suppressed: AtomicU64,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 컨트롤러로 넘길지 결정
    ///
    /// `sender`는 레지스트리에서 찾은 보낸 사람 (없으면 None)
    pub fn should_forward(&self, msg: &Message, origin: Origin, sender: Option<&User>) -> bool {
        let forward = match (origin, sender) {
            (Origin::Tcp, _) => true,
            (Origin::Multicast, None) => true,
            (Origin::Multicast, Some(user)) => user.is_me || !user.tcp_enabled,
        };

        if forward {
            self.forwarded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            trace!(
                "멀티캐스트 사본 무시: {} from {}",
                msg.msg_type(),
                msg.user_code
            );
        }
        forward
    }

    pub fn forwarded_count(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}
