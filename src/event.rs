//! 외부 협력자(UI 등)에게 전달하는 이벤트
//!
//! 구독자마다 crossbeam 채널 하나. 끊긴 구독자는 다음 발행 때 정리됨

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::topic::Topic;
use crate::transfer::TransferInfo;
use crate::user::{User, UserCode};

/// 채팅 이벤트
#[derive(Debug, Clone, Serialize)]
pub enum ChatEvent {
    /// 새 사용자 등록
    UserJoined(User),

    /// 사용자 정보 변경 (클라이언트 정보, TCP 상태 등)
    UserChanged(User),

    /// LOGOFF로 퇴장
    UserLeft(User),

    /// IDLE 타임아웃으로 제거
    UserTimedOut(User),

    MessageArrived {
        from: User,
        text: String,
        color: i32,
        private: bool,
    },

    TopicChanged(Topic),

    /// 다른 피어가 주제를 요청함
    TopicRequested { by: UserCode },

    AwayChanged(User),

    WritingChanged(User),

    NickChanged {
        code: UserCode,
        old: String,
        new: String,
    },

    /// 내 닉네임이 충돌로 재설정됨
    NickCrash { old_nick: String, new_nick: String },

    /// 내 사용자 코드가 충돌로 재생성됨
    CodeChanged { old: UserCode, new: UserCode },

    /// 내 LOGON이 네트워크에서 되돌아옴
    MeLoggedOn(User),

    /// 수신 파일 제안 (수락/거절 대기)
    FileOffered(TransferInfo),

    TransferStatus(TransferInfo),

    TransferProgress(TransferInfo),

    NetworkUp { interfaces: Vec<String> },

    /// 사용 가능한 네트워크 없음 (재시작 전까지 비활성)
    NetworkLost { reason: String },
}

/// 이벤트 버스
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<ChatEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 구독 채널
    pub fn subscribe(&self) -> Receiver<ChatEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// 모든 구독자에게 발행
    pub fn emit(&self, event: ChatEvent) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            debug!("모든 이벤트 구독자 종료됨");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
