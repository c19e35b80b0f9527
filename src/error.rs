//! 에러 타입 정의

use thiserror::Error;

use crate::user::UserCode;

/// 채팅 코어 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 파싱할 수 없는 와이어 메시지 (조용히 버림)
    #[error("잘못된 메시지: {0}")]
    MalformedMessage(String),

    #[error("유효하지 않은 닉네임: {0:?}")]
    InvalidNick(String),

    #[error("이미 사용 중인 닉네임: {0}")]
    NickInUse(String),

    /// 자리 비움 상태에서는 채팅 불가
    #[error("자리 비움 상태에서는 메시지를 보낼 수 없음")]
    Away,

    #[error("빈 메시지")]
    EmptyMessage,

    #[error("알 수 없는 사용자: {0}")]
    UnknownUser(UserCode),

    #[error("로그온 상태가 아님")]
    NotLoggedOn,

    #[error("사용 가능한 네트워크 인터페이스 없음")]
    NoUsableInterface,

    #[error("네트워크 인터페이스를 찾을 수 없음: {0}")]
    InterfaceNotFound(String),

    #[error("알 수 없는 파일 전송: id={0}")]
    UnknownTransfer(u64),

    #[error("잘못된 전송 상태: id={id}, state={state}")]
    InvalidTransferState { id: u64, state: String },

    #[error("네트워크가 실행 중이 아님")]
    NotRunning,

    #[error("설정 에러: {0}")]
    Config(String),

    /// 인코딩한 줄이 데이터그램 한 개보다 큼
    #[error("메시지가 너무 김: {len} bytes (최대 {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("연결 종료")]
    ConnectionClosed,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
