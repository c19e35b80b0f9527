//! 사용자(피어) 정의

use std::net::IpAddr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::MAX_NICK_LEN;

/// 사용자 코드 (프로세스 시작 시 무작위 생성)
pub type UserCode = u32;

/// 사용자 코드 범위 (8자리 십진수)
const CODE_MIN: UserCode = 10_000_000;
const CODE_MAX: UserCode = 100_000_000;

/// 새 사용자 코드 생성
pub fn generate_code() -> UserCode {
    rand::thread_rng().gen_range(CODE_MIN..CODE_MAX)
}

/// 기존 코드와 다른 새 사용자 코드 생성
pub fn regenerate_code(old: UserCode) -> UserCode {
    loop {
        let code = generate_code();
        if code != old {
            return code;
        }
    }
}

/// 닉네임 유효성 검사
///
/// 1~10자, 영문자/숫자/`-`/`_`만 허용
pub fn is_valid_nick(nick: &str) -> bool {
    let len = nick.chars().count();
    (1..=MAX_NICK_LEN).contains(&len)
        && nick
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// 채팅 참가자
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// 사용자 코드 (레지스트리 키)
    pub code: UserCode,

    /// 표시 닉네임
    pub nick: String,

    /// 마지막으로 확인된 IP 주소
    pub ip: Option<IpAddr>,

    /// 자리 비움
    pub away: bool,

    /// 자리 비움 사유
    pub away_reason: String,

    /// 입력 중
    pub writing: bool,

    /// 읽지 않은 개인 메시지 있음
    pub new_message: bool,

    /// TCP 개인 연결 활성
    pub tcp_enabled: bool,

    /// 마지막 IDLE 수신 시각 (epoch ms)
    pub last_idle: u64,

    /// 로그온 시각 (epoch ms)
    pub logon_time: u64,

    /// 클라이언트 이름
    pub client: String,

    /// 운영체제
    pub os: String,

    /// 개인 채팅 TCP 포트
    pub private_port: Option<u16>,

    /// 로컬 사용자 여부
    pub is_me: bool,
}

impl User {
    pub fn new(code: UserCode, nick: impl Into<String>, now_ms: u64) -> Self {
        Self {
            code,
            nick: nick.into(),
            ip: None,
            away: false,
            away_reason: String::new(),
            writing: false,
            new_message: false,
            tcp_enabled: false,
            last_idle: now_ms,
            logon_time: now_ms,
            client: String::new(),
            os: String::new(),
            private_port: None,
            is_me: false,
        }
    }

    /// 로컬 사용자 생성
    pub fn new_me(code: UserCode, nick: impl Into<String>, now_ms: u64) -> Self {
        Self {
            is_me: true,
            ..Self::new(code, nick, now_ms)
        }
    }

    /// 닉네임 비교 (대소문자 무시)
    pub fn has_nick(&self, nick: &str) -> bool {
        self.nick.eq_ignore_ascii_case(nick)
    }
}
