//! 프로토콜 메시지 정의
//!
//! 와이어 포맷: `<userCode>!<TYPE>#<nick>:<payload>`
//!
//! 데이터그램 또는 TCP 프레임 하나에 UTF-8 한 줄. 페이로드는 타입별로
//! `(..)`, `[..]`, `{..}`, `<..>` 하위 필드를 가질 수 있음

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::user::UserCode;
use crate::{Error, Result};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// 공개 채팅
    Msg,
    /// 접속 알림
    Logon,
    /// 종료 알림
    Logoff,
    /// 모든 피어에게 재알림 요청
    Expose,
    /// EXPOSE 응답 (현재 상태 스냅샷)
    Exposing,
    Away,
    Back,
    /// 닉네임 변경 알림
    Nick,
    /// 닉네임 충돌 통지
    NickCrash,
    Writing,
    StoppedWriting,
    /// 생존 신호
    Idle,
    GetTopic,
    Topic,
    SendFile,
    SendFileAccept,
    SendFileAbort,
    /// 클라이언트 정보
    Client,
    /// 개인 메시지
    PrivMsg,
}

impl MessageType {
    pub const ALL: [MessageType; 19] = [
        MessageType::Msg,
        MessageType::Logon,
        MessageType::Logoff,
        MessageType::Expose,
        MessageType::Exposing,
        MessageType::Away,
        MessageType::Back,
        MessageType::Nick,
        MessageType::NickCrash,
        MessageType::Writing,
        MessageType::StoppedWriting,
        MessageType::Idle,
        MessageType::GetTopic,
        MessageType::Topic,
        MessageType::SendFile,
        MessageType::SendFileAccept,
        MessageType::SendFileAbort,
        MessageType::Client,
        MessageType::PrivMsg,
    ];

    /// 와이어 표기
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Msg => "MSG",
            MessageType::Logon => "LOGON",
            MessageType::Logoff => "LOGOFF",
            MessageType::Expose => "EXPOSE",
            MessageType::Exposing => "EXPOSING",
            MessageType::Away => "AWAY",
            MessageType::Back => "BACK",
            MessageType::Nick => "NICK",
            MessageType::NickCrash => "NICKCRASH",
            MessageType::Writing => "WRITING",
            MessageType::StoppedWriting => "STOPPEDWRITING",
            MessageType::Idle => "IDLE",
            MessageType::GetTopic => "GETTOPIC",
            MessageType::Topic => "TOPIC",
            MessageType::SendFile => "SENDFILE",
            MessageType::SendFileAccept => "SENDFILEACCEPT",
            MessageType::SendFileAbort => "SENDFILEABORT",
            MessageType::Client => "CLIENT",
            MessageType::PrivMsg => "PRIVMSG",
        }
    }

    /// 파일 전송 엔진이 처리하는 타입
    pub fn is_file_transfer(&self) -> bool {
        matches!(
            self,
            MessageType::SendFile | MessageType::SendFileAccept | MessageType::SendFileAbort
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MessageType::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| Error::MalformedMessage(format!("알 수 없는 타입: {}", s)))
    }
}

/// 파일 제안/수락/중단 공통 필드
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// 파일을 보내는 피어 코드 (제안한 쪽)
    pub owner: UserCode,

    /// 전송 식별용 해시
    pub hash: u32,

    /// 파일 이름
    pub name: String,
}

/// 타입별 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Msg { color: i32, text: String },
    Logon,
    Logoff,
    Expose,
    /// 자리 비움 사유 (비어 있으면 자리에 있음)
    Exposing { away_reason: String },
    Away { reason: String },
    Back,
    Nick,
    NickCrash { target: UserCode },
    Writing,
    StoppedWriting,
    Idle,
    GetTopic,
    Topic { author: String, timestamp: u64, text: String },
    SendFile { file: FileRef, size: u64 },
    SendFileAccept { file: FileRef, port: u16 },
    SendFileAbort { file: FileRef },
    Client {
        client: String,
        logon_delta_ms: u64,
        os: String,
        private_port: u16,
    },
    PrivMsg { recipient: UserCode, color: i32, text: String },
}

impl MessageBody {
    pub fn msg_type(&self) -> MessageType {
        match self {
            MessageBody::Msg { .. } => MessageType::Msg,
            MessageBody::Logon => MessageType::Logon,
            MessageBody::Logoff => MessageType::Logoff,
            MessageBody::Expose => MessageType::Expose,
            MessageBody::Exposing { .. } => MessageType::Exposing,
            MessageBody::Away { .. } => MessageType::Away,
            MessageBody::Back => MessageType::Back,
            MessageBody::Nick => MessageType::Nick,
            MessageBody::NickCrash { .. } => MessageType::NickCrash,
            MessageBody::Writing => MessageType::Writing,
            MessageBody::StoppedWriting => MessageType::StoppedWriting,
            MessageBody::Idle => MessageType::Idle,
            MessageBody::GetTopic => MessageType::GetTopic,
            MessageBody::Topic { .. } => MessageType::Topic,
            MessageBody::SendFile { .. } => MessageType::SendFile,
            MessageBody::SendFileAccept { .. } => MessageType::SendFileAccept,
            MessageBody::SendFileAbort { .. } => MessageType::SendFileAbort,
            MessageBody::Client { .. } => MessageType::Client,
            MessageBody::PrivMsg { .. } => MessageType::PrivMsg,
        }
    }

    fn encode_payload(&self) -> String {
        match self {
            MessageBody::Msg { color, text } => format!("[{}]{}", color, clean(text)),
            MessageBody::Exposing { away_reason } => clean(away_reason),
            MessageBody::Away { reason } => clean(reason),
            MessageBody::NickCrash { target } => format!("({})", target),
            MessageBody::Topic {
                author,
                timestamp,
                text,
            } => format!(
                "({})[{}]{}",
                clean_field(author, ')'),
                timestamp,
                clean(text)
            ),
            MessageBody::SendFile { file, size } => format!(
                "({})[{}]{{{}}}{}",
                file.owner,
                size,
                file.hash,
                clean(&file.name)
            ),
            MessageBody::SendFileAccept { file, port } => format!(
                "({})[{}]{{{}}}{}",
                file.owner,
                port,
                file.hash,
                clean(&file.name)
            ),
            MessageBody::SendFileAbort { file } => {
                format!("({}){{{}}}{}", file.owner, file.hash, clean(&file.name))
            }
            MessageBody::Client {
                client,
                logon_delta_ms,
                os,
                private_port,
            } => format!(
                "({})[{}]{{{}}}<{}>",
                clean_field(client, ')'),
                logon_delta_ms,
                clean_field(os, '}'),
                private_port
            ),
            MessageBody::PrivMsg {
                recipient,
                color,
                text,
            } => format!("({})[{}]{}", recipient, color, clean(text)),
            MessageBody::Logon
            | MessageBody::Logoff
            | MessageBody::Expose
            | MessageBody::Back
            | MessageBody::Nick
            | MessageBody::Writing
            | MessageBody::StoppedWriting
            | MessageBody::Idle
            | MessageBody::GetTopic => String::new(),
        }
    }

    fn decode_payload(msg_type: MessageType, payload: &str) -> Result<Self> {
        let body = match msg_type {
            MessageType::Msg => {
                let (color, text) = field::<i32>(payload, '[', ']')?;
                MessageBody::Msg {
                    color,
                    text: text.to_string(),
                }
            }
            MessageType::Logon => MessageBody::Logon,
            MessageType::Logoff => MessageBody::Logoff,
            MessageType::Expose => MessageBody::Expose,
            MessageType::Exposing => MessageBody::Exposing {
                away_reason: payload.to_string(),
            },
            MessageType::Away => MessageBody::Away {
                reason: payload.to_string(),
            },
            MessageType::Back => MessageBody::Back,
            MessageType::Nick => MessageBody::Nick,
            MessageType::NickCrash => {
                let (target, _) = field::<UserCode>(payload, '(', ')')?;
                MessageBody::NickCrash { target }
            }
            MessageType::Writing => MessageBody::Writing,
            MessageType::StoppedWriting => MessageBody::StoppedWriting,
            MessageType::Idle => MessageBody::Idle,
            MessageType::GetTopic => MessageBody::GetTopic,
            MessageType::Topic => {
                let (author, rest) = raw_field(payload, '(', ')')?;
                let (timestamp, text) = field::<u64>(rest, '[', ']')?;
                MessageBody::Topic {
                    author: author.to_string(),
                    timestamp,
                    text: text.to_string(),
                }
            }
            MessageType::SendFile => {
                let (owner, rest) = field::<UserCode>(payload, '(', ')')?;
                let (size, rest) = field::<u64>(rest, '[', ']')?;
                let (hash, name) = field::<u32>(rest, '{', '}')?;
                MessageBody::SendFile {
                    file: FileRef {
                        owner,
                        hash,
                        name: name.to_string(),
                    },
                    size,
                }
            }
            MessageType::SendFileAccept => {
                let (owner, rest) = field::<UserCode>(payload, '(', ')')?;
                let (port, rest) = field::<u16>(rest, '[', ']')?;
                let (hash, name) = field::<u32>(rest, '{', '}')?;
                MessageBody::SendFileAccept {
                    file: FileRef {
                        owner,
                        hash,
                        name: name.to_string(),
                    },
                    port,
                }
            }
            MessageType::SendFileAbort => {
                let (owner, rest) = field::<UserCode>(payload, '(', ')')?;
                let (hash, name) = field::<u32>(rest, '{', '}')?;
                MessageBody::SendFileAbort {
                    file: FileRef {
                        owner,
                        hash,
                        name: name.to_string(),
                    },
                }
            }
            MessageType::Client => {
                let (client, rest) = raw_field(payload, '(', ')')?;
                let (logon_delta_ms, rest) = field::<u64>(rest, '[', ']')?;
                let (os, rest) = raw_field(rest, '{', '}')?;
                let (private_port, _) = field::<u16>(rest, '<', '>')?;
                MessageBody::Client {
                    client: client.to_string(),
                    logon_delta_ms,
                    os: os.to_string(),
                    private_port,
                }
            }
            MessageType::PrivMsg => {
                let (recipient, rest) = field::<UserCode>(payload, '(', ')')?;
                let (color, text) = field::<i32>(rest, '[', ']')?;
                MessageBody::PrivMsg {
                    recipient,
                    color,
                    text: text.to_string(),
                }
            }
        };
        Ok(body)
    }
}

/// 통합 메시지
///
/// 파싱 후에는 변경하지 않음
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// 보낸 사용자 코드
    pub user_code: UserCode,

    /// 보낸 사용자 닉네임
    pub nick: String,

    pub body: MessageBody,
}

impl Message {
    pub fn new(user_code: UserCode, nick: impl Into<String>, body: MessageBody) -> Self {
        Self {
            user_code,
            nick: nick.into(),
            body,
        }
    }

    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        self.body.msg_type()
    }

    /// 한 줄 텍스트로 직렬화 (개행 없음)
    pub fn encode(&self) -> String {
        format!(
            "{}!{}#{}:{}",
            self.user_code,
            self.msg_type(),
            clean_field(&self.nick, ':'),
            self.body.encode_payload()
        )
    }

    /// 텍스트에서 역직렬화
    ///
    /// 형식이 틀리면 `Error::MalformedMessage` (호출자는 버림)
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\n').unwrap_or(line);
        let line = line.strip_suffix('\r').unwrap_or(line);

        let (code, rest) = line
            .split_once('!')
            .ok_or_else(|| malformed("'!' 구분자 없음", line))?;
        let user_code = code
            .parse::<UserCode>()
            .map_err(|_| malformed("사용자 코드가 숫자가 아님", line))?;

        let (type_str, rest) = rest
            .split_once('#')
            .ok_or_else(|| malformed("'#' 구분자 없음", line))?;
        let msg_type = type_str.parse::<MessageType>()?;

        let (nick, payload) = rest
            .split_once(':')
            .ok_or_else(|| malformed("':' 구분자 없음", line))?;

        let body = MessageBody::decode_payload(msg_type, payload)?;

        Ok(Self {
            user_code,
            nick: nick.to_string(),
            body,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn malformed(reason: &str, line: &str) -> Error {
    let preview: String = line.chars().take(64).collect();
    Error::MalformedMessage(format!("{}: {:?}", reason, preview))
}

/// 제어 문자 제거
fn clean(text: &str) -> String {
    text.chars().filter(|c| !c.is_control()).collect()
}

/// 제어 문자와 필드 종료 문자 제거
fn clean_field(text: &str, terminator: char) -> String {
    text.chars()
        .filter(|c| !c.is_control() && *c != terminator)
        .collect()
}

/// `open..close` 하위 필드를 잘라내고 나머지 반환
fn raw_field(s: &str, open: char, close: char) -> Result<(&str, &str)> {
    let inner = s
        .strip_prefix(open)
        .ok_or_else(|| malformed(&format!("'{}' 필드 없음", open), s))?;
    let end = inner
        .find(close)
        .ok_or_else(|| malformed(&format!("'{}' 닫힘 없음", close), s))?;
    Ok((&inner[..end], &inner[end + close.len_utf8()..]))
}

/// 숫자 하위 필드 파싱
fn field<T: FromStr>(s: &str, open: char, close: char) -> Result<(T, &str)> {
    let (raw, rest) = raw_field(s, open, close)?;
    let value = raw
        .parse::<T>()
        .map_err(|_| malformed(&format!("'{}' 필드가 숫자가 아님", open), s))?;
    Ok((value, rest))
}
