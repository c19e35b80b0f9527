//! 세션 컨트롤러
//!
//! - 사용자 레지스트리와 주제 소유
//! - 수신 메시지를 상태에 반영하고 이벤트 발행
//! - 로컬 사용자 동작을 출력 메시지로 변환
//!
//! 수신 경로와 IDLE 타이머가 동시에 호출하므로 모든 상태는 락 하나 아래에 있음.
//! 네트워크 I/O는 하지 않고 `Action` 목록만 돌려줌

use std::net::{IpAddr, SocketAddr};

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::event::{ChatEvent, EventBus};
use crate::message::{Message, MessageBody, MessageType};
use crate::outbox::Action;
use crate::registry::UserRegistry;
use crate::topic::Topic;
use crate::user::{generate_code, is_valid_nick, regenerate_code, User, UserCode};
use crate::{now_millis, Config, Error, Result};

/// 락으로 보호되는 세션 상태
struct SessionState {
    registry: UserRegistry,
    topic: Topic,
    me: UserCode,
    logged_on: bool,
    /// 내 LOGON 에코 수신 여부
    logon_confirmed: bool,
    /// 내 인터페이스 주소 (코드 충돌 판별용)
    local_ips: Vec<IpAddr>,
}

impl SessionState {
    fn me(&self) -> &User {
        // 레지스트리에서 내 항목은 제거되지 않음
        self.registry
            .get(self.me)
            .unwrap_or_else(|| unreachable!("레지스트리에 내 사용자 없음"))
    }

    /// 내 이름으로 메시지 생성
    fn from_me(&self, body: MessageBody) -> Message {
        Message::new(self.me, self.me().nick.clone(), body)
    }

    /// 다른 사용자와 겹치지 않는 닉네임 결정
    ///
    /// 유효하지 않거나 이미 쓰이는 닉네임이면 코드 문자열 사용
    fn resolve_nick(&self, code: UserCode, wanted: &str) -> String {
        if is_valid_nick(wanted) && !self.registry.nick_in_use(wanted, Some(code)) {
            wanted.to_string()
        } else {
            code.to_string()
        }
    }
}

/// 세션 컨트롤러
pub struct SessionController {
    config: Config,
    state: Mutex<SessionState>,
    events: EventBus,
}

impl SessionController {
    /// 무작위 사용자 코드로 생성
    pub fn new(config: Config, events: EventBus) -> Self {
        Self::with_code(config, events, generate_code())
    }

    /// 지정한 사용자 코드로 생성
    pub fn with_code(config: Config, events: EventBus, code: UserCode) -> Self {
        let mut registry = UserRegistry::new();
        registry.add(User::new_me(code, config.nick.clone(), now_millis()));

        Self {
            config,
            state: Mutex::new(SessionState {
                registry,
                topic: Topic::default(),
                me: code,
                logged_on: false,
                logon_confirmed: false,
                local_ips: Vec::new(),
            }),
            events,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // 조회
    // ═══════════════════════════════════════════════════════════════

    pub fn me(&self) -> User {
        self.state.lock().me().clone()
    }

    pub fn me_code(&self) -> UserCode {
        self.state.lock().me
    }

    pub fn user(&self, code: UserCode) -> Option<User> {
        self.state.lock().registry.get(code).cloned()
    }

    pub fn user_by_nick(&self, nick: &str) -> Option<User> {
        self.state.lock().registry.get_by_nick(nick).cloned()
    }

    /// 레지스트리 스냅샷 (나 포함)
    pub fn users(&self) -> Vec<User> {
        self.state.lock().registry.snapshot()
    }

    pub fn topic(&self) -> Topic {
        self.state.lock().topic.clone()
    }

    pub fn is_logged_on(&self) -> bool {
        self.state.lock().logged_on
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ═══════════════════════════════════════════════════════════════
    // 노드에서 설정
    // ═══════════════════════════════════════════════════════════════

    pub fn set_local_ips(&self, ips: Vec<IpAddr>) {
        let mut state = self.state.lock();
        let me = state.me;
        state.registry.update(me, |u| u.ip = ips.first().copied());
        state.local_ips = ips;
    }

    /// TCP 개인 연결 포트 광고 값
    pub fn set_private_port(&self, port: Option<u16>) {
        let mut state = self.state.lock();
        let me = state.me;
        state.registry.update(me, |u| {
            u.private_port = port;
            u.tcp_enabled = port.is_some();
        });
    }

    /// 피어와의 TCP 연결 상태 변경
    pub fn set_tcp_enabled(&self, code: UserCode, enabled: bool) {
        let mut state = self.state.lock();
        if code == state.me {
            return;
        }
        let changed = state
            .registry
            .get(code)
            .map_or(false, |u| u.tcp_enabled != enabled);
        if !changed {
            return;
        }
        if let Some(user) = state.registry.update(code, |u| u.tcp_enabled = enabled) {
            debug!("TCP 상태 변경: {} tcp={}", user.nick, enabled);
            self.events.emit(ChatEvent::UserChanged(user));
        }
    }

    /// 개인 메시지 읽음 표시
    pub fn clear_new_message(&self, code: UserCode) {
        let mut state = self.state.lock();
        if let Some(user) = state.registry.update(code, |u| u.new_message = false) {
            self.events.emit(ChatEvent::UserChanged(user));
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // 로컬 사용자 동작
    // ═══════════════════════════════════════════════════════════════

    /// 로그온: LOGON, EXPOSE, GETTOPIC, CLIENT 전송
    pub fn log_on(&self) -> Result<Vec<Action>> {
        let mut state = self.state.lock();
        if state.logged_on {
            return Ok(Vec::new());
        }
        let now = now_millis();
        let me = state.me;
        state.registry.update(me, |u| {
            u.logon_time = now;
            u.last_idle = now;
        });
        state.logged_on = true;
        state.logon_confirmed = false;

        info!("로그온: {} ({})", state.me().nick, me);

        Ok(vec![
            Action::multicast(state.from_me(MessageBody::Logon)),
            Action::multicast(state.from_me(MessageBody::Expose)),
            Action::multicast(state.from_me(MessageBody::GetTopic)),
            Action::multicast(self.client_message_locked(&state, now)),
        ])
    }

    /// 로그오프: LOGOFF 전송 후 다른 사용자 목록 비움
    pub fn log_off(&self) -> Result<Vec<Action>> {
        let mut state = self.state.lock();
        if !state.logged_on {
            return Ok(Vec::new());
        }
        state.logged_on = false;
        state.logon_confirmed = false;
        let logoff = state.from_me(MessageBody::Logoff);

        let me = state.me;
        let removed = state.registry.remove_where(|u| u.code != me);
        info!("로그오프: 사용자 {}명 목록에서 제거", removed.len());

        let mut actions = vec![Action::multicast(logoff)];
        actions.extend(removed.iter().map(|u| Action::DropPeer(u.code)));
        Ok(actions)
    }

    /// 내 닉네임 변경
    pub fn change_nick(&self, nick: &str) -> Result<Vec<Action>> {
        if !is_valid_nick(nick) {
            return Err(Error::InvalidNick(nick.to_string()));
        }
        let mut state = self.state.lock();
        let me = state.me;
        let old = state.me().nick.clone();
        if old == nick {
            return Ok(Vec::new());
        }
        if !state.registry.rename(me, nick) {
            return Err(Error::NickInUse(nick.to_string()));
        }

        self.events.emit(ChatEvent::NickChanged {
            code: me,
            old,
            new: nick.to_string(),
        });

        if state.logged_on {
            Ok(vec![Action::multicast(state.from_me(MessageBody::Nick))])
        } else {
            Ok(Vec::new())
        }
    }

    /// 자리 비움
    pub fn go_away(&self, reason: &str) -> Result<Vec<Action>> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::EmptyMessage);
        }
        let mut state = self.state.lock();
        let away = state.from_me(MessageBody::Away {
            reason: reason.to_string(),
        });
        self.check_size(&away)?;

        let me = state.me;
        let was_writing = state.me().writing;
        if let Some(user) = state.registry.update(me, |u| {
            u.away = true;
            u.away_reason = reason.to_string();
            u.writing = false;
        }) {
            if was_writing {
                self.events.emit(ChatEvent::WritingChanged(user.clone()));
            }
            self.events.emit(ChatEvent::AwayChanged(user));
        }

        if !state.logged_on {
            return Ok(Vec::new());
        }
        let mut actions = Vec::with_capacity(2);
        if was_writing {
            actions.push(Action::multicast(state.from_me(MessageBody::StoppedWriting)));
        }
        actions.push(Action::multicast(away));
        Ok(actions)
    }

    /// 자리 복귀
    pub fn come_back(&self) -> Result<Vec<Action>> {
        let mut state = self.state.lock();
        if !state.me().away {
            return Ok(Vec::new());
        }
        let me = state.me;
        if let Some(user) = state.registry.update(me, |u| {
            u.away = false;
            u.away_reason.clear();
        }) {
            self.events.emit(ChatEvent::AwayChanged(user));
        }

        if !state.logged_on {
            return Ok(Vec::new());
        }
        Ok(vec![Action::multicast(state.from_me(MessageBody::Back))])
    }

    /// 입력 중 상태 변경
    pub fn set_writing(&self, writing: bool) -> Result<Vec<Action>> {
        let mut state = self.state.lock();
        if state.me().writing == writing || (writing && state.me().away) {
            return Ok(Vec::new());
        }
        let me = state.me;
        if let Some(user) = state.registry.update(me, |u| u.writing = writing) {
            self.events.emit(ChatEvent::WritingChanged(user));
        }

        if !state.logged_on {
            return Ok(Vec::new());
        }
        let body = if writing {
            MessageBody::Writing
        } else {
            MessageBody::StoppedWriting
        };
        Ok(vec![Action::multicast(state.from_me(body))])
    }

    /// 공개 채팅 메시지
    pub fn send_chat(&self, text: &str, color: i32) -> Result<Vec<Action>> {
        let mut state = self.state.lock();
        Self::check_can_chat(&state, text)?;
        let msg = state.from_me(MessageBody::Msg {
            color,
            text: text.to_string(),
        });
        self.check_size(&msg)?;

        let me = state.me;
        if state.me().writing {
            if let Some(user) = state.registry.update(me, |u| u.writing = false) {
                self.events.emit(ChatEvent::WritingChanged(user));
            }
        }

        Ok(vec![Action::multicast(msg)])
    }

    /// 개인 메시지
    pub fn send_private(&self, code: UserCode, text: &str, color: i32) -> Result<Vec<Action>> {
        let state = self.state.lock();
        Self::check_can_chat(&state, text)?;

        let target = match state.registry.get(code) {
            Some(user) if !user.is_me => user,
            _ => return Err(Error::UnknownUser(code)),
        };

        let msg = state.from_me(MessageBody::PrivMsg {
            recipient: code,
            color,
            text: text.to_string(),
        });
        self.check_size(&msg)?;

        Ok(vec![Action::direct(code, target.ip, msg)])
    }

    /// 주제 변경
    pub fn change_topic(&self, text: &str) -> Result<Vec<Action>> {
        let mut state = self.state.lock();
        if !state.logged_on {
            return Err(Error::NotLoggedOn);
        }
        let timestamp = now_millis().max(state.topic.timestamp + 1);
        let topic = Topic::new(text.trim(), state.me().nick.clone(), timestamp);
        let msg = state.from_me(MessageBody::Topic {
            author: topic.author.clone(),
            timestamp: topic.timestamp,
            text: topic.text.clone(),
        });
        self.check_size(&msg)?;

        state.topic.apply(topic.clone());
        self.events.emit(ChatEvent::TopicChanged(topic));
        Ok(vec![Action::multicast(msg)])
    }

    /// 현재 주제 요청
    pub fn request_topic(&self) -> Result<Vec<Action>> {
        let state = self.state.lock();
        if !state.logged_on {
            return Err(Error::NotLoggedOn);
        }
        Ok(vec![Action::multicast(state.from_me(MessageBody::GetTopic))])
    }

    /// 내 CLIENT 메시지 (TCP 연결 직후 식별용으로도 사용)
    pub fn client_message(&self) -> Message {
        let state = self.state.lock();
        self.client_message_locked(&state, now_millis())
    }

    fn client_message_locked(&self, state: &SessionState, now: u64) -> Message {
        let me = state.me();
        state.from_me(MessageBody::Client {
            client: self.config.client_name.clone(),
            logon_delta_ms: now.saturating_sub(me.logon_time),
            os: std::env::consts::OS.to_string(),
            private_port: me.private_port.unwrap_or(0),
        })
    }

    /// 인코딩한 줄이 데이터그램 한 개에 들어가는지
    ///
    /// 잘린 자유 텍스트는 수신 측에서 정상 메시지로 디코딩되므로 보내기 전에 거부
    fn check_size(&self, msg: &Message) -> Result<()> {
        let len = msg.encode().len();
        let max = self.config.max_datagram_size;
        if len >= max {
            return Err(Error::MessageTooLong { len, max });
        }
        Ok(())
    }

    fn check_can_chat(state: &SessionState, text: &str) -> Result<()> {
        if !state.logged_on {
            return Err(Error::NotLoggedOn);
        }
        if state.me().away {
            return Err(Error::Away);
        }
        if text.trim().is_empty() {
            return Err(Error::EmptyMessage);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // IDLE 타이머
    // ═══════════════════════════════════════════════════════════════

    /// IDLE 브로드캐스트 + 오래된 사용자 제거
    pub fn idle_tick(&self) -> Vec<Action> {
        self.idle_tick_at(now_millis())
    }

    pub fn idle_tick_at(&self, now: u64) -> Vec<Action> {
        let mut state = self.state.lock();
        let mut actions = Vec::new();
        if !state.logged_on {
            return actions;
        }

        let me = state.me;
        state.registry.update(me, |u| u.last_idle = now);
        actions.push(Action::multicast(state.from_me(MessageBody::Idle)));

        let timeout = self.config.idle_timeout_ms;
        let expired = state
            .registry
            .remove_where(|u| !u.is_me && now.saturating_sub(u.last_idle) > timeout);

        for user in expired {
            warn!(
                "사용자 타임아웃: {} ({}), 마지막 IDLE {}ms 전",
                user.nick,
                user.code,
                now.saturating_sub(user.last_idle)
            );
            actions.push(Action::DropPeer(user.code));
            self.events.emit(ChatEvent::UserTimedOut(user));
        }

        actions
    }

    // ═══════════════════════════════════════════════════════════════
    // 수신 메시지 처리
    // ═══════════════════════════════════════════════════════════════

    /// 수신 메시지 적용
    pub fn handle(&self, msg: &Message, ip: Option<IpAddr>) -> Vec<Action> {
        self.handle_at(msg, ip, now_millis())
    }

    pub fn handle_at(&self, msg: &Message, ip: Option<IpAddr>, now: u64) -> Vec<Action> {
        let mut state = self.state.lock();
        let mut actions = Vec::new();

        if msg.user_code == state.me {
            self.on_own_code(&mut state, msg, ip, &mut actions);
            return actions;
        }

        // 로그오프 상태에서는 피어 등록과 닉네임 충돌 판정을 하지 않음
        if !state.logged_on
            && matches!(
                msg.msg_type(),
                MessageType::Logon
                    | MessageType::Exposing
                    | MessageType::Nick
                    | MessageType::NickCrash
                    | MessageType::Client
            )
        {
            trace!("로그오프 상태, {} 무시 ({})", msg.msg_type(), msg.user_code);
            return actions;
        }

        let code = msg.user_code;
        match &msg.body {
            MessageBody::Logon =>self.on_logon(&mut state, msg, ip, now, &mut actions),
            MessageBody::Logoff => {
                if let Some(user) = state.registry.remove(code) {
                    info!("사용자 퇴장: {} ({})", user.nick, code);
                    actions.push(Action::DropPeer(code));
                    self.events.emit(ChatEvent::UserLeft(user));
                }
            }
            MessageBody::Expose => self.on_expose(&state, code, ip, &mut actions),
            MessageBody::Exposing { away_reason } => {
                self.on_exposing(&mut state, msg, away_reason, ip, now)
            }
            MessageBody::Away { reason } => self.set_away(&mut state, code, true, reason),
            MessageBody::Back => self.set_away(&mut state, code, false, ""),
            MessageBody::Writing => self.set_peer_writing(&mut state, code, true),
            MessageBody::StoppedWriting => self.set_peer_writing(&mut state, code, false),
            MessageBody::Nick => self.on_nick(&mut state, msg, ip, &mut actions),
            MessageBody::NickCrash { target } => {
                self.on_nick_crash(&mut state, *target, &mut actions)
            }
            MessageBody::Idle => {
                if state.registry.contains(code) {
                    state.registry.update(code, |u| {
                        u.last_idle = now;
                        if ip.is_some() {
                            u.ip = ip;
                        }
                    });
                } else if state.logged_on {
                    debug!("알 수 없는 사용자의 IDLE: {} ({}), EXPOSE 요청", msg.nick, code);
                    actions.push(Action::multicast(state.from_me(MessageBody::Expose)));
                }
            }
            MessageBody::GetTopic => {
                if state.logged_on && state.topic.is_set() {
                    let topic = state.topic.clone();
                    actions.push(Action::direct(
                        code,
                        ip,
                        state.from_me(MessageBody::Topic {
                            author: topic.author,
                            timestamp: topic.timestamp,
                            text: topic.text,
                        }),
                    ));
                }
                self.events.emit(ChatEvent::TopicRequested { by: code });
            }
            MessageBody::Topic {
                author,
                timestamp,
                text,
            } => {
                let topic = Topic::new(text.clone(), author.clone(), *timestamp);
                if state.topic.apply(topic.clone()) {
                    debug!("주제 변경: {:?} by {}", topic.text, topic.author);
                    self.events.emit(ChatEvent::TopicChanged(topic));
                }
            }
            MessageBody::Client {
                client,
                logon_delta_ms,
                os,
                private_port,
            } => {
                let port = (*private_port > 0).then_some(*private_port);
                let Some(user) = state.registry.update(code, |u| {
                    u.client = client.clone();
                    u.logon_time = now.saturating_sub(*logon_delta_ms);
                    u.os = os.clone();
                    u.private_port = port;
                    if ip.is_some() {
                        u.ip = ip;
                    }
                }) else {
                    return actions;
                };

                if let (Some(port), Some(ip)) = (port, user.ip) {
                    if self.config.tcp_enabled && !user.tcp_enabled && state.me < code {
                        actions.push(Action::ConnectTcp {
                            code,
                            addr: SocketAddr::new(ip, port),
                        });
                    }
                }
                self.events.emit(ChatEvent::UserChanged(user));
            }
            MessageBody::Msg { color, text } => {
                let was_writing = state.registry.get(code).map(|u| u.writing);
                match was_writing {
                    Some(was_writing) => {
                        if let Some(user) = state.registry.update(code, |u| u.writing = false) {
                            if was_writing {
                                self.events.emit(ChatEvent::WritingChanged(user.clone()));
                            }
                            self.events.emit(ChatEvent::MessageArrived {
                                from: user,
                                text: text.clone(),
                                color: *color,
                                private: false,
                            });
                        }
                    }
                    None if state.logged_on => {
                        debug!("알 수 없는 사용자의 MSG: {} ({}), EXPOSE 요청", msg.nick, code);
                        actions.push(Action::multicast(state.from_me(MessageBody::Expose)));
                    }
                    None => {}
                }
            }
            MessageBody::PrivMsg {
                recipient,
                color,
                text,
            } => {
                if *recipient != state.me {
                    return actions;
                }
                if let Some(user) = state.registry.update(code, |u| u.new_message = true) {
                    self.events.emit(ChatEvent::MessageArrived {
                        from: user,
                        text: text.clone(),
                        color: *color,
                        private: true,
                    });
                }
            }
            MessageBody::SendFile { .. }
            | MessageBody::SendFileAccept { .. }
            | MessageBody::SendFileAbort { .. } => {
                debug!("파일 전송 메시지는 전송 엔진에서 처리: {}", msg.msg_type());
            }
        }

        actions
    }

    /// 내 코드로 온 메시지: 에코 또는 코드 충돌
    fn on_own_code(
        &self,
        state: &mut SessionState,
        msg: &Message,
        ip: Option<IpAddr>,
        actions: &mut Vec<Action>,
    ) {
        let foreign_nick = !state.me().has_nick(&msg.nick);
        let foreign_ip = ip.map_or(false, |ip| !state.local_ips.contains(&ip));
        let presence = matches!(
            msg.msg_type(),
            MessageType::Logon | MessageType::Idle | MessageType::Exposing
        );

        if presence && foreign_nick && foreign_ip {
            let old = state.me;
            let mut new = regenerate_code(old);
            while !state.registry.recode(old, new) {
                new = regenerate_code(old);
            }
            state.me = new;
            warn!(
                "사용자 코드 충돌: {} ({}가 사용 중), 새 코드 {}",
                old, msg.nick, new
            );
            self.events.emit(ChatEvent::CodeChanged { old, new });

            if state.logged_on {
                state.logon_confirmed = false;
                actions.push(Action::multicast(state.from_me(MessageBody::Logon)));
                actions.push(Action::multicast(
                    self.client_message_locked(state, now_millis()),
                ));
            }
            return;
        }

        if msg.msg_type() == MessageType::Logon && state.logged_on && !state.logon_confirmed {
            state.logon_confirmed = true;
            info!("로그온 확인됨 (LOGON 에코 수신)");
            self.events.emit(ChatEvent::MeLoggedOn(state.me().clone()));
        }
    }

    fn on_logon(
        &self,
        state: &mut SessionState,
        msg: &Message,
        ip: Option<IpAddr>,
        now: u64,
        actions: &mut Vec<Action>,
    ) {
        let code = msg.user_code;
        if state.registry.contains(code) {
            state.registry.update(code, |u| {
                u.last_idle = now;
                if ip.is_some() {
                    u.ip = ip;
                }
            });
            return;
        }

        let nick = if state.me().has_nick(&msg.nick) {
            // 내 닉네임과 충돌: 상대에게 재설정 요청, 일단 코드로 등록
            warn!("닉네임 충돌: {} ({}), NICKCRASH 전송", msg.nick, code);
            actions.push(Action::multicast(
                state.from_me(MessageBody::NickCrash { target: code }),
            ));
            code.to_string()
        } else {
            state.resolve_nick(code, &msg.nick)
        };

        self.register(state, code, nick, ip, now, None);
    }

    fn on_expose(
        &self,
        state: &SessionState,
        code: UserCode,
        ip: Option<IpAddr>,
        actions: &mut Vec<Action>,
    ) {
        if !state.logged_on {
            return;
        }
        let me = state.me();
        let away_reason = if me.away {
            me.away_reason.clone()
        } else {
            String::new()
        };
        actions.push(Action::direct(
            code,
            ip,
            state.from_me(MessageBody::Exposing { away_reason }),
        ));
        actions.push(Action::direct(
            code,
            ip,
            self.client_message_locked(state, now_millis()),
        ));
        if me.writing {
            actions.push(Action::direct(code, ip, state.from_me(MessageBody::Writing)));
        }
    }

    fn on_exposing(
        &self,
        state: &mut SessionState,
        msg: &Message,
        away_reason: &str,
        ip: Option<IpAddr>,
        now: u64,
    ) {
        let code = msg.user_code;
        if state.registry.contains(code) {
            state.registry.update(code, |u| {
                u.last_idle = now;
                if ip.is_some() {
                    u.ip = ip;
                }
            });
            let away = !away_reason.is_empty();
            self.set_away(state, code, away, away_reason);
            return;
        }

        // 이미 충돌 해결을 거친 피어이므로 NICKCRASH 없이 등록
        let nick = state.resolve_nick(code, &msg.nick);
        self.register(state, code, nick, ip, now, Some(away_reason));
    }

    fn register(
        &self,
        state: &mut SessionState,
        code: UserCode,
        nick: String,
        ip: Option<IpAddr>,
        now: u64,
        away_reason: Option<&str>,
    ) {
        let mut user = User::new(code, nick, now);
        user.ip = ip;
        if let Some(reason) = away_reason.filter(|r| !r.is_empty()) {
            user.away = true;
            user.away_reason = reason.to_string();
        }

        if state.registry.add(user.clone()) {
            info!("사용자 등록: {} ({}) {:?}", user.nick, code, ip);
            self.events.emit(ChatEvent::UserJoined(user));
        } else {
            warn!("사용자 등록 실패 (닉네임 중복): {} ({})", user.nick, code);
        }
    }

    fn set_away(&self, state: &mut SessionState, code: UserCode, away: bool, reason: &str) {
        let changed = state
            .registry
            .get(code)
            .map_or(false, |u| u.away != away || u.away_reason != reason);
        if !changed {
            return;
        }
        if let Some(user) = state.registry.update(code, |u| {
            u.away = away;
            u.away_reason = reason.to_string();
        }) {
            self.events.emit(ChatEvent::AwayChanged(user));
        }
    }

    fn set_peer_writing(&self, state: &mut SessionState, code: UserCode, writing: bool) {
        let changed = state
            .registry
            .get(code)
            .map_or(false, |u| u.writing != writing);
        if !changed {
            return;
        }
        if let Some(user) = state.registry.update(code, |u| u.writing = writing) {
            self.events.emit(ChatEvent::WritingChanged(user));
        }
    }

    fn on_nick(
        &self,
        state: &mut SessionState,
        msg: &Message,
        ip: Option<IpAddr>,
        actions: &mut Vec<Action>,
    ) {
        let code = msg.user_code;
        let Some(old) = state.registry.get(code).map(|u| u.nick.clone()) else {
            return;
        };
        if old == msg.nick {
            return;
        }

        if state.me().has_nick(&msg.nick) {
            warn!("닉네임 변경 충돌: {} → {} ({})", old, msg.nick, code);
            actions.push(Action::direct(
                code,
                ip,
                state.from_me(MessageBody::NickCrash { target: code }),
            ));
            return;
        }

        let new = state.resolve_nick(code, &msg.nick);
        if new == old || !state.registry.rename(code, &new) {
            return;
        }
        info!("닉네임 변경: {} → {} ({})", old, new, code);
        self.events.emit(ChatEvent::NickChanged { code, old, new });
    }

    fn on_nick_crash(&self, state: &mut SessionState, target: UserCode, actions: &mut Vec<Action>) {
        if target != state.me {
            return;
        }
        let me = state.me;
        let old = state.me().nick.clone();
        let new = me.to_string();
        if old == new {
            return;
        }
        if !state.registry.rename(me, &new) {
            warn!("닉네임 재설정 실패: {} 사용 중", new);
            return;
        }

        warn!("내 닉네임 충돌: {} → {}", old, new);
        self.events.emit(ChatEvent::NickCrash {
            old_nick: old,
            new_nick: new,
        });
        if state.logged_on {
            actions.push(Action::multicast(state.from_me(MessageBody::Nick)));
        }
    }
}
