//! 채팅 노드
//!
//! 네트워크 하위 시스템 전체의 시작/정지와 인터페이스 장애 조치.
//!
//! - 수신 태스크들(멀티캐스트, TCP)은 명령 채널로 메인 태스크에 전달
//! - 메인 태스크 하나가 채널을 비우며 처리 (같은 피어의 메시지는 도착 순서대로)
//! - IDLE 타이머와 네트워크 감시 타이머도 같은 채널 사용

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::controller::SessionController;
use crate::dedup::{Deduplicator, Origin};
use crate::event::{ChatEvent, EventBus};
use crate::interfaces::{InterfaceChange, InterfaceManager, NicInfo};
use crate::message::Message;
use crate::outbox::{Action, Outgoing, Route};
use crate::tcp::{TcpEvent, TcpHub};
use crate::topic::Topic;
use crate::transfer::{TransferId, TransferInfo, TransferManager};
use crate::transport::{DatagramHandler, MulticastTransport};
use crate::user::{User, UserCode};
use crate::{Config, Error, Result};

/// 메인 태스크 명령
#[derive(Debug, Clone)]
enum NodeCmd {
    Datagram { text: String, ip: IpAddr },
    Tcp(TcpEvent),
    IdleTick,
    CheckNetwork,
    /// 외부에서 알려준 인터페이스 목록 반영
    Interfaces(Vec<NicInfo>),
    Stop,
}

/// 노드 공유 상태
struct NodeInner {
    config: Config,
    events: EventBus,
    controller: SessionController,
    transfers: TransferManager,
    dedup: Deduplicator,
    interfaces: InterfaceManager,
    transport: RwLock<Option<Arc<MulticastTransport>>>,
    tcp: RwLock<Option<Arc<TcpHub>>>,
    /// 네트워크가 사라질 때 로그온 상태였음 (복구 시 다시 로그온)
    relogon: AtomicBool,
}

impl NodeInner {
    fn transport(&self) -> Option<Arc<MulticastTransport>> {
        self.transport.read().clone()
    }

    fn tcp(&self) -> Option<Arc<TcpHub>> {
        self.tcp.read().clone()
    }

    /// 컨트롤러/전송 엔진이 요청한 동작 실행
    async fn dispatch(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(out) => {
                    if let Err(e) = self.send(&out).await {
                        debug!("{} 전송 실패: {}", out.message.msg_type(), e);
                    }
                }
                Action::ConnectTcp { code, addr } => {
                    let Some(tcp) = self.tcp() else {
                        continue;
                    };
                    if tcp.is_connected(code) {
                        continue;
                    }
                    let hello = self.controller.client_message().encode();
                    tokio::spawn(async move {
                        debug!("TCP 연결 시도: {} ({})", code, addr);
                        if let Err(e) = tcp.connect(code, addr, hello).await {
                            warn!("TCP 연결 실패: {} ({}): {}", code, addr, e);
                        }
                    });
                }
                Action::DropPeer(code) => {
                    if let Some(tcp) = self.tcp() {
                        tcp.disconnect(code);
                    }
                    let failed = self.transfers.abort_for_peer(code);
                    if failed > 0 {
                        info!("피어 {} 퇴장으로 파일 전송 {}건 중단", code, failed);
                    }
                }
            }
        }
    }

    async fn send(&self, out: &Outgoing) -> Result<()> {
        let text = out.message.encode();
        match out.route {
            Route::Multicast => {
                if let Some(tcp) = self.tcp() {
                    tcp.broadcast(&text);
                }
                let transport = self.transport().ok_or(Error::NotRunning)?;
                transport.send_multicast(&text).await
            }
            Route::Direct { code, ip } => {
                if let Some(tcp) = self.tcp() {
                    if tcp.is_connected(code) && tcp.send(code, &text).is_ok() {
                        return Ok(());
                    }
                }
                let transport = self.transport().ok_or(Error::NotRunning)?;
                let ip = ip.ok_or(Error::UnknownUser(code))?;
                transport.send_unicast(&text, ip, transport.group().port()).await
            }
        }
    }

    async fn on_datagram(self: &Arc<Self>, text: &str, ip: IpAddr) {
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match Message::decode(line) {
                Ok(msg) => self.process(msg, Origin::Multicast, Some(ip)).await,
                Err(e) => debug!("데이터그램 무시 ({}): {}", ip, e),
            }
        }
    }

    async fn on_tcp(self: &Arc<Self>, event: TcpEvent) {
        match event {
            TcpEvent::Opened { code, .. } => self.controller.set_tcp_enabled(code, true),
            TcpEvent::Closed { code } => self.controller.set_tcp_enabled(code, false),
            TcpEvent::Line { text, ip } => {
                let msg = match Message::decode(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        debug!("TCP 줄 무시 ({}): {}", ip, e);
                        return;
                    }
                };
                let code = msg.user_code;
                self.process(msg, Origin::Tcp, Some(ip)).await;

                // 받은 연결은 피어 등록 전에 열릴 수 있음
                if self.tcp().map_or(false, |tcp| tcp.is_connected(code)) {
                    self.controller.set_tcp_enabled(code, true);
                }
            }
        }
    }

    /// 중복 제거 후 컨트롤러나 전송 엔진으로 전달
    async fn process(self: &Arc<Self>, msg: Message, origin: Origin, ip: Option<IpAddr>) {
        let sender = self.controller.user(msg.user_code);
        if !self.dedup.should_forward(&msg, origin, sender.as_ref()) {
            return;
        }

        let actions = if msg.msg_type().is_file_transfer() {
            if sender.as_ref().map_or(false, |u| u.is_me) {
                return;
            }
            self.transfers.handle_message(&msg, sender.as_ref(), ip)
        } else {
            self.controller.handle(&msg, ip)
        };
        self.dispatch(actions).await;
    }

    /// 멀티캐스트 전송 계층 (재)시작
    async fn start_transport(
        self: &Arc<Self>,
        nics: &[NicInfo],
        cmd_tx: &mpsc::UnboundedSender<NodeCmd>,
    ) -> Result<()> {
        let old = self.transport.write().take();
        if let Some(old) = old {
            old.stop().await;
        }

        let transport =
            MulticastTransport::start(&self.config, nics, datagram_handler(cmd_tx.clone())).await?;
        let names = transport.interfaces().into_iter().map(|n| n.name).collect();

        *self.transport.write() = Some(Arc::new(transport));
        self.controller.set_local_ips(self.interfaces.local_ips());
        self.events.emit(ChatEvent::NetworkUp { interfaces: names });
        Ok(())
    }

    async fn network_lost(self: &Arc<Self>, reason: String) {
        error!("네트워크 사용 불가: {}", reason);
        let old = self.transport.write().take();
        if let Some(old) = old {
            old.stop().await;
        }

        if self.controller.is_logged_on() {
            self.relogon.store(true, Ordering::SeqCst);
            if let Ok(actions) = self.controller.log_off() {
                // 보낼 수 없으므로 정리 동작만 실행
                let cleanup = actions
                    .into_iter()
                    .filter(|a| matches!(a, Action::DropPeer(_)))
                    .collect();
                self.dispatch(cleanup).await;
            }
        }
        self.events.emit(ChatEvent::NetworkLost { reason });
    }

    /// 인터페이스 재검사 (장애 조치)
    ///
    /// `candidates`가 없으면 시스템을 다시 조회
    async fn check_network(
        self: &Arc<Self>,
        candidates: Option<Vec<NicInfo>>,
        cmd_tx: &mpsc::UnboundedSender<NodeCmd>,
    ) {
        let change = match candidates {
            Some(nics) => self.interfaces.refresh_from(&nics),
            None => self.interfaces.refresh(),
        };
        match change {
            InterfaceChange::Unchanged => {}
            InterfaceChange::Lost => {
                self.network_lost("사용 가능한 네트워크 인터페이스 없음".into())
                    .await
            }
            InterfaceChange::Changed(nics) => {
                info!("인터페이스 변경 감지, 전송 계층 재시작");
                if let Err(e) = self.start_transport(&nics, cmd_tx).await {
                    self.network_lost(e.to_string()).await;
                    return;
                }
                if self.relogon.swap(false, Ordering::SeqCst) {
                    info!("네트워크 복구, 다시 로그온");
                    match self.controller.log_on() {
                        Ok(actions) => self.dispatch(actions).await,
                        Err(e) => warn!("재로그온 실패: {}", e),
                    }
                }
            }
        }
    }
}

fn datagram_handler(cmd_tx: mpsc::UnboundedSender<NodeCmd>) -> DatagramHandler {
    Arc::new(move |text, ip| {
        let _ = cmd_tx.send(NodeCmd::Datagram { text, ip });
    })
}

/// 주기 명령 타이머
fn spawn_ticker(
    period_ms: u64,
    cmd: NodeCmd,
    cmd_tx: mpsc::UnboundedSender<NodeCmd>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if cmd_tx.send(cmd.clone()).is_err() {
                        break;
                    }
                }
            }
        }
    })
}

/// 실행 중 태스크 핸들
struct Running {
    cmd_tx: mpsc::UnboundedSender<NodeCmd>,
    main_task: JoinHandle<()>,
    timers: Vec<JoinHandle<()>>,
    timer_shutdown: watch::Sender<bool>,
}

/// 채팅 노드
pub struct ChatNode {
    inner: Arc<NodeInner>,
    running: Mutex<Option<Running>>,
}

impl ChatNode {
    /// 설정 검증 후 노드 생성 (네트워크는 start에서 시작)
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let events = EventBus::new();

        let inner = NodeInner {
            controller: SessionController::new(config.clone(), events.clone()),
            transfers: TransferManager::new(&config, events.clone()),
            dedup: Deduplicator::new(),
            interfaces: InterfaceManager::new(config.interface.clone()),
            transport: RwLock::new(None),
            tcp: RwLock::new(None),
            relogon: AtomicBool::new(false),
            events,
            config,
        };

        Ok(Self {
            inner: Arc::new(inner),
            running: Mutex::new(None),
        })
    }

    /// 이벤트 구독
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// 네트워크 시작 후 로그온
    ///
    /// 사용 가능한 인터페이스가 없으면 NetworkLost를 한 번 알리고 에러 반환
    pub async fn start(&self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        let inner = &self.inner;
        let config = &inner.config;

        let nics = match inner.interfaces.select() {
            Ok(nics) => nics,
            Err(e) => {
                inner.events.emit(ChatEvent::NetworkLost {
                    reason: e.to_string(),
                });
                return Err(e);
            }
        };

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<NodeCmd>();

        if let Err(e) = inner.start_transport(&nics, &cmd_tx).await {
            inner.events.emit(ChatEvent::NetworkLost {
                reason: e.to_string(),
            });
            return Err(e);
        }

        // TCP 개인 연결 (실패해도 멀티캐스트만으로 동작)
        if config.tcp_enabled {
            let (tcp_tx, mut tcp_rx) = mpsc::unbounded_channel();
            match TcpHub::start(config.private_port, tcp_tx).await {
                Ok(hub) => {
                    inner.controller.set_private_port(Some(hub.local_port()));
                    *inner.tcp.write() = Some(Arc::new(hub));

                    let cmd_tx_tcp = cmd_tx.clone();
                    tokio::spawn(async move {
                        while let Some(event) = tcp_rx.recv().await {
                            if cmd_tx_tcp.send(NodeCmd::Tcp(event)).is_err() {
                                break;
                            }
                        }
                    });
                }
                Err(e) => {
                    warn!("TCP 개인 연결 비활성 (포트 {}): {}", config.private_port, e);
                    inner.controller.set_private_port(None);
                }
            }
        }

        // 타이머 태스크
        let (timer_shutdown, timer_rx) = watch::channel(false);
        let timers = vec![
            spawn_ticker(
                config.idle_interval_ms,
                NodeCmd::IdleTick,
                cmd_tx.clone(),
                timer_rx.clone(),
            ),
            spawn_ticker(
                config.network_check_interval_ms,
                NodeCmd::CheckNetwork,
                cmd_tx.clone(),
                timer_rx,
            ),
        ];

        // 메인 처리 태스크
        let inner_main = inner.clone();
        let cmd_tx_main = cmd_tx.clone();
        let main_task = tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    NodeCmd::Datagram { text, ip } => inner_main.on_datagram(&text, ip).await,
                    NodeCmd::Tcp(event) => inner_main.on_tcp(event).await,
                    NodeCmd::IdleTick => {
                        let actions = inner_main.controller.idle_tick();
                        inner_main.dispatch(actions).await;
                    }
                    NodeCmd::CheckNetwork => inner_main.check_network(None, &cmd_tx_main).await,
                    NodeCmd::Interfaces(nics) => {
                        inner_main.check_network(Some(nics), &cmd_tx_main).await
                    }
                    NodeCmd::Stop => break,
                }
            }
            debug!("노드 메인 태스크 종료");
        });

        *self.running.lock() = Some(Running {
            cmd_tx,
            main_task,
            timers,
            timer_shutdown,
        });

        let me = inner.controller.me();
        info!("노드 시작: {} ({})", me.nick, me.code);

        let actions = inner.controller.log_on()?;
        inner.dispatch(actions).await;
        Ok(())
    }

    /// 로그오프 후 모든 태스크와 소켓 정리
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        let inner = &self.inner;

        // 피어 정리 전에 열린 전송부터 중단 통보
        let aborts = inner.transfers.shutdown(&inner.controller.me());
        inner.dispatch(aborts).await;
        if let Ok(actions) = inner.controller.log_off() {
            inner.dispatch(actions).await;
        }
        inner.relogon.store(false, Ordering::SeqCst);

        let _ = running.timer_shutdown.send(true);
        for timer in running.timers {
            let _ = timer.await;
        }
        let _ = running.cmd_tx.send(NodeCmd::Stop);
        let _ = running.main_task.await;

        let tcp = inner.tcp.write().take();
        if let Some(tcp) = tcp {
            tcp.stop().await;
        }
        inner.controller.set_private_port(None);
        let transport = inner.transport.write().take();
        if let Some(transport) = transport {
            transport.stop().await;
        }
        info!("노드 정지");
    }

    /// 인터페이스 목록 직접 반영
    ///
    /// OS 변경 알림을 따로 받는 경우 재검사 주기를 기다리지 않고 장애 조치.
    /// 메인 태스크에서 처리되므로 반환 시점에는 아직 반영 전일 수 있음
    pub fn update_interfaces(&self, candidates: Vec<NicInfo>) -> Result<()> {
        let guard = self.running.lock();
        let Some(running) = guard.as_ref() else {
            return Err(Error::NotRunning);
        };
        running
            .cmd_tx
            .send(NodeCmd::Interfaces(candidates))
            .map_err(|_| Error::NotRunning)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(Error::NotRunning)
        }
    }

    async fn run(&self, actions: Result<Vec<Action>>) -> Result<()> {
        let actions = actions?;
        self.inner.dispatch(actions).await;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════
    // 채팅 동작
    // ═══════════════════════════════════════════════════════════════

    /// 다시 로그온 (log_off 이후)
    pub async fn log_on(&self) -> Result<()> {
        self.ensure_running()?;
        self.run(self.inner.controller.log_on()).await
    }

    /// 네트워크는 유지한 채 로그오프
    pub async fn log_off(&self) -> Result<()> {
        self.ensure_running()?;
        self.run(self.inner.controller.log_off()).await
    }

    pub async fn send_chat(&self, text: &str, color: i32) -> Result<()> {
        self.ensure_running()?;
        self.run(self.inner.controller.send_chat(text, color)).await
    }

    pub async fn send_private(&self, code: UserCode, text: &str, color: i32) -> Result<()> {
        self.ensure_running()?;
        self.run(self.inner.controller.send_private(code, text, color))
            .await
    }

    pub async fn change_nick(&self, nick: &str) -> Result<()> {
        self.run(self.inner.controller.change_nick(nick)).await
    }

    pub async fn go_away(&self, reason: &str) -> Result<()> {
        self.run(self.inner.controller.go_away(reason)).await
    }

    pub async fn come_back(&self) -> Result<()> {
        self.run(self.inner.controller.come_back()).await
    }

    pub async fn set_writing(&self, writing: bool) -> Result<()> {
        self.run(self.inner.controller.set_writing(writing)).await
    }

    pub async fn change_topic(&self, text: &str) -> Result<()> {
        self.ensure_running()?;
        self.run(self.inner.controller.change_topic(text)).await
    }

    pub async fn request_topic(&self) -> Result<()> {
        self.ensure_running()?;
        self.run(self.inner.controller.request_topic()).await
    }

    /// 개인 메시지 읽음 표시
    pub fn mark_read(&self, code: UserCode) {
        self.inner.controller.clear_new_message(code);
    }

    // ═══════════════════════════════════════════════════════════════
    // 파일 전송
    // ═══════════════════════════════════════════════════════════════

    /// 파일 제안
    pub async fn offer_file<R>(
        &self,
        code: UserCode,
        name: &str,
        size: u64,
        source: R,
    ) -> Result<TransferId>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.ensure_running()?;
        let peer = self.inner.controller.user(code).ok_or(Error::UnknownUser(code))?;
        let me = self.inner.controller.me();
        let (id, actions) = self.inner.transfers.offer(&me, &peer, name, size, source)?;
        self.inner.dispatch(actions).await;
        Ok(id)
    }

    pub async fn accept_file<W>(&self, id: TransferId, sink: W) -> Result<()>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.ensure_running()?;
        let me = self.inner.controller.me();
        let actions = self.inner.transfers.accept(&me, id, sink).await?;
        self.inner.dispatch(actions).await;
        Ok(())
    }

    pub async fn reject_file(&self, id: TransferId) -> Result<()> {
        let me = self.inner.controller.me();
        self.run(self.inner.transfers.reject(&me, id)).await
    }

    pub async fn cancel_file(&self, id: TransferId) -> Result<()> {
        let me = self.inner.controller.me();
        self.run(self.inner.transfers.cancel(&me, id)).await
    }

    pub fn transfer(&self, id: TransferId) -> Option<TransferInfo> {
        self.inner.transfers.get(id)
    }

    pub fn transfers(&self) -> Vec<TransferInfo> {
        self.inner.transfers.list()
    }

    pub fn remove_finished_transfers(&self) -> usize {
        self.inner.transfers.remove_finished()
    }

    // ═══════════════════════════════════════════════════════════════
    // 조회
    // ═══════════════════════════════════════════════════════════════

    pub fn me(&self) -> User {
        self.inner.controller.me()
    }

    pub fn user(&self, code: UserCode) -> Option<User> {
        self.inner.controller.user(code)
    }

    pub fn user_by_nick(&self, nick: &str) -> Option<User> {
        self.inner.controller.user_by_nick(nick)
    }

    pub fn users(&self) -> Vec<User> {
        self.inner.controller.users()
    }

    pub fn topic(&self) -> Topic {
        self.inner.controller.topic()
    }

    pub fn is_logged_on(&self) -> bool {
        self.inner.controller.is_logged_on()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// 현재 멀티캐스트 인터페이스
    pub fn interfaces(&self) -> Vec<NicInfo> {
        self.inner.interfaces.active()
    }

    /// 중복 제거로 버린 멀티캐스트 사본 수
    pub fn suppressed_duplicates(&self) -> u64 {
        self.inner.dedup.suppressed_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config::new("has space");
        assert!(matches!(ChatNode::new(config), Err(Error::InvalidNick(_))));
    }

    #[tokio::test]
    async fn test_operations_before_start() {
        let node = ChatNode::new(Config::loopback_test()).unwrap();
        assert!(!node.is_running());
        assert!(matches!(node.send_chat("hi", 0).await, Err(Error::NotRunning)));
        assert!(matches!(node.change_topic("t").await, Err(Error::NotRunning)));

        // 로컬 상태 변경은 시작 전에도 가능
        node.change_nick("Renamed").await.unwrap();
        assert_eq!(node.me().nick, "Renamed");
        assert_eq!(node.users().len(), 1);

        // 정지는 여러 번 호출해도 안전
        node.stop().await;
        node.stop().await;
    }

    const BOB: UserCode = 22_222_222;

    fn bob_ip() -> Option<IpAddr> {
        Some(IpAddr::V4(std::net::Ipv4Addr::new(192, 168, 1, 20)))
    }

    #[tokio::test]
    async fn test_tcp_copy_wins_over_multicast() {
        let node = ChatNode::new(Config::loopback_test()).unwrap();
        let events = node.subscribe();
        let inner = node.inner.clone();
        inner.controller.log_on().unwrap();

        let logon = Message::new(BOB, "bob", MessageBody::Logon);
        inner.process(logon, Origin::Multicast, bob_ip()).await;
        assert!(node.user(BOB).is_some());

        let chat = Message::new(
            BOB,
            "bob",
            MessageBody::Msg {
                color: 0,
                text: "once".into(),
            },
        );

        // TCP 연결 전에는 멀티캐스트 사본도 통과
        inner.process(chat.clone(), Origin::Multicast, bob_ip()).await;
        assert_eq!(node.suppressed_duplicates(), 0);

        inner.controller.set_tcp_enabled(BOB, true);
        let _ = events.try_iter().count();

        inner.process(chat.clone(), Origin::Tcp, bob_ip()).await;
        inner.process(chat, Origin::Multicast, bob_ip()).await;

        let arrived = events
            .try_iter()
            .filter(|e| matches!(e, ChatEvent::MessageArrived { .. }))
            .count();
        assert_eq!(arrived, 1);
        assert_eq!(node.suppressed_duplicates(), 1);
    }

    #[tokio::test]
    async fn test_interface_loss_reported_once() {
        let config = Config::loopback_test().with_interface("127.0.0.1");
        let node = ChatNode::new(config).unwrap();
        let events = node.subscribe();
        let inner = node.inner.clone();
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();

        inner
            .interfaces
            .apply(Ok(vec![NicInfo::new("lo", std::net::Ipv4Addr::LOCALHOST)]));
        inner.controller.log_on().unwrap();
        inner.controller.handle(&Message::new(BOB, "bob", MessageBody::Logon), bob_ip());

        inner.check_network(Some(Vec::new()), &cmd_tx).await;
        inner.check_network(Some(Vec::new()), &cmd_tx).await;

        let lost = events
            .try_iter()
            .filter(|e| matches!(e, ChatEvent::NetworkLost { .. }))
            .count();
        assert_eq!(lost, 1);
        assert!(!node.is_logged_on());
        assert!(node.user(BOB).is_none());
        assert!(inner.relogon.load(Ordering::SeqCst));
        assert!(node.interfaces().is_empty());
    }

    #[tokio::test]
    async fn test_update_interfaces_requires_running() {
        let node = ChatNode::new(Config::loopback_test()).unwrap();
        assert!(matches!(
            node.update_interfaces(Vec::new()),
            Err(Error::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_missing_interface_reports_network_lost() {
        let config = Config::loopback_test().with_interface("no-such-nic0");
        let node = ChatNode::new(config).unwrap();
        let events = node.subscribe();

        let result = node.start().await;
        assert!(matches!(result, Err(Error::InterfaceNotFound(_))));
        assert!(!node.is_running());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, ChatEvent::NetworkLost { .. })));
    }
}
