//! 파일 전송 엔진
//!
//! SENDFILE 제안 → 받는 쪽이 임시 TCP 포트를 열고 SENDFILEACCEPT →
//! 보내는 쪽이 연결해서 원시 바이트 스트리밍. SENDFILEABORT로 언제든 중단.
//!
//! 상태 전이는 전송마다 락 하나로 처리하고 종료 상태에서는 벗어나지 않음.
//! 취소와 I/O 태스크가 동시에 끝나도 먼저 들어간 쪽만 반영됨

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::counter::ByteCounter;
use crate::event::{ChatEvent, EventBus};
use crate::message::{FileRef, Message, MessageBody};
use crate::outbox::Action;
use crate::user::{User, UserCode};
use crate::{now_millis, Config, Error, Result};

/// 전송 진행 이벤트 주기
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// 로컬 전송 ID
pub type TransferId = u64;

/// 보낼 파일 데이터
pub type FileSource = Box<dyn AsyncRead + Send + Unpin>;

/// 받은 파일을 쓸 곳
pub type FileSink = Box<dyn AsyncWrite + Send + Unpin>;

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransferState {
    /// 상대 응답 대기
    Waiting,
    Connecting,
    Transferring,
    Completed,
    Failed,
    Aborted,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Aborted
        )
    }

    /// 허용된 전이인지
    pub fn can_move_to(self, to: TransferState) -> bool {
        use TransferState::*;
        matches!(
            (self, to),
            (Waiting, Connecting)
                | (Connecting, Transferring)
                | (Transferring, Completed)
                | (Waiting | Connecting | Transferring, Failed | Aborted)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransferState::Waiting => "waiting",
            TransferState::Connecting => "connecting",
            TransferState::Transferring => "transferring",
            TransferState::Completed => "completed",
            TransferState::Failed => "failed",
            TransferState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Send,
    Receive,
}

/// 파일 식별 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    /// 같은 두 피어 사이의 동시 제안을 구분하는 값
    pub hash: u32,
}

/// 파일 식별 해시 (이름 + 크기 + 제안 시각의 CRC32)
pub fn file_hash(name: &str, size: u64, now_ms: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(name.as_bytes());
    hasher.update(&size.to_le_bytes());
    hasher.update(&now_ms.to_le_bytes());
    hasher.finalize()
}

/// 외부에 보여주는 전송 스냅샷
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferInfo {
    pub id: TransferId,
    pub direction: Direction,
    pub peer: UserCode,
    pub peer_nick: String,
    pub file: FileInfo,
    pub state: TransferState,
    pub transferred: u64,
    pub bytes_per_sec: u64,
    /// 0 ~ 100
    pub percent: u8,
}

/// 진행 중인 전송
struct FileTransfer {
    id: TransferId,
    direction: Direction,
    /// 파일을 보내는 쪽 코드 (메시지의 괄호 필드)
    owner: UserCode,
    peer: UserCode,
    peer_nick: String,
    peer_ip: Option<IpAddr>,
    file: FileInfo,
    state: Mutex<TransferState>,
    counter: Mutex<ByteCounter>,
    /// 보내는 쪽: 수락 전까지 보관
    source: Mutex<Option<FileSource>>,
    cancel_tx: watch::Sender<bool>,
}

impl FileTransfer {
    fn new(
        id: TransferId,
        owner: UserCode,
        peer: &User,
        file: FileInfo,
        source: Option<FileSource>,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        let direction = if owner == peer.code {
            Direction::Receive
        } else {
            Direction::Send
        };
        Self {
            id,
            direction,
            owner,
            peer: peer.code,
            peer_nick: peer.nick.clone(),
            peer_ip: peer.ip,
            file,
            state: Mutex::new(TransferState::Waiting),
            counter: Mutex::new(ByteCounter::new()),
            source: Mutex::new(source),
            cancel_tx,
        }
    }

    fn state(&self) -> TransferState {
        *self.state.lock()
    }

    /// 상태 전이, 허용되지 않으면 false
    fn transition(&self, to: TransferState) -> bool {
        let mut state = self.state.lock();
        if !state.can_move_to(to) {
            return false;
        }
        debug!("전송 {} 상태: {} → {}", self.id, *state, to);
        *state = to;
        true
    }

    /// 취소/실패로 종료하고 대기 중인 I/O 깨우기
    fn stop(&self, to: TransferState) -> bool {
        if !self.transition(to) {
            return false;
        }
        self.cancel_tx.send_replace(true);
        self.source.lock().take();
        true
    }

    fn record(&self, bytes: usize) {
        self.counter.lock().add(bytes as u64);
    }

    fn matches(&self, peer: UserCode, file: &FileRef) -> bool {
        self.peer == peer && self.file.hash == file.hash && self.file.name == file.name
    }

    fn file_ref(&self) -> FileRef {
        FileRef {
            owner: self.owner,
            hash: self.file.hash,
            name: self.file.name.clone(),
        }
    }

    fn info(&self) -> TransferInfo {
        let state = self.state();
        let (transferred, bytes_per_sec) = {
            let counter = self.counter.lock();
            (counter.total(), counter.bytes_per_sec())
        };
        let percent = if self.file.size == 0 {
            if state == TransferState::Completed {
                100
            } else {
                0
            }
        } else {
            (transferred.min(self.file.size) * 100 / self.file.size) as u8
        };

        TransferInfo {
            id: self.id,
            direction: self.direction,
            peer: self.peer,
            peer_nick: self.peer_nick.clone(),
            file: self.file.clone(),
            state,
            transferred,
            bytes_per_sec,
            percent,
        }
    }
}

/// 스트리밍 태스크 설정
#[derive(Debug, Clone, Copy)]
struct StreamOptions {
    chunk_size: usize,
    connect_timeout: Duration,
}

/// 파일 전송 관리자
pub struct TransferManager {
    options: StreamOptions,
    events: EventBus,
    transfers: DashMap<TransferId, Arc<FileTransfer>>,
    next_id: AtomicU64,
}

impl TransferManager {
    pub fn new(config: &Config, events: EventBus) -> Self {
        Self {
            options: StreamOptions {
                chunk_size: config.file_chunk_size.max(1),
                connect_timeout: Duration::from_millis(config.file_connect_timeout_ms),
            },
            events,
            transfers: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// 파일 제안 (SENDFILE)
    pub fn offer<R>(
        &self,
        me: &User,
        peer: &User,
        name: &str,
        size: u64,
        source: R,
    ) -> Result<(TransferId, Vec<Action>)>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        if peer.is_me || peer.code == me.code {
            return Err(Error::UnknownUser(peer.code));
        }
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::EmptyMessage);
        }

        let file = FileInfo {
            name: name.to_string(),
            size,
            hash: file_hash(name, size, now_millis()),
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transfer = Arc::new(FileTransfer::new(
            id,
            me.code,
            peer,
            file,
            Some(Box::new(source)),
        ));

        info!(
            "파일 제안: {} ({} bytes) → {} ({})",
            transfer.file.name, size, peer.nick, peer.code
        );
        let msg = Message::new(
            me.code,
            me.nick.clone(),
            MessageBody::SendFile {
                file: transfer.file_ref(),
                size,
            },
        );
        self.events.emit(ChatEvent::TransferStatus(transfer.info()));
        self.transfers.insert(id, transfer);

        Ok((id, vec![Action::direct(peer.code, peer.ip, msg)]))
    }

    /// 파일 관련 수신 메시지 처리
    ///
    /// `sender`는 레지스트리에서 찾은 보낸 사람. 모르는 사람의 메시지는 무시.
    /// 괄호 코드가 보낸 사람 자신이면 상대 파일(받는 전송), 아니면 내 파일(보내는 전송)
    pub fn handle_message(
        &self,
        msg: &Message,
        sender: Option<&User>,
        ip: Option<IpAddr>,
    ) -> Vec<Action> {
        let Some(sender) = sender else {
            debug!("알 수 없는 사용자의 파일 메시지 무시: {}", msg.user_code);
            return Vec::new();
        };

        match &msg.body {
            MessageBody::SendFile { file, size } if file.owner == sender.code => {
                self.on_offer(sender, file, *size);
            }
            MessageBody::SendFileAccept { file, port } if file.owner != sender.code => {
                self.on_accept(sender, file, *port, ip.or(sender.ip));
            }
            MessageBody::SendFileAbort { file } => {
                let direction = if file.owner == sender.code {
                    Direction::Receive
                } else {
                    Direction::Send
                };
                self.on_abort(sender, file, direction);
            }
            _ => debug!("잘못된 파일 메시지 무시: {}", msg),
        }
        Vec::new()
    }

    fn on_offer(&self, sender: &User, file: &FileRef, size: u64) {
        if self.find(sender.code, file, Direction::Receive).is_some() {
            debug!("중복 파일 제안 무시: {} from {}", file.name, sender.nick);
            return;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let transfer = Arc::new(FileTransfer::new(
            id,
            sender.code,
            sender,
            FileInfo {
                name: file.name.clone(),
                size,
                hash: file.hash,
            },
            None,
        ));
        info!(
            "파일 제안 받음: {} ({} bytes) from {} ({})",
            file.name, size, sender.nick, sender.code
        );
        self.events.emit(ChatEvent::FileOffered(transfer.info()));
        self.transfers.insert(id, transfer);
    }

    fn on_accept(&self, sender: &User, file: &FileRef, port: u16, ip: Option<IpAddr>) {
        let Some(transfer) = self.find(sender.code, file, Direction::Send) else {
            debug!("알 수 없는 파일 수락 무시: {} from {}", file.name, sender.nick);
            return;
        };
        let Some(ip) = ip.or(transfer.peer_ip) else {
            warn!("파일 수락했지만 피어 주소 없음: {}", sender.nick);
            self.fail(&transfer);
            return;
        };
        if !transfer.transition(TransferState::Connecting) {
            debug!("전송 {}: 수락 무시 (상태 {})", transfer.id, transfer.state());
            return;
        }
        self.events.emit(ChatEvent::TransferStatus(transfer.info()));

        let source = transfer.source.lock().take();
        let Some(source) = source else {
            self.fail(&transfer);
            return;
        };

        let addr = SocketAddr::new(ip, port);
        info!("파일 전송 연결: {} → {}", transfer.file.name, addr);
        tokio::spawn(run_send(
            transfer,
            addr,
            source,
            self.options,
            self.events.clone(),
        ));
    }

    fn on_abort(&self, sender: &User, file: &FileRef, direction: Direction) {
        if let Some(transfer) = self.find(sender.code, file, direction) {
            if transfer.stop(TransferState::Aborted) {
                info!("상대가 파일 전송 중단: {} ({})", transfer.file.name, sender.nick);
                self.events.emit(ChatEvent::TransferStatus(transfer.info()));
            }
        }
    }

    /// 받은 제안 수락 (SENDFILEACCEPT)
    ///
    /// 임시 포트를 열고 보내는 쪽의 연결을 기다림
    pub async fn accept<W>(&self, me: &User, id: TransferId, sink: W) -> Result<Vec<Action>>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transfer = self.transfer(id)?;
        if transfer.direction != Direction::Receive || transfer.state() != TransferState::Waiting {
            return Err(invalid_state(&transfer));
        }

        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;
        let port = listener.local_addr()?.port();

        if !transfer.transition(TransferState::Connecting) {
            return Err(invalid_state(&transfer));
        }
        self.events.emit(ChatEvent::TransferStatus(transfer.info()));
        info!("파일 수락: {} (포트 {})", transfer.file.name, port);

        let msg = Message::new(
            me.code,
            me.nick.clone(),
            MessageBody::SendFileAccept {
                file: transfer.file_ref(),
                port,
            },
        );
        let action = Action::direct(transfer.peer, transfer.peer_ip, msg);

        tokio::spawn(run_receive(
            transfer,
            listener,
            Box::new(sink),
            self.options,
            self.events.clone(),
        ));

        Ok(vec![action])
    }

    /// 받은 제안 거절
    pub fn reject(&self, me: &User, id: TransferId) -> Result<Vec<Action>> {
        let transfer = self.transfer(id)?;
        if transfer.direction != Direction::Receive || transfer.state() != TransferState::Waiting {
            return Err(invalid_state(&transfer));
        }
        self.cancel(me, id)
    }

    /// 전송 취소 (양방향, 종료 전 어느 상태에서나)
    pub fn cancel(&self, me: &User, id: TransferId) -> Result<Vec<Action>> {
        let transfer = self.transfer(id)?;
        if !transfer.stop(TransferState::Aborted) {
            return Err(invalid_state(&transfer));
        }
        info!("파일 전송 취소: {} ({})", transfer.file.name, transfer.peer_nick);
        self.events.emit(ChatEvent::TransferStatus(transfer.info()));

        let msg = Message::new(
            me.code,
            me.nick.clone(),
            MessageBody::SendFileAbort {
                file: transfer.file_ref(),
            },
        );
        Ok(vec![Action::direct(transfer.peer, transfer.peer_ip, msg)])
    }

    /// 퇴장/타임아웃한 피어와의 전송 모두 실패 처리
    pub fn abort_for_peer(&self, code: UserCode) -> usize {
        let targets: Vec<Arc<FileTransfer>> = self
            .transfers
            .iter()
            .filter(|t| t.peer == code)
            .map(|t| t.value().clone())
            .collect();

        targets.iter().filter(|t| self.fail(t)).count()
    }

    fn fail(&self, transfer: &FileTransfer) -> bool {
        if !transfer.stop(TransferState::Failed) {
            return false;
        }
        warn!("파일 전송 실패: {} ({})", transfer.file.name, transfer.peer_nick);
        self.events.emit(ChatEvent::TransferStatus(transfer.info()));
        true
    }

    pub fn get(&self, id: TransferId) -> Option<TransferInfo> {
        self.transfers.get(&id).map(|t| t.info())
    }

    /// ID 순 목록
    pub fn list(&self) -> Vec<TransferInfo> {
        let mut list: Vec<TransferInfo> = self.transfers.iter().map(|t| t.info()).collect();
        list.sort_by_key(|t| t.id);
        list
    }

    /// 종료된 전송 정리
    pub fn remove_finished(&self) -> usize {
        let before = self.transfers.len();
        self.transfers.retain(|_, t| !t.state().is_terminal());
        before - self.transfers.len()
    }

    /// 모든 진행 중 전송 중단 (노드 종료 시)
    ///
    /// 상대에게 보낼 SENDFILEABORT 목록 반환
    pub fn shutdown(&self, me: &User) -> Vec<Action> {
        let open: Vec<TransferId> = self
            .transfers
            .iter()
            .filter(|t| !t.state().is_terminal())
            .map(|t| t.id)
            .collect();

        open.into_iter()
            .filter_map(|id| self.cancel(me, id).ok())
            .flatten()
            .collect()
    }

    fn transfer(&self, id: TransferId) -> Result<Arc<FileTransfer>> {
        self.transfers
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or(Error::UnknownTransfer(id))
    }

    /// 피어 + 파일로 열린 전송 찾기
    fn find(
        &self,
        peer: UserCode,
        file: &FileRef,
        direction: Direction,
    ) -> Option<Arc<FileTransfer>> {
        self.transfers
            .iter()
            .find(|t| t.direction == direction && t.matches(peer, file) && !t.state().is_terminal())
            .map(|t| t.value().clone())
    }
}

fn invalid_state(transfer: &FileTransfer) -> Error {
    Error::InvalidTransferState {
        id: transfer.id,
        state: transfer.state().to_string(),
    }
}

fn timed_out(what: impl fmt::Display) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("파일 전송 연결 타임아웃: {}", what),
    ))
}

fn unexpected_eof(msg: &str) -> Error {
    Error::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, msg.to_string()))
}

/// 취소 신호 대기
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|c| *c).await;
}

/// Transferring 진입 + 진행 틱 시작
fn begin_streaming(transfer: &Arc<FileTransfer>, events: &EventBus) -> Result<()> {
    if !transfer.transition(TransferState::Transferring) {
        return Err(Error::ConnectionClosed);
    }
    events.emit(ChatEvent::TransferStatus(transfer.info()));

    let transfer = transfer.clone();
    let events = events.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if transfer.state() != TransferState::Transferring {
                break;
            }
            transfer.counter.lock().tick(Instant::now());
            events.emit(ChatEvent::TransferProgress(transfer.info()));
        }
    });
    Ok(())
}

/// 태스크 결과를 최종 상태로 반영
fn finish(transfer: &FileTransfer, result: Result<()>, events: &EventBus) {
    match result {
        Ok(()) => {
            if transfer.transition(TransferState::Completed) {
                info!(
                    "파일 전송 완료: {} ({} bytes)",
                    transfer.file.name,
                    transfer.counter.lock().total()
                );
                events.emit(ChatEvent::TransferStatus(transfer.info()));
            }
        }
        Err(e) => {
            if transfer.stop(TransferState::Failed) {
                warn!("파일 전송 실패: {}: {}", transfer.file.name, e);
                events.emit(ChatEvent::TransferStatus(transfer.info()));
            } else {
                debug!("전송 {} 종료 ({}): {}", transfer.id, transfer.state(), e);
            }
        }
    }
}

async fn run_send(
    transfer: Arc<FileTransfer>,
    addr: SocketAddr,
    mut source: FileSource,
    options: StreamOptions,
    events: EventBus,
) {
    let result = send_file(&transfer, addr, &mut source, options, &events).await;
    finish(&transfer, result, &events);
}

async fn send_file(
    transfer: &Arc<FileTransfer>,
    addr: SocketAddr,
    source: &mut FileSource,
    options: StreamOptions,
    events: &EventBus,
) -> Result<()> {
    let mut cancel = transfer.cancel_tx.subscribe();

    let mut stream = tokio::select! {
        _ = cancelled(&mut cancel) => return Err(Error::ConnectionClosed),
        r = tokio::time::timeout(options.connect_timeout, TcpStream::connect(addr)) => {
            r.map_err(|_| timed_out(addr))??
        }
    };
    begin_streaming(transfer, events)?;

    let mut buf = vec![0u8; options.chunk_size];
    let mut remaining = transfer.file.size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = tokio::select! {
            _ = cancelled(&mut cancel) => return Err(Error::ConnectionClosed),
            r = source.read(&mut buf[..want]) => r?,
        };
        if n == 0 {
            return Err(unexpected_eof("파일 데이터가 광고한 크기보다 짧음"));
        }
        tokio::select! {
            _ = cancelled(&mut cancel) => return Err(Error::ConnectionClosed),
            r = stream.write_all(&buf[..n]) => r?,
        }
        remaining -= n as u64;
        transfer.record(n);
    }

    stream.flush().await?;
    stream.shutdown().await?;
    Ok(())
}

async fn run_receive(
    transfer: Arc<FileTransfer>,
    listener: TcpListener,
    mut sink: FileSink,
    options: StreamOptions,
    events: EventBus,
) {
    let result = receive_file(&transfer, listener, &mut sink, options, &events).await;
    finish(&transfer, result, &events);
}

async fn receive_file(
    transfer: &Arc<FileTransfer>,
    listener: TcpListener,
    sink: &mut FileSink,
    options: StreamOptions,
    events: &EventBus,
) -> Result<()> {
    let mut cancel = transfer.cancel_tx.subscribe();

    let (mut stream, from) = tokio::select! {
        _ = cancelled(&mut cancel) => return Err(Error::ConnectionClosed),
        r = tokio::time::timeout(options.connect_timeout, listener.accept()) => {
            r.map_err(|_| timed_out(&transfer.file.name))??
        }
    };
    drop(listener);
    debug!("파일 수신 연결: {} from {}", transfer.file.name, from);
    begin_streaming(transfer, events)?;

    let mut buf = vec![0u8; options.chunk_size];
    let mut remaining = transfer.file.size;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = tokio::select! {
            _ = cancelled(&mut cancel) => return Err(Error::ConnectionClosed),
            r = stream.read(&mut buf[..want]) => r?,
        };
        if n == 0 {
            return Err(unexpected_eof("파일 수신 중 연결 끊김"));
        }
        tokio::select! {
            _ = cancelled(&mut cancel) => return Err(Error::ConnectionClosed),
            r = sink.write_all(&buf[..n]) => r?,
        }
        remaining -= n as u64;
        transfer.record(n);
    }

    sink.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const A: UserCode = 11_111_111;
    const B: UserCode = 22_222_222;

    fn user(code: UserCode, nick: &str) -> User {
        let mut user = User::new(code, nick, 0);
        user.ip = Some(IpAddr::V4(Ipv4Addr::LOCALHOST));
        user
    }

    fn me(code: UserCode, nick: &str) -> User {
        User {
            is_me: true,
            ..user(code, nick)
        }
    }

    fn manager() -> TransferManager {
        TransferManager::new(&Config::loopback_test(), EventBus::new())
    }

    fn message(actions: &[Action]) -> Message {
        actions[0].outgoing().unwrap().message.clone()
    }

    async fn wait_state(manager: &TransferManager, id: TransferId, state: TransferState) {
        for _ in 0..200 {
            if manager.get(id).map(|t| t.state) == Some(state) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!(
            "transfer {} did not reach {:?}, now {:?}",
            id,
            state,
            manager.get(id).map(|t| t.state)
        );
    }

    #[test]
    fn test_state_transitions() {
        use TransferState::*;
        assert!(Waiting.can_move_to(Connecting));
        assert!(Waiting.can_move_to(Aborted));
        assert!(Transferring.can_move_to(Completed));
        assert!(Connecting.can_move_to(Failed));
        assert!(!Waiting.can_move_to(Completed));
        assert!(!Completed.can_move_to(Aborted));
        assert!(!Aborted.can_move_to(Failed));
        assert!(!Failed.can_move_to(Transferring));
    }

    #[test]
    fn test_offer_builds_sendfile() {
        let sender = manager();
        let (id, actions) = sender
            .offer(&me(A, "amy"), &user(B, "bob"), "notes.txt", 12, Cursor::new(vec![0u8; 12]))
            .unwrap();

        let msg = message(&actions);
        assert_eq!(msg.user_code, A);
        match msg.body {
            MessageBody::SendFile { file, size } => {
                assert_eq!(file.owner, A);
                assert_eq!(file.name, "notes.txt");
                assert_eq!(size, 12);
            }
            other => panic!("unexpected {:?}", other),
        }

        let info = sender.get(id).unwrap();
        assert_eq!(info.state, TransferState::Waiting);
        assert_eq!(info.direction, Direction::Send);
    }

    #[test]
    fn test_offer_to_self_rejected() {
        let sender = manager();
        let result = sender.offer(&me(A, "amy"), &me(A, "amy"), "x", 1, Cursor::new(vec![0u8]));
        assert!(matches!(result, Err(Error::UnknownUser(A))));
    }

    #[test]
    fn test_incoming_offer_waits() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let receiver = TransferManager::new(&Config::loopback_test(), events);

        let offer = |owner| {
            Message::new(
                A,
                "amy",
                MessageBody::SendFile {
                    file: FileRef {
                        owner,
                        hash: 7,
                        name: "a.bin".into(),
                    },
                    size: 100,
                },
            )
        };

        // 남의 파일을 제안하거나 모르는 사람이 보낸 제안은 무시
        receiver.handle_message(&offer(33), Some(&user(A, "amy")), None);
        receiver.handle_message(&offer(A), None, None);
        assert!(receiver.list().is_empty());

        receiver.handle_message(&offer(A), Some(&user(A, "amy")), None);
        // 중복 제안
        receiver.handle_message(&offer(A), Some(&user(A, "amy")), None);

        let list = receiver.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].direction, Direction::Receive);
        assert_eq!(list[0].state, TransferState::Waiting);
        assert!(rx.try_iter().any(|e| matches!(e, ChatEvent::FileOffered(_))));
    }

    #[test]
    fn test_reject_sends_abort() {
        let receiver = manager();
        let bob = me(B, "bob");
        receiver.handle_message(
            &Message::new(
                A,
                "amy",
                MessageBody::SendFile {
                    file: FileRef {
                        owner: A,
                        hash: 9,
                        name: "a.bin".into(),
                    },
                    size: 5,
                },
            ),
            Some(&user(A, "amy")),
            None,
        );
        let id = receiver.list()[0].id;

        let actions = receiver.reject(&bob, id).unwrap();
        assert_eq!(
            message(&actions).body,
            MessageBody::SendFileAbort {
                file: FileRef {
                    owner: A,
                    hash: 9,
                    name: "a.bin".into()
                }
            }
        );
        assert_eq!(receiver.get(id).unwrap().state, TransferState::Aborted);
        assert!(matches!(
            receiver.reject(&bob, id),
            Err(Error::InvalidTransferState { .. })
        ));
        assert!(matches!(receiver.cancel(&bob, 999), Err(Error::UnknownTransfer(999))));
    }

    #[test]
    fn test_abort_from_peer_before_accept() {
        let sender = manager();
        let amy = me(A, "amy");
        let (id, actions) = sender
            .offer(&amy, &user(B, "bob"), "a.bin", 3, Cursor::new(vec![1, 2, 3]))
            .unwrap();
        let file = match message(&actions).body {
            MessageBody::SendFile { file, .. } => file,
            other => panic!("unexpected {:?}", other),
        };

        let abort = Message::new(
            B,
            "bob",
            MessageBody::SendFileAbort {
                file,
            },
        );
        sender.handle_message(&abort, Some(&user(B, "bob")), None);

        assert_eq!(sender.get(id).unwrap().state, TransferState::Aborted);
        assert_eq!(sender.remove_finished(), 1);
        assert!(sender.list().is_empty());
    }

    #[test]
    fn test_abort_for_peer() {
        let sender = manager();
        let amy = me(A, "amy");
        sender
            .offer(&amy, &user(B, "bob"), "one", 1, Cursor::new(vec![1]))
            .unwrap();
        sender
            .offer(&amy, &user(B, "bob"), "two", 1, Cursor::new(vec![2]))
            .unwrap();
        sender
            .offer(&amy, &user(33_333_333, "cat"), "three", 1, Cursor::new(vec![3]))
            .unwrap();

        assert_eq!(sender.abort_for_peer(B), 2);
        assert_eq!(sender.abort_for_peer(B), 0);
        let failed = sender
            .list()
            .iter()
            .filter(|t| t.state == TransferState::Failed)
            .count();
        assert_eq!(failed, 2);
    }

    #[test]
    fn test_shutdown_notifies_peers() {
        let events = EventBus::new();
        let rx = events.subscribe();
        let sender = TransferManager::new(&Config::loopback_test(), events);
        let amy = me(A, "amy");
        let (open, _) = sender
            .offer(&amy, &user(B, "bob"), "open", 1, Cursor::new(vec![1]))
            .unwrap();
        let (done, _) = sender
            .offer(&amy, &user(B, "bob"), "done", 1, Cursor::new(vec![2]))
            .unwrap();
        sender.cancel(&amy, done).unwrap();
        let _ = rx.try_iter().count();

        let actions = sender.shutdown(&amy);

        // 이미 끝난 전송은 다시 알리지 않음
        assert_eq!(actions.len(), 1);
        let out = actions[0].outgoing().unwrap();
        assert!(matches!(out.route, crate::outbox::Route::Direct { code: B, .. }));
        assert!(matches!(
            &out.message.body,
            MessageBody::SendFileAbort { file } if file.name == "open"
        ));
        assert_eq!(sender.get(open).unwrap().state, TransferState::Aborted);
        assert!(rx.try_iter().any(|e| matches!(
            e,
            ChatEvent::TransferStatus(t) if t.id == open && t.state == TransferState::Aborted
        )));
        assert!(sender.shutdown(&amy).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_loopback_transfer() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let amy = me(A, "amy");
        let bob = me(B, "bob");
        let sender = manager();
        let receiver = manager();

        let (send_id, actions) = sender
            .offer(&amy, &user(B, "bob"), "data.bin", data.len() as u64, Cursor::new(data.clone()))
            .unwrap();
        receiver.handle_message(&message(&actions), Some(&user(A, "amy")), None);
        let recv_id = receiver.list()[0].id;

        let (sink, mut output) = tokio::io::duplex(1 << 20);
        let accept = receiver.accept(&bob, recv_id, sink).await.unwrap();
        assert_eq!(receiver.get(recv_id).unwrap().state, TransferState::Connecting);

        sender.handle_message(
            &message(&accept),
            Some(&user(B, "bob")),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        );

        wait_state(&sender, send_id, TransferState::Completed).await;
        wait_state(&receiver, recv_id, TransferState::Completed).await;

        let mut received = Vec::new();
        output.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, data);

        let info = receiver.get(recv_id).unwrap();
        assert_eq!(info.transferred, data.len() as u64);
        assert_eq!(info.percent, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_transferring() {
        let amy = me(A, "amy");
        let bob = me(B, "bob");
        let sender = manager();
        let receiver = manager();

        let size = 1u64 << 40;
        let (send_id, actions) = sender
            .offer(&amy, &user(B, "bob"), "huge", size, tokio::io::repeat(7))
            .unwrap();
        receiver.handle_message(&message(&actions), Some(&user(A, "amy")), None);
        let recv_id = receiver.list()[0].id;

        let accept = receiver
            .accept(&bob, recv_id, tokio::io::sink())
            .await
            .unwrap();
        sender.handle_message(&message(&accept), Some(&user(B, "bob")), None);

        wait_state(&sender, send_id, TransferState::Transferring).await;
        sender.cancel(&amy, send_id).unwrap();

        assert_eq!(sender.get(send_id).unwrap().state, TransferState::Aborted);
        // 받는 쪽은 연결이 일찍 끊겨 실패
        wait_state(&receiver, recv_id, TransferState::Failed).await;
        assert!(sender.cancel(&amy, send_id).is_err());
    }
}
