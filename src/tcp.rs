//! TCP 개인 연결
//!
//! 피어마다 연결 하나. 프레임은 `\n`으로 끝나는 UTF-8 한 줄.
//!
//! - 받은 연결: 처음 해석 가능한 줄의 사용자 코드로 피어 결정
//! - 건 연결: connect 시점에 피어 결정
//!
//! 연결마다 읽기 태스크 하나 + 쓰기 태스크 하나

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::message::Message;
use crate::user::UserCode;
use crate::{Error, Result};

/// 줄 하나의 최대 길이 (넘으면 연결 종료)
const MAX_LINE_LEN: usize = 64 * 1024;

/// 연결 시도 타임아웃
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// 노드로 보내는 TCP 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpEvent {
    /// 피어와 연결이 맺어짐
    Opened { code: UserCode, ip: IpAddr },
    /// 한 줄 수신
    Line { text: String, ip: IpAddr },
    /// 연결 끊김
    Closed { code: UserCode },
}

/// 피어 연결 핸들
struct PeerConn {
    id: u64,
    ip: IpAddr,
    tx: mpsc::UnboundedSender<String>,
    /// 드롭되면 읽기 태스크 종료
    _close: watch::Sender<bool>,
}

struct HubShared {
    peers: DashMap<UserCode, PeerConn>,
    events: mpsc::UnboundedSender<TcpEvent>,
    next_id: AtomicU64,
}

impl HubShared {
    /// 연결을 피어 코드에 연결
    ///
    /// 같은 피어의 이전 연결은 대체되어 닫힘
    fn associate(&self, code: UserCode, conn: PeerConn) {
        let ip = conn.ip;
        if self.peers.insert(code, conn).is_some() {
            debug!("피어 {} 기존 TCP 연결 대체", code);
        }
        info!("TCP 연결: {} ({})", code, ip);
        let _ = self.events.send(TcpEvent::Opened { code, ip });
    }

    /// 이 연결이 아직 피어의 현재 연결이면 제거
    fn release(&self, code: UserCode, id: u64) {
        if self.peers.remove_if(&code, |_, c| c.id == id).is_some() {
            info!("TCP 연결 종료: {}", code);
            let _ = self.events.send(TcpEvent::Closed { code });
        }
    }
}

/// TCP 연결 허브
pub struct TcpHub {
    shared: Arc<HubShared>,
    local_port: u16,
    shutdown_tx: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpHub {
    /// 리스너 바인드 후 accept 태스크 시작 (port 0 = 임의 포트)
    pub async fn start(port: u16, events: mpsc::UnboundedSender<TcpEvent>) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
        let local_port = listener.local_addr()?.port();

        let shared = Arc::new(HubShared {
            peers: DashMap::new(),
            events,
            next_id: AtomicU64::new(1),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let accept_task = tokio::spawn(accept_loop(listener, shared.clone(), shutdown_rx));
        info!("TCP 개인 연결 대기: 포트 {}", local_port);

        Ok(Self {
            shared,
            local_port,
            shutdown_tx,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// 피어에 연결하고 첫 줄(`hello`) 전송
    pub async fn connect(&self, code: UserCode, addr: SocketAddr, hello: String) -> Result<()> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("TCP 연결 타임아웃: {}", addr),
                ))
            })??;
        stream.set_nodelay(true)?;

        spawn_connection(
            stream,
            addr.ip(),
            Some(code),
            &self.shared,
            self.shutdown_tx.subscribe(),
        );
        self.send(code, &hello)
    }

    /// 피어에게 한 줄 전송
    pub fn send(&self, code: UserCode, line: &str) -> Result<()> {
        let peer = self.shared.peers.get(&code).ok_or(Error::ConnectionClosed)?;
        peer.tx
            .send(line.to_string())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// 열린 모든 연결로 전송, 보낸 연결 수 반환
    pub fn broadcast(&self, line: &str) -> usize {
        self.shared
            .peers
            .iter()
            .filter(|p| p.tx.send(line.to_string()).is_ok())
            .count()
    }

    pub fn is_connected(&self, code: UserCode) -> bool {
        self.shared.peers.contains_key(&code)
    }

    /// 피어 연결 닫기 (Closed 이벤트 없음)
    pub fn disconnect(&self, code: UserCode) -> bool {
        self.shared.peers.remove(&code).is_some()
    }

    /// accept 중지, 모든 연결 닫기
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.peers.clear();
        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        debug!("TCP 허브 종료");
    }
}

impl Drop for TcpHub {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<HubShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = listener.accept() => match result {
                Ok((stream, addr)) => {
                    debug!("TCP 연결 수락: {}", addr);
                    let _ = stream.set_nodelay(true);
                    // 첫 줄이 오기 전에는 피어를 모름
                    spawn_connection(stream, addr.ip(), None, &shared, shutdown.clone());
                }
                Err(e) => warn!("TCP accept 실패: {}", e),
            }
        }
    }
}

/// 연결 태스크 시작
///
/// `code`를 알면 바로 등록. 모르면 핸들은 읽기 태스크가 보관하다 첫 줄에서 등록함
fn spawn_connection(
    stream: TcpStream,
    ip: IpAddr,
    code: Option<UserCode>,
    shared: &Arc<HubShared>,
    hub_shutdown: watch::Receiver<bool>,
) {
    let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
    let (reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();
    let (close_tx, close_rx) = watch::channel(false);

    tokio::spawn(write_loop(writer, rx));

    let conn = PeerConn {
        id,
        ip,
        tx,
        _close: close_tx,
    };
    let pending = match code {
        Some(code) => {
            shared.associate(code, conn);
            None
        }
        None => Some(conn),
    };

    tokio::spawn(read_loop(
        reader,
        ip,
        id,
        code,
        pending,
        shared.clone(),
        close_rx,
        hub_shutdown,
    ));
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let mut frame = line.into_bytes();
        frame.push(b'\n');
        if let Err(e) = writer.write_all(&frame).await {
            debug!("TCP 쓰기 실패: {}", e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    mut reader: tokio::net::tcp::OwnedReadHalf,
    ip: IpAddr,
    id: u64,
    mut code: Option<UserCode>,
    mut pending: Option<PeerConn>,
    shared: Arc<HubShared>,
    mut close: watch::Receiver<bool>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::with_capacity(4096);

    'conn: loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = close.changed() => break,
            result = reader.read_buf(&mut buf) => match result {
                Ok(0) => break,
                Ok(_) => {
                    while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                        let frame = buf.split_to(pos + 1);
                        let text = String::from_utf8_lossy(&frame[..pos])
                            .trim_end_matches('\r')
                            .to_string();
                        if text.is_empty() {
                            continue;
                        }

                        if code.is_none() {
                            if let Ok(msg) = Message::decode(&text) {
                                if let Some(conn) = pending.take() {
                                    code = Some(msg.user_code);
                                    shared.associate(msg.user_code, conn);
                                }
                            }
                        }

                        if shared.events.send(TcpEvent::Line { text, ip }).is_err() {
                            break 'conn;
                        }
                    }
                    if buf.len() > MAX_LINE_LEN {
                        warn!("TCP 줄 길이 초과 ({} bytes), 연결 종료: {}", buf.len(), ip);
                        break;
                    }
                }
                Err(e) => {
                    debug!("TCP 읽기 실패 ({}): {}", ip, e);
                    break;
                }
            }
        }
    }

    if let Some(code) = code {
        shared.release(code, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBody;

    async fn next(rx: &mut mpsc::UnboundedReceiver<TcpEvent>) -> TcpEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    fn idle_line(code: UserCode) -> String {
        Message::new(code, "peer", MessageBody::Idle).encode()
    }

    #[tokio::test]
    async fn test_connect_associates_both_sides() {
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let a = TcpHub::start(0, a_tx).await.unwrap();
        let b = TcpHub::start(0, b_tx).await.unwrap();

        let a_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, a.local_port()));
        b.connect(100, a_addr, idle_line(200)).await.unwrap();

        assert!(matches!(next(&mut b_rx).await, TcpEvent::Opened { code: 100, .. }));
        assert!(b.is_connected(100));

        // A는 첫 줄에서 B의 코드 200을 알게 됨
        assert!(matches!(next(&mut a_rx).await, TcpEvent::Opened { code: 200, .. }));
        match next(&mut a_rx).await {
            TcpEvent::Line { text, .. } => assert_eq!(text, idle_line(200)),
            other => panic!("unexpected {:?}", other),
        }

        a.send(200, &idle_line(100)).unwrap();
        match next(&mut b_rx).await {
            TcpEvent::Line { text, ip } => {
                assert_eq!(text, idle_line(100));
                assert!(ip.is_loopback());
            }
            other => panic!("unexpected {:?}", other),
        }

        // B가 끊으면 A에 Closed
        assert!(b.disconnect(100));
        assert_eq!(next(&mut a_rx).await, TcpEvent::Closed { code: 200 });
        assert!(!a.is_connected(200));

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test]
    async fn test_split_frames_reassembled() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = TcpHub::start(0, tx).await.unwrap();

        let mut stream = TcpStream::connect(("127.0.0.1", hub.local_port()))
            .await
            .unwrap();
        let line = idle_line(300);
        let (head, tail) = line.split_at(4);
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream.write_all(format!("{}\r\nnot a message\n", tail).as_bytes()).await.unwrap();

        assert!(matches!(next(&mut rx).await, TcpEvent::Opened { code: 300, .. }));
        assert_eq!(
            next(&mut rx).await,
            TcpEvent::Line {
                text: line,
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        );
        assert!(matches!(next(&mut rx).await, TcpEvent::Line { text, .. } if text == "not a message"));

        drop(stream);
        assert_eq!(next(&mut rx).await, TcpEvent::Closed { code: 300 });
        hub.stop().await;
    }

    #[tokio::test]
    async fn test_broadcast_and_unknown_send() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let hub = TcpHub::start(0, tx).await.unwrap();
        assert_eq!(hub.broadcast("x"), 0);
        assert!(matches!(hub.send(1, "x"), Err(Error::ConnectionClosed)));
        hub.stop().await;
    }
}
