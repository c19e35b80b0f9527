//! 멀티캐스트 전송
//!
//! - 수신: 그룹 포트에 바인드한 소켓 하나, 모든 인터페이스에서 그룹 가입
//! - 송신: 인터페이스마다 소켓 하나 (IP_MULTICAST_IF)
//! - 유니캐스트: 바인드하지 않은 소켓 하나
//!
//! 같은 포트로 오는 유니캐스트 응답(EXPOSING 등)도 수신 소켓으로 들어옴

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::interfaces::NicInfo;
use crate::{Config, Error, Result};

/// 데이터그램 수신 콜백 (텍스트, 보낸 IP)
pub type DatagramHandler = Arc<dyn Fn(String, IpAddr) + Send + Sync>;

/// 인터페이스별 송신 소켓
struct NicSender {
    nic: NicInfo,
    socket: UdpSocket,
}

/// 멀티캐스트 전송 계층
pub struct MulticastTransport {
    group: SocketAddrV4,
    senders: Vec<NicSender>,
    unicast: UdpSocket,
    local_port: u16,
    shutdown_tx: watch::Sender<bool>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl MulticastTransport {
    /// 소켓 열고 수신 태스크 시작
    ///
    /// `multicast_port`가 0이면 임시 포트에 바인드하고 그 포트로 송신함
    pub async fn start(config: &Config, nics: &[NicInfo], handler: DatagramHandler) -> Result<Self> {
        let recv_socket = bind_receive_socket(config.multicast_port)?;
        let local_port = recv_socket.local_addr()?.port();
        let group = SocketAddrV4::new(config.multicast_group, local_port);

        let mut senders = Vec::with_capacity(nics.len());
        for nic in nics {
            if let Err(e) = recv_socket.join_multicast_v4(&config.multicast_group, &nic.addr) {
                warn!("멀티캐스트 그룹 가입 실패: {} ({}): {}", nic.name, nic.addr, e);
                continue;
            }
            match open_send_socket(nic, config.multicast_ttl) {
                Ok(socket) => {
                    debug!("송신 소켓 준비: {} ({})", nic.name, nic.addr);
                    senders.push(NicSender {
                        nic: nic.clone(),
                        socket,
                    });
                }
                Err(e) => warn!("송신 소켓 생성 실패: {} ({}): {}", nic.name, nic.addr, e),
            }
        }

        if senders.is_empty() {
            return Err(Error::NoUsableInterface);
        }

        let recv_socket = UdpSocket::from_std(recv_socket)?;
        let unicast = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let recv_task = tokio::spawn(receive_loop(
            recv_socket,
            config.max_datagram_size,
            handler,
            shutdown_rx,
        ));

        info!(
            "멀티캐스트 시작: {} (인터페이스 {}개)",
            group,
            senders.len()
        );

        Ok(Self {
            group,
            senders,
            unicast,
            local_port,
            shutdown_tx,
            recv_task: Mutex::new(Some(recv_task)),
        })
    }

    /// 그룹으로 전송
    ///
    /// 한 인터페이스라도 성공하면 Ok
    pub async fn send_multicast(&self, text: &str) -> Result<()> {
        let mut sent = 0;
        let mut last_err = None;

        for sender in &self.senders {
            match sender.socket.send_to(text.as_bytes(), self.group).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!("멀티캐스트 전송 실패 ({}): {}", sender.nic.name, e);
                    last_err = Some(e);
                }
            }
        }

        if sent > 0 {
            trace!("멀티캐스트 전송: {} bytes, 인터페이스 {}개", text.len(), sent);
            return Ok(());
        }
        Err(last_err.map_or(Error::NoUsableInterface, Error::from))
    }

    /// 특정 주소로 전송
    pub async fn send_unicast(&self, text: &str, ip: IpAddr, port: u16) -> Result<()> {
        self.unicast
            .send_to(text.as_bytes(), SocketAddr::new(ip, port))
            .await?;
        trace!("유니캐스트 전송: {} bytes → {}:{}", text.len(), ip, port);
        Ok(())
    }

    /// 수신 포트 (피어 유니캐스트 대상 포트)
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn group(&self) -> SocketAddrV4 {
        self.group
    }

    /// 송신에 쓰는 인터페이스
    pub fn interfaces(&self) -> Vec<NicInfo> {
        self.senders.iter().map(|s| s.nic.clone()).collect()
    }

    /// 수신 태스크 종료
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.recv_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
            debug!("멀티캐스트 수신 종료");
        }
    }
}

impl Drop for MulticastTransport {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// 그룹 포트 수신 소켓 (주소 재사용)
fn bind_receive_socket(port: u16) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)).into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

/// 인터페이스 전용 송신 소켓
fn open_send_socket(nic: &NicInfo, ttl: u32) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_if_v4(&nic.addr)?;
    socket.set_multicast_ttl_v4(ttl)?;
    socket.set_multicast_loop_v4(true)?;
    socket.bind(&SocketAddr::from((nic.addr, 0)).into())?;
    socket.set_nonblocking(true)?;

    let std_socket: std::net::UdpSocket = socket.into();
    Ok(UdpSocket::from_std(std_socket)?)
}

/// 받은 데이터그램을 텍스트로
///
/// 버퍼를 가득 채운 데이터그램은 OS가 잘랐을 수 있으므로 버림.
/// 자유 텍스트 메시지는 잘려도 디코딩에 성공하기 때문
fn datagram_text(buf: &[u8], len: usize) -> Option<&str> {
    if len >= buf.len() {
        return None;
    }
    std::str::from_utf8(&buf[..len]).ok()
}

async fn receive_loop(
    socket: UdpSocket,
    max_size: usize,
    handler: DatagramHandler,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; max_size];

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => match datagram_text(&buf, len) {
                    Some(text) => handler(text.to_string(), from.ip()),
                    None => debug!("데이터그램 무시: {} bytes from {}", len, from),
                },
                Err(e) => {
                    // Windows는 ICMP port unreachable을 recv 오류로 돌려줌
                    debug!("데이터그램 수신 오류: {}", e);
                }
            }
        }
    }
}
