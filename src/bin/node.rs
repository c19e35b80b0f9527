//! lanchat 노드 - 서버 없는 LAN 채팅
//!
//! 표준 입력 한 줄 = 채팅 메시지, `/`로 시작하면 명령
//!
//! 사용법:
//!   cargo run --release --bin lanchat-node -- [OPTIONS]
//!
//! 예시:
//!   # 기본 그룹 참여
//!   cargo run --release --bin lanchat-node -- --nick amy
//!
//!   # 인터페이스 지정, TCP 개인 연결 끄기
//!   cargo run --release --bin lanchat-node -- -n bob -i eth0 --no-tcp

use std::path::PathBuf;
use std::str::FromStr;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use lanchat::{ChatEvent, ChatNode, Config, TransferId, User};

const HELP: &str = r#"lanchat node - 서버 없는 LAN 그룹 채팅

사용법:
  cargo run --release --bin lanchat-node -- [OPTIONS]

옵션:
  -n, --nick <NICK>         닉네임 (최대 10자, 기본: Peer)
  -i, --interface <NAME>    사용할 인터페이스 이름 또는 IPv4 주소
  -p, --port <PORT>         멀티캐스트 포트 (기본: 50050)
  --private-port <PORT>     TCP 개인 연결 포트 (기본: 50051)
  --no-tcp                  TCP 개인 연결 끄기
  --quiet-network           IDLE 간격 짧게, 타임아웃 길게
  -h, --help                이 도움말 출력

명령:
  <text>                    전체 채팅
  /msg <nick> <text>        개인 메시지
  /nick <nick>              닉네임 변경
  /away <reason>            자리 비움
  /back                     복귀
  /topic [text]             주제 변경 (없으면 현재 주제 출력)
  /who                      참여자 목록
  /send <nick> <path>       파일 보내기
  /accept <id> <path>       파일 받기
  /reject <id>              파일 거절
  /cancel <id>              전송 취소
  /transfers                전송 목록
  /quit                     종료
"#;

fn parse_value<T: FromStr>(args: &[String], i: usize, what: &str) -> T {
    match args.get(i + 1).map(|v| v.parse()) {
        Some(Ok(value)) => value,
        _ => {
            eprintln!("{} 값이 필요함", what);
            std::process::exit(2);
        }
    }
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--nick" | "-n" => {
                config.nick = parse_value(&args, i, "--nick");
                i += 1;
            }
            "--interface" | "-i" => {
                config.interface = Some(parse_value(&args, i, "--interface"));
                i += 1;
            }
            "--port" | "-p" => {
                config.multicast_port = parse_value(&args, i, "--port");
                i += 1;
            }
            "--private-port" => {
                config.private_port = parse_value(&args, i, "--private-port");
                i += 1;
            }
            "--no-tcp" => config.tcp_enabled = false,
            "--quiet-network" => {
                config = Config {
                    nick: config.nick,
                    interface: config.interface,
                    multicast_port: config.multicast_port,
                    private_port: config.private_port,
                    tcp_enabled: config.tcp_enabled,
                    ..Config::quiet_network()
                };
            }
            "--help" | "-h" => {
                println!("{}", HELP);
                std::process::exit(0);
            }
            other => warn!("알 수 없는 옵션 무시: {}", other),
        }
        i += 1;
    }

    config
}

fn describe(user: &User) -> String {
    let mut text = format!("{} ({})", user.nick, user.code);
    if user.is_me {
        text.push_str(" [나]");
    }
    if user.away {
        text.push_str(&format!(" [자리 비움: {}]", user.away_reason));
    }
    if user.tcp_enabled {
        text.push_str(" [tcp]");
    }
    text
}

/// 이벤트 출력 (crossbeam 수신은 블로킹이므로 별도 스레드)
fn spawn_event_printer(events: crossbeam_channel::Receiver<ChatEvent>) {
    std::thread::spawn(move || {
        for event in events {
            match event {
                ChatEvent::MessageArrived {
                    from,
                    text,
                    private,
                    ..
                } => {
                    if private {
                        println!("*{}* {}", from.nick, text);
                    } else {
                        println!("<{}> {}", from.nick, text);
                    }
                }
                ChatEvent::UserJoined(u) => println!("*** {} 입장", describe(&u)),
                ChatEvent::UserLeft(u) => println!("*** {} 퇴장", u.nick),
                ChatEvent::UserTimedOut(u) => println!("*** {} 연결 끊김 (응답 없음)", u.nick),
                ChatEvent::NickChanged { old, new, .. } => println!("*** {} → {}", old, new),
                ChatEvent::NickCrash { old_nick, new_nick } => {
                    println!("*** 닉네임 {} 사용 중, {}(으)로 변경됨", old_nick, new_nick)
                }
                ChatEvent::TopicChanged(topic) if topic.is_set() => {
                    println!("*** 주제: {} ({})", topic.text, topic.author)
                }
                ChatEvent::AwayChanged(u) if u.away => {
                    println!("*** {} 자리 비움: {}", u.nick, u.away_reason)
                }
                ChatEvent::AwayChanged(u) => println!("*** {} 복귀", u.nick),
                ChatEvent::MeLoggedOn(me) => println!("*** 로그온: {}", describe(&me)),
                ChatEvent::FileOffered(t) => println!(
                    "*** 파일 제안 #{}: {} ({} bytes) from {} - /accept {} <path>",
                    t.id, t.file.name, t.file.size, t.peer_nick, t.id
                ),
                ChatEvent::TransferStatus(t) => {
                    println!("*** 전송 #{} {}: {}", t.id, t.file.name, t.state)
                }
                ChatEvent::TransferProgress(t) => println!(
                    "*** 전송 #{} {}% ({} B/s)",
                    t.id, t.percent, t.bytes_per_sec
                ),
                ChatEvent::NetworkUp { interfaces } => {
                    println!("*** 네트워크: {}", interfaces.join(", "))
                }
                ChatEvent::NetworkLost { reason } => println!("*** 네트워크 끊김: {}", reason),
                _ => {}
            }
        }
    });
}

async fn run_command(node: &ChatNode, line: &str) -> lanchat::Result<bool> {
    let (cmd, rest) = match line.split_once(' ') {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };

    match cmd {
        "/quit" => return Ok(false),
        "/msg" => {
            let (nick, text) = rest.split_once(' ').unwrap_or((rest, ""));
            match node.user_by_nick(nick) {
                Some(user) => node.send_private(user.code, text, 0).await?,
                None => println!("*** 없는 사용자: {}", nick),
            }
        }
        "/nick" => node.change_nick(rest).await?,
        "/away" => node.go_away(rest).await?,
        "/back" => node.come_back().await?,
        "/topic" if rest.is_empty() => {
            let topic = node.topic();
            println!("*** 주제: {} ({})", topic.text, topic.author);
        }
        "/topic" => node.change_topic(rest).await?,
        "/who" => {
            for user in node.users() {
                println!("  {}", describe(&user));
            }
        }
        "/send" => {
            let (nick, path) = rest.split_once(' ').unwrap_or((rest, ""));
            let Some(user) = node.user_by_nick(nick) else {
                println!("*** 없는 사용자: {}", nick);
                return Ok(true);
            };
            let path = PathBuf::from(path.trim());
            let file = tokio::fs::File::open(&path).await?;
            let size = file.metadata().await?.len();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = node.offer_file(user.code, &name, size, file).await?;
            println!("*** 전송 #{} 제안: {} → {}", id, name, user.nick);
        }
        "/accept" => {
            let (id, path) = rest.split_once(' ').unwrap_or((rest, ""));
            let Ok(id) = id.parse::<TransferId>() else {
                println!("*** 전송 번호가 필요함");
                return Ok(true);
            };
            let file = tokio::fs::File::create(path.trim()).await?;
            node.accept_file(id, file).await?;
        }
        "/reject" | "/cancel" => {
            let Ok(id) = rest.parse::<TransferId>() else {
                println!("*** 전송 번호가 필요함");
                return Ok(true);
            };
            if cmd == "/reject" {
                node.reject_file(id).await?;
            } else {
                node.cancel_file(id).await?;
            }
        }
        "/transfers" => {
            for t in node.transfers() {
                println!(
                    "  #{} {:?} {} {} ({}/{} bytes) {}",
                    t.id, t.direction, t.peer_nick, t.file.name, t.transferred, t.file.size, t.state
                );
            }
        }
        _ => println!("*** 알 수 없는 명령: {} (/help는 --help 참조)", cmd),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정 (RUST_LOG 없으면 info)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = parse_args();
    info!("lanchat node starting...");
    info!("Nick: {}", config.nick);
    info!(
        "Group: {}:{}",
        config.multicast_group, config.multicast_port
    );
    if config.tcp_enabled {
        info!("Private TCP port: {}", config.private_port);
    }

    let node = ChatNode::new(config)?;
    spawn_event_printer(node.subscribe());
    node.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                if line.starts_with('/') {
                    match run_command(&node, line).await {
                        Ok(true) => {}
                        Ok(false) => break,
                        Err(e) => println!("*** 오류: {}", e),
                    }
                } else if let Err(e) = node.send_chat(line, 0).await {
                    println!("*** 오류: {}", e);
                }
            }
        }
    }

    node.stop().await;
    info!("lanchat node stopped");
    Ok(())
}
