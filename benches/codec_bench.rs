//! 메시지 코덱과 세션 처리 벤치마크
//!
//! - 채팅 메시지 인코딩/디코딩 (본문 크기별)
//! - 컨트롤러의 수신 메시지 처리

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lanchat::message::FileRef;
use lanchat::{Config, EventBus, Message, MessageBody, SessionController};

fn chat(len: usize) -> Message {
    let text: String = (0..len).map(|i| (b'a' + (i % 26) as u8) as char).collect();
    Message::new(123_456, "amy", MessageBody::Msg { color: -16777216, text })
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_encode");

    for size in [16, 256, 4_000].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("msg", size), size, |b, &size| {
            let msg = chat(size);
            b.iter(|| black_box(msg.encode()));
        });
    }

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_decode");

    for size in [16, 256, 4_000].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("msg", size), size, |b, &size| {
            let line = chat(size).encode();
            b.iter(|| black_box(Message::decode(&line).unwrap()));
        });
    }

    let file = Message::new(
        42,
        "amy",
        MessageBody::SendFile {
            file: FileRef {
                owner: 42,
                hash: 999,
                name: "a.txt".into(),
            },
            size: 1024,
        },
    )
    .encode();
    group.bench_function("sendfile", |b| b.iter(|| black_box(Message::decode(&file).unwrap())));

    group.finish();
}

fn bench_controller(c: &mut Criterion) {
    let mut group = c.benchmark_group("controller_handle");

    group.bench_function("idle_from_known_peer", |b| {
        let controller = SessionController::with_code(Config::loopback_test(), EventBus::new(), 1);
        controller.log_on().unwrap();
        let ip = Some("192.168.1.20".parse().unwrap());
        controller.handle(&Message::new(2, "bob", MessageBody::Logon), ip);

        let idle = Message::new(2, "bob", MessageBody::Idle);
        b.iter(|| black_box(controller.handle(&idle, ip)));
    });

    group.bench_function("chat_from_known_peer", |b| {
        let controller = SessionController::with_code(Config::loopback_test(), EventBus::new(), 1);
        controller.log_on().unwrap();
        let ip = Some("192.168.1.20".parse().unwrap());
        controller.handle(&Message::new(2, "bob", MessageBody::Logon), ip);

        let msg = chat(64);
        let msg = Message::new(2, "bob", msg.body);
        b.iter(|| black_box(controller.handle(&msg, ip)));
    });

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_controller);
criterion_main!(benches);
