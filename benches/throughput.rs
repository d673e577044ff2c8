use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use futures::{SinkExt, StreamExt};
use kubemux::{ByteBuffer, Demuxer, StreamMode, WsConnection, channel};
use std::io::Read;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{Message, protocol::Role},
};

const CHUNK_SIZE: usize = 32 * 1024; // Typical kubelet stdout message
const QUICK_SMALL: usize = 1024 * 1024; // 1MB

// Single writer thread feeding a single blocking reader through one buffer
fn buffer_round_trip(total: usize) -> u64 {
    let buffer = Arc::new(ByteBuffer::new(4096, 64 * 1024 * 1024).unwrap());

    let writer = {
        let buffer = Arc::clone(&buffer);
        std::thread::spawn(move || {
            let chunk = vec![42u8; CHUNK_SIZE];
            let mut written = 0;
            while written < total {
                let n = CHUNK_SIZE.min(total - written);
                buffer.write(&chunk[..n]).unwrap();
                written += n;
            }
            buffer.write_end();
        })
    };

    let mut read_buf = vec![0u8; CHUNK_SIZE];
    let mut total_read = 0u64;
    loop {
        match buffer.read(&mut read_buf) {
            0 => break,
            n => total_read += n as u64,
        }
    }
    writer.join().unwrap();
    total_read
}

// stdout of an exec session: kubelet messages through a WebSocket into a channel stream
async fn demux_stdout(total: usize) -> u64 {
    let (client, server) = tokio::io::duplex(8 * 1024 * 1024); // 8MB buffer
    let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let mut kubelet = WebSocketStream::from_raw_socket(server, Role::Server, None).await;

    let demuxer = Demuxer::new(WsConnection::new(client), StreamMode::Exec).unwrap();
    let mut stdout = demuxer.get_stream(Some(channel::STDOUT), None).unwrap();
    demuxer.start().unwrap();

    let reader_handle = tokio::task::spawn_blocking(move || {
        let mut read_buf = vec![0u8; CHUNK_SIZE];
        let mut total_read = 0u64;
        loop {
            match stdout.read(&mut read_buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => total_read += n as u64,
            }
        }
        total_read
    });

    let mut frame = vec![42u8; CHUNK_SIZE + 1];
    frame[0] = channel::STDOUT;
    let mut sent = 0;
    while sent < total {
        kubelet.send(Message::binary(frame.clone())).await.unwrap();
        sent += CHUNK_SIZE;
    }
    let _ = kubelet.close(None).await;

    let received = reader_handle.await.unwrap();
    demuxer.shutdown().await.unwrap();
    received
}

// Same traffic read straight off the socket, for comparison
async fn raw_websocket(total: usize) -> u64 {
    let (client, server) = tokio::io::duplex(8 * 1024 * 1024);
    let mut client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
    let mut kubelet = WebSocketStream::from_raw_socket(server, Role::Server, None).await;

    let reader_handle = tokio::spawn(async move {
        let mut total_read = 0u64;
        while let Some(Ok(message)) = client.next().await {
            match message {
                Message::Binary(data) => total_read += (data.len() - 1) as u64,
                Message::Close(_) => break,
                _ => {}
            }
        }
        total_read
    });

    let mut frame = vec![42u8; CHUNK_SIZE + 1];
    frame[0] = channel::STDOUT;
    let mut sent = 0;
    while sent < total {
        kubelet.send(Message::binary(frame.clone())).await.unwrap();
        sent += CHUNK_SIZE;
    }
    let _ = kubelet.close(None).await;

    reader_handle.await.unwrap()
}

fn bench_byte_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("byte_buffer");

    group.sample_size(10);
    group.measurement_time(std::time::Duration::from_secs(2));
    group.throughput(Throughput::Bytes(QUICK_SMALL as u64));

    group.bench_function("1MB_write_read", |b| {
        b.iter(|| black_box(buffer_round_trip(QUICK_SMALL)))
    });

    group.finish();
}

fn bench_demux(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("demux");

    group.sample_size(10);
    group.measurement_time(std::time::Duration::from_secs(5));
    group.throughput(Throughput::Bytes(QUICK_SMALL as u64));

    group.bench_function("1MB_stdout", |b| {
        b.iter(|| rt.block_on(async { black_box(demux_stdout(QUICK_SMALL).await) }))
    });

    group.bench_function("1MB_raw_websocket", |b| {
        b.iter(|| rt.block_on(async { black_box(raw_websocket(QUICK_SMALL).await) }))
    });

    group.finish();
}

criterion_group!(benches, bench_byte_buffer, bench_demux);
criterion_main!(benches);
