//! Network transport loopback tests: TCP fan-out isolation, marker
//! resynchronization over a real socket, UDP fragmentation end-to-end.

use drishti_stream::container::{self, Frame};
use drishti_stream::error::Error;
use drishti_stream::streaming::{
    FrameReceiver, FrameServer, PacerConfig, UdpFrameReceiver, UdpFrameSender, UdpReceiverConfig,
};
use std::io::Write;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sample_frame(seq: u8) -> Frame {
    Frame {
        width: 64,
        height: 16,
        timestamp: seq as f64 * 0.1,
        parts: vec![vec![seq; 300], vec![seq.wrapping_mul(7); 120]],
    }
}

/// Poll until the server sees `n` clients; connection setup is asynchronous.
fn wait_for_clients(server: &FrameServer, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while server.client_count() < n {
        assert!(Instant::now() < deadline, "clients never connected");
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn test_tcp_fanout_delivers_to_all_clients() {
    let mut server = FrameServer::bind("127.0.0.1:0", 4).unwrap();
    let spec = format!("127.0.0.1@{}", server.local_addr().port());

    let mut clients: Vec<FrameReceiver> = (0..3).map(|_| FrameReceiver::connect(&spec).unwrap()).collect();
    wait_for_clients(&server, 3);

    let frames: Vec<Frame> = (0..5).map(sample_frame).collect();
    for frame in &frames {
        server.write(frame).unwrap();
    }

    for client in clients.iter_mut() {
        for expected in &frames {
            let got = client.read().unwrap();
            assert_eq!(&got, expected);
        }
    }

    server.close();
}

#[test]
fn test_tcp_client_failure_is_isolated() {
    let mut server = FrameServer::bind("127.0.0.1:0", 4).unwrap();
    let spec = format!("127.0.0.1@{}", server.local_addr().port());

    let mut survivor_a = FrameReceiver::connect(&spec).unwrap();
    let mut survivor_b = FrameReceiver::connect(&spec).unwrap();
    let casualty = FrameReceiver::connect(&spec).unwrap();
    wait_for_clients(&server, 3);

    // Forcibly close one client's socket mid-stream.
    casualty.close();
    drop(casualty);

    let frames: Vec<Frame> = (10..16).map(sample_frame).collect();
    for frame in &frames {
        server.write(frame).unwrap();
        std::thread::sleep(Duration::from_millis(5));
    }

    // The other two clients still get every frame.
    for client in [&mut survivor_a, &mut survivor_b] {
        for expected in &frames {
            let got = client.read().unwrap();
            assert_eq!(&got, expected);
        }
    }

    server.close();
}

#[test]
fn test_tcp_slot_limit_refuses_excess_clients() {
    let mut server = FrameServer::bind("127.0.0.1:0", 1).unwrap();
    let spec = format!("127.0.0.1@{}", server.local_addr().port());

    let mut first = FrameReceiver::connect(&spec).unwrap();
    wait_for_clients(&server, 1);
    let mut second = FrameReceiver::connect(&spec).unwrap();

    // Give the accept thread time to refuse the second connection.
    std::thread::sleep(Duration::from_millis(100));

    let frame = sample_frame(42);
    server.write(&frame).unwrap();

    assert_eq!(first.read().unwrap(), frame);
    match second.read_timeout(Duration::from_millis(300)) {
        Ok(Some(got)) => panic!("refused client received a frame: {:?}", got.timestamp),
        Ok(None) | Err(_) => {}
    }

    server.close();
}

#[test]
fn test_tcp_receiver_resyncs_on_split_marker_and_garbage() {
    // A raw socket stands in for the sender so the byte boundaries are under
    // test control: garbage prefix, then a frame split inside its marker.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let spec = format!("127.0.0.1@{}", listener.local_addr().unwrap().port());

    let frame = sample_frame(9);
    let bytes = container::serialize(&frame);

    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        stream.write_all(&[0xBAu8; 513]).unwrap(); // garbage
        stream.write_all(&bytes[..7]).unwrap(); // marker cut in half
        stream.flush().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        stream.write_all(&bytes[7..]).unwrap();
        stream
    });

    let mut receiver = FrameReceiver::connect(&spec).unwrap();
    let got = receiver.read().unwrap();
    assert_eq!(got, frame);

    let _stream = handle.join().unwrap();
}

#[test]
fn test_tcp_receiver_reports_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let spec = format!("127.0.0.1@{}", listener.local_addr().unwrap().port());

    let handle = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream); // immediate close
    });

    let mut receiver = FrameReceiver::connect(&spec).unwrap();
    handle.join().unwrap();

    match receiver.read() {
        Err(Error::Disconnected) | Err(Error::Io(_)) => {}
        other => panic!("expected a stream failure, got {:?}", other.map(|f| f.timestamp)),
    }
}

#[test]
fn test_udp_fragmented_frames_end_to_end() {
    let running = Arc::new(AtomicBool::new(true));
    let config = UdpReceiverConfig {
        bind_addr: "127.0.0.1:0".to_string(),
        app_id: 7,
    };
    let (mut receiver, frames_rx) =
        UdpFrameReceiver::bind(config, Arc::clone(&running)).unwrap();
    let dest = receiver.local_addr().unwrap();

    let recv_handle = std::thread::spawn(move || receiver.run());

    // Small packets force several fragments per frame.
    let pacer = PacerConfig {
        max_rate_bps: 500_000_000,
        packet_size: 200,
        burst_log2: 2,
        app_id: 7,
    };
    let mut sender = UdpFrameSender::new(dest, pacer).unwrap();

    // Consume as we send: the completed-frame channel is intentionally
    // shallow and would shed frames if nobody were reading.
    let frames: Vec<Frame> = (0..5).map(sample_frame).collect();
    for expected in &frames {
        sender.write(expected).unwrap();
        let got = frames_rx
            .recv_timeout(Duration::from_secs(2))
            .expect("frame never arrived");
        assert_eq!(&got, expected);
    }

    sender.close();
    running.store(false, Ordering::Relaxed);
    recv_handle.join().unwrap().unwrap();
}
