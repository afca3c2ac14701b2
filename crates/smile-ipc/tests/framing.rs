//! Malformed datagrams never reach the consumer and never stop the receiver.

use std::net::UdpSocket;
use std::time::Duration;

use smile_core::status::{RecognitionStatus, StatusMessage};
use smile_ipc::datagram::DatagramSubscriber;
use smile_ipc::packet::{self, PACKET_SIZE};
use smile_ipc::StatusSubscriber;

fn raw_sender() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0").unwrap()
}

#[test]
fn garbage_is_dropped_and_valid_frame_still_arrives() {
    let mut sub = DatagramSubscriber::bind("127.0.0.1:0").unwrap();
    let addr = sub.local_addr().unwrap();
    let sender = raw_sender();

    let valid = packet::encode(&StatusMessage::new(RecognitionStatus::Recognizing));
    sender.send_to(&valid, addr).unwrap();
    let first = sub.try_receive(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(first.status, RecognitionStatus::Recognizing);

    let mut wrong_magic = valid;
    wrong_magic[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
    let mut wrong_version = valid;
    wrong_version[4..8].copy_from_slice(&7u32.to_le_bytes());
    let mut unknown_status = valid;
    unknown_status[8..12].copy_from_slice(&(-3i32).to_le_bytes());

    sender.send_to(&wrong_magic, addr).unwrap();
    sender.send_to(&wrong_version, addr).unwrap();
    sender.send_to(&unknown_status, addr).unwrap();
    sender.send_to(&valid[..PACKET_SIZE - 1], addr).unwrap();
    sender.send_to(&[0u8; PACKET_SIZE + 10], addr).unwrap();
    sender.send_to(b"hello", addr).unwrap();

    // Only garbage is queued: the receive times out without touching last_status.
    assert!(sub.try_receive(Duration::from_millis(300)).unwrap().is_none());
    assert_eq!(sub.last_status(), Some(&first));
    assert_eq!(sub.dropped(), 6);

    let success = StatusMessage::new(RecognitionStatus::Success).with_username("alice");
    sender.send_to(&packet::encode(&success), addr).unwrap();
    let got = sub.try_receive(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(got, success);
    assert_eq!(sub.last_status(), Some(&success));
}

#[test]
fn garbage_interleaved_with_valid_frames() {
    let mut sub = DatagramSubscriber::bind("127.0.0.1:0").unwrap();
    let addr = sub.local_addr().unwrap();
    let sender = raw_sender();

    sender.send_to(b"noise", addr).unwrap();
    let failed = StatusMessage::new(RecognitionStatus::Failed);
    sender.send_to(&packet::encode(&failed), addr).unwrap();

    // The bad frame is skipped inside a single receive call.
    let got = sub.try_receive(Duration::from_secs(2)).unwrap().unwrap();
    assert_eq!(got.status, RecognitionStatus::Failed);
    assert_eq!(sub.dropped(), 1);
}
