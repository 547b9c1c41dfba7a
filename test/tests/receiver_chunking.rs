/// FRAME RECEIVER UNDER ARBITRARY SOCKET CHUNKING
use std::io::{self, Read};

use proptest::prelude::*;
use replica_shared::wire::{FrameHandler, FrameHeader, FrameReceiver};

/// Hands out at most `chunk` bytes per read, like a socket delivering small segments
struct ChunkedReader {
    bytes: Vec<u8>,
    position: usize,
    chunk: usize,
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.bytes.len() - self.position;
        let count = remaining.min(self.chunk).min(buf.len());
        buf[..count].copy_from_slice(&self.bytes[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }
}

#[derive(Default)]
struct Counter {
    acks_received: usize,
    pings: usize,
    acks_sent: Vec<i64>,
}

impl FrameHandler for Counter {
    fn on_ack(&mut self, _seqn: i64) {
        self.acks_received += 1;
    }

    fn on_ping(&mut self, _timestamp: i32, _counterpart: i32) {
        self.pings += 1;
    }

    fn send_ack(&mut self, seqn: i64) {
        self.acks_sent.push(seqn);
    }

    fn keep_going(&self) -> bool {
        true
    }
}

fn data_frame(seqn: i64, payload: &[u8]) -> Vec<u8> {
    let mut frame = FrameHeader::Data {
        length: payload.len(),
        seqn,
    }
    .to_bytes()
    .to_vec();
    frame.extend_from_slice(payload);
    frame
}

struct Stream {
    bytes: Vec<u8>,
    data_frames: usize,
    control_frames: usize,
}

// Concatenates length-prefixed messages, cuts the result into data frames of the
// given sizes, repeats every frame flagged as duplicated and inserts control frames
fn build_stream(
    messages: &[Vec<u8>],
    frame_sizes: &[usize],
    duplicates: &[bool],
    controls: &[u8],
) -> Stream {
    let mut payload = Vec::new();
    for message in messages {
        payload.extend_from_slice(&(message.len() as i32).to_le_bytes());
        payload.extend_from_slice(message);
    }

    let mut stream = Stream {
        bytes: Vec::new(),
        data_frames: 0,
        control_frames: 0,
    };
    let mut offset = 0;
    let mut seqn = 0;
    let mut frame_index = 0;
    while offset < payload.len() {
        let size = frame_sizes[frame_index % frame_sizes.len()];
        let end = (offset + size).min(payload.len());
        seqn += 1;
        let frame = data_frame(seqn, &payload[offset..end]);
        stream.bytes.extend_from_slice(&frame);
        stream.data_frames += 1;
        if duplicates[frame_index % duplicates.len()] {
            stream.bytes.extend_from_slice(&frame);
            stream.data_frames += 1;
        }
        match controls[frame_index % controls.len()] {
            1 => {
                stream.bytes.extend_from_slice(&FrameHeader::Ack { seqn }.to_bytes());
                stream.control_frames += 1;
            }
            2 => {
                let ping = FrameHeader::Ping {
                    timestamp: frame_index as i32,
                    counterpart: 0,
                };
                stream.bytes.extend_from_slice(&ping.to_bytes());
                stream.control_frames += 1;
            }
            _ => {}
        }
        offset = end;
        frame_index += 1;
    }
    stream
}

proptest! {
    #[test]
    fn messages_arrive_whole_in_order_once(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..200), 1..20),
        frame_sizes in prop::collection::vec(1usize..64, 1..8),
        duplicates in prop::collection::vec(any::<bool>(), 1..8),
        controls in prop::collection::vec(0u8..3, 1..8),
        chunk in 1usize..40,
    ) {
        let stream = build_stream(&messages, &frame_sizes, &duplicates, &controls);
        let mut receiver = FrameReceiver::new(
            ChunkedReader { bytes: stream.bytes, position: 0, chunk },
            0,
            usize::MAX,
        );
        let mut counter = Counter::default();

        let mut received = Vec::new();
        while let Some(message) = receiver.read_message(&mut counter).unwrap() {
            received.push(message.to_vec());
        }

        prop_assert_eq!(received, messages);
        prop_assert_eq!(counter.acks_sent.len(), stream.data_frames);
        prop_assert_eq!(counter.acks_received + counter.pings, stream.control_frames);
        prop_assert!(counter.acks_sent.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn frames_up_to_the_resume_point_are_skipped(
        messages in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..50), 2..10),
        chunk in 1usize..40,
    ) {
        // one frame per message, the receiver already saw the first one
        let mut bytes = Vec::new();
        for (index, message) in messages.iter().enumerate() {
            let mut payload = (message.len() as i32).to_le_bytes().to_vec();
            payload.extend_from_slice(message);
            bytes.extend(data_frame(index as i64 + 1, &payload));
        }
        let mut receiver = FrameReceiver::new(ChunkedReader { bytes, position: 0, chunk }, 1, usize::MAX);
        let mut counter = Counter::default();

        let mut received = Vec::new();
        while let Some(message) = receiver.read_message(&mut counter).unwrap() {
            received.push(message.to_vec());
        }

        prop_assert_eq!(&received[..], &messages[1..]);
        prop_assert_eq!(receiver.max_received_seqn(), messages.len() as i64);
    }
}
