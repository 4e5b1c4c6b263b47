use bytes::BytesMut;
use usbcan_proto::encode::{encode_can_frame, encode_legacy_config, encode_status};
use usbcan_proto::{
    decode, CanFrame, CanId, Engine, Gateway, Packet, ProtocolConfig, ProtocolStatus, Queue,
};

#[derive(Default)]
struct Counting {
    input: Vec<u8>,
    configured: usize,
    transmitted: usize,
    written: Vec<u8>,
}

impl Gateway for Counting {
    fn transmit_can(&mut self, _frame: &CanFrame) {
        self.transmitted += 1;
    }

    fn apply_configuration(&mut self, _config: &ProtocolConfig) {
        self.configured += 1;
    }

    fn query_status(&mut self) -> ProtocolStatus {
        ProtocolStatus::default()
    }

    fn write_bytes(&mut self, data: &[u8]) {
        self.written.extend_from_slice(data);
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.input.len());
        buf[..count].copy_from_slice(&self.input[..count]);
        self.input.drain(..count);
        count
    }
}

#[test]
fn standard_frame_without_payload() {
    let decoded = decode(&[0xAA, 0xC0, 0x12, 0x34, 0x55]);
    assert_eq!(decoded.consumed, 5);
    assert_eq!(
        decoded.packet,
        Some(Packet::Transmit(CanFrame::new(CanId::Standard(0x3412), &[]).unwrap()))
    );
}

#[test]
fn extended_frame_waits_for_missing_bytes() {
    let complete = [0xAA, 0xE1, 0x12, 0x34, 0x56, 0x78, 0xAB, 0x55];
    for end in 0..complete.len() {
        assert_eq!(decode(&complete[..end]).consumed, 0, "prefix of {} bytes", end);
    }
    assert_eq!(decode(&complete).consumed, complete.len());
}

#[test]
fn status_response_bytes() {
    let mut buf = BytesMut::new();
    encode_status(
        &ProtocolStatus {
            rx_errors: 3,
            tx_errors: 7,
        },
        &mut buf,
    );

    let mut expected = vec![0xAA, 0x55, 0x04, 0x03, 0x07];
    expected.extend(std::iter::repeat(0x00).take(14));
    expected.push(0x0A);
    assert_eq!(buf.to_vec(), expected);
}

#[test]
fn queue_rejects_the_sixty_fifth_frame() {
    let mut queue: Queue<CanFrame, 64> = Queue::new();
    let frames: Vec<CanFrame> = (0..65u16)
        .map(|i| CanFrame::new(CanId::Standard(i), &i.to_le_bytes()).unwrap())
        .collect();

    for frame in &frames[..64] {
        assert!(queue.push(*frame).is_ok());
    }
    assert_eq!(queue.push(frames[64]), Err(frames[64]));

    let drained: Vec<CanFrame> = std::iter::from_fn(|| queue.pop()).collect();
    assert_eq!(drained, frames[..64].to_vec());
}

#[test]
fn corrupted_legacy_config_is_consumed_silently() {
    let mut packet = BytesMut::new();
    encode_legacy_config(&ProtocolConfig::default(), &mut packet);
    packet[19] ^= 0xFF;

    assert_eq!(decode(&packet).consumed, 20);
    assert_eq!(decode(&packet).packet, None);

    let mut engine = Engine::new(Counting {
        input: packet.to_vec(),
        ..Counting::default()
    });
    engine.run();
    assert_eq!(engine.gateway().configured, 0);
    assert!(engine.gateway().written.is_empty());
}

#[test]
fn frames_round_trip() {
    let payload = [0x10, 0x21, 0x32, 0x43, 0x54, 0x65, 0x76, 0x87];
    for id in [CanId::Standard(0x5A5), CanId::Extended(0x1555_AAAA)] {
        for len in 0..=payload.len() {
            let frame = CanFrame::new(id, &payload[..len]).unwrap();
            let mut buf = BytesMut::new();
            encode_can_frame(&frame, &mut buf);
            let encoded_len = buf.len();
            // Trailing bytes must not be touched.
            buf.extend_from_slice(&[0xAA, 0x55, 0x00]);

            let decoded = decode(&buf);
            assert_eq!(decoded.consumed, encoded_len);
            assert_eq!(decoded.packet, Some(Packet::Transmit(frame)));
        }
    }
}

#[test]
fn resync_skips_to_marker() {
    let noise = [0x01u8, 0x55, 0x13, 0xC0, 0x00, 0x7F, 0x99];
    assert_eq!(decode(&noise).consumed, noise.len());

    for k in 1..noise.len() {
        let mut data = noise[..k].to_vec();
        data.extend_from_slice(&[0xAA, 0xC0, 0x00, 0x00, 0x55]);
        assert_eq!(decode(&data).consumed, k);
    }
}

#[test]
fn interleaved_stream_through_engine() {
    let mut input = Vec::new();
    let mut frame_buf = BytesMut::new();
    for i in 0..10u32 {
        let frame = CanFrame::new(CanId::Extended(i << 8), &i.to_be_bytes()).unwrap();
        encode_can_frame(&frame, &mut frame_buf);
    }
    input.extend_from_slice(&[0x00, 0xFF]);
    input.extend_from_slice(&frame_buf);

    let mut engine = Engine::new(Counting {
        input,
        ..Counting::default()
    });
    engine.run();
    engine.run();
    assert_eq!(engine.gateway().transmitted, 10);
}

#[test]
fn stray_legacy_header_does_not_swallow_frame() {
    let mut input = vec![0xAA, 0x55, 0x77];
    input.extend_from_slice(&[0xAA, 0xC0, 0x12, 0x34, 0x55]);

    let mut engine = Engine::new(Counting {
        input,
        ..Counting::default()
    });
    engine.run();
    assert_eq!(engine.gateway().transmitted, 1);
    assert_eq!(engine.buffered(), 0);
}
