use super::*;

#[test]
fn first_send_of_a_name_prepends_a_define_frame() {
    let mut stream = PacketStream::new();
    let bytes = stream.encode("hello", b"hello");

    // define frame: type 0, len 2+4+len("hello")=11, payload = id(100) + "hello"
    let mut expected = Vec::new();
    expected.extend(0u16.to_le_bytes()); // type id 0
    expected.extend(11u32.to_le_bytes()); // payload length
    expected.extend(100u16.to_le_bytes()); // assigned id
    expected.extend(5u32.to_le_bytes()); // name length
    expected.extend(b"hello"); // name bytes
    // packet frame: type 100, len 5, payload "hello"
    expected.extend(100u16.to_le_bytes());
    expected.extend(5u32.to_le_bytes());
    expected.extend(b"hello");

    assert_eq!(bytes, expected);
}

#[test]
fn repeat_send_of_a_name_does_not_redefine_it() {
    let mut stream = PacketStream::new();
    let _ = stream.encode("hello", b"hello");
    let bytes = stream.encode("hello", b"world");

    let mut expected = Vec::new();
    expected.extend(100u16.to_le_bytes());
    expected.extend(5u32.to_le_bytes());
    expected.extend(b"world");
    assert_eq!(bytes, expected);
}

// Scenario S1: sending "hello"/"hello" then "hello"/"world" on the wire,
// decoded back on the receiving side, yields the two packets under the
// same name with no re-announcement in between.
#[test]
fn round_trips_repeated_packet_name_end_to_end() {
    let mut sender = PacketStream::new();
    let mut wire = sender.encode("hello", b"hello");
    wire.extend(sender.encode("hello", b"world"));

    let mut receiver = PacketStream::new();
    let decoded = receiver.feed(&mut wire);

    assert_eq!(
        decoded,
        vec![
            Decoded::Packet {
                name: "hello".to_string(),
                data: b"hello".to_vec(),
            },
            Decoded::Packet {
                name: "hello".to_string(),
                data: b"world".to_vec(),
            },
        ]
    );
    assert!(wire.is_empty());
}

#[test]
fn distinct_names_get_distinct_ids_in_send_order() {
    let mut sender = PacketStream::new();
    let mut wire = sender.encode("first", b"1");
    wire.extend(sender.encode("second", b"2"));
    wire.extend(sender.encode("first", b"1-again"));

    let mut receiver = PacketStream::new();
    let decoded = receiver.feed(&mut wire);

    assert_eq!(
        decoded,
        vec![
            Decoded::Packet { name: "first".to_string(), data: b"1".to_vec() },
            Decoded::Packet { name: "second".to_string(), data: b"2".to_vec() },
            Decoded::Packet { name: "first".to_string(), data: b"1-again".to_vec() },
        ]
    );
}

#[test]
fn partial_frame_is_held_until_the_rest_arrives() {
    let mut sender = PacketStream::new();
    let wire = sender.encode("hello", b"hello");

    let mut receiver = PacketStream::new();
    let split = wire.len() - 3;
    let mut first_chunk = wire[..split].to_vec();
    let decoded_partial = receiver.feed(&mut first_chunk);
    assert!(decoded_partial.is_empty());

    first_chunk.extend_from_slice(&wire[split..]);
    let decoded_full = receiver.feed(&mut first_chunk);
    assert_eq!(
        decoded_full,
        vec![Decoded::Packet {
            name: "hello".to_string(),
            data: b"hello".to_vec(),
        }]
    );
    assert!(first_chunk.is_empty());
}

#[test]
fn undefined_type_id_is_reported_and_does_not_block_later_frames() {
    let mut buf = Vec::new();
    buf.extend(frame(55, b"mystery"));
    buf.extend(frame(DEFINE_PACKET_TYPE_ID, {
        let mut w = Writer::new();
        w.write_u16(100);
        w.write_str("known");
        &w.into_vec()
    }));
    buf.extend(frame(100, b"payload"));

    let mut receiver = PacketStream::new();
    let decoded = receiver.feed(&mut buf);

    assert_eq!(
        decoded,
        vec![
            Decoded::UnknownType { type_id: 55 },
            Decoded::Packet {
                name: "known".to_string(),
                data: b"payload".to_vec(),
            },
        ]
    );
}

#[test]
fn malformed_define_frame_is_reported_and_does_not_panic() {
    let mut buf = frame(DEFINE_PACKET_TYPE_ID, &[0xFF]); // too short to contain an id + name
    let mut receiver = PacketStream::new();
    let decoded = receiver.feed(&mut buf);
    assert_eq!(decoded, vec![Decoded::MalformedControlFrame]);
}

#[test]
fn zero_length_payload_round_trips() {
    let mut sender = PacketStream::new();
    let mut wire = sender.encode("ping", b"");
    let mut receiver = PacketStream::new();
    let decoded = receiver.feed(&mut wire);
    assert_eq!(
        decoded,
        vec![Decoded::Packet {
            name: "ping".to_string(),
            data: Vec::new(),
        }]
    );
}

#[test]
fn highest_known_type_tracks_assignments_on_the_sending_side() {
    let mut sender = PacketStream::new();
    assert_eq!(sender.highest_known_type(), DEFINE_PACKET_TYPE_ID);
    sender.encode("a", b"");
    assert_eq!(sender.highest_known_type(), 100);
    sender.encode("b", b"");
    assert_eq!(sender.highest_known_type(), 101);
    sender.encode("a", b"again"); // already assigned, watermark unchanged
    assert_eq!(sender.highest_known_type(), 101);
}

#[test]
fn highest_known_type_tracks_definitions_learned_on_the_receiving_side() {
    let mut sender = PacketStream::new();
    let mut wire = sender.encode("a", b"");
    let mut receiver = PacketStream::new();
    assert_eq!(receiver.highest_known_type(), DEFINE_PACKET_TYPE_ID);
    receiver.feed(&mut wire);
    assert_eq!(receiver.highest_known_type(), 100);
}
