use vsockd_codec::packet::Packet;
use vsockd_codec::Error;

#[test]
fn rejects_truncated_header() {
    let bytes = [0u8; 10];
    assert!(matches!(Packet::decode(&bytes), Err(Error::InvalidInput)));
}

#[test]
fn rejects_unknown_type_tag() {
    let mut bytes = vec![0u8; 24];
    bytes[16..18].copy_from_slice(&99u16.to_be_bytes());
    match Packet::decode(&bytes) {
        Err(Error::UnknownType(99)) => {}
        other => panic!("expected UnknownType(99), got {other:?}"),
    }
}

#[test]
fn rejects_length_mismatch() {
    // type_tag 0 (REQUEST) expects an 8-byte body; declaring 4 lands on a
    // known type with the wrong length rather than a truncated buffer.
    let mut bytes = vec![0u8; 28];
    bytes[16..18].copy_from_slice(&0u16.to_be_bytes());
    bytes[20..24].copy_from_slice(&4u32.to_be_bytes());
    assert!(matches!(Packet::decode(&bytes), Err(Error::LengthMismatch)));
}
