use super::{BufMut, OwnedBuf};
use crate::protocol::Endianness;

#[test]
fn stores_and_reads_frames_with_alignment() {
    let mut buf = OwnedBuf::with_endianness(Endianness::LITTLE);
    buf.store(1u8);
    buf.store(2u32);
    buf.store(3u64);

    assert_eq!(buf.get(), &[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 0, 0, 0, 0]);

    let mut read = buf.read_buf(buf.len());
    assert_eq!(read.load::<u8>().unwrap(), 1);
    assert_eq!(read.load::<u32>().unwrap(), 2);
    assert_eq!(read.load::<u64>().unwrap(), 3);
    assert!(read.is_empty());
}

#[test]
fn big_endian_round_trip() {
    let mut buf = OwnedBuf::with_endianness(Endianness::BIG);
    buf.store(0x0102_0304u32);

    assert_eq!(buf.get(), &[1, 2, 3, 4]);

    let mut read = buf.read_buf(buf.len());
    assert_eq!(read.load::<u32>().unwrap(), 0x0102_0304);
}

#[test]
fn spare_and_advance_round_trip() {
    let mut buf = OwnedBuf::new();
    let spare = buf.spare_mut(4);
    spare.copy_from_slice(&[10, 20, 30, 40]);
    assert_eq!(buf.get(), &[10, 20, 30, 40]);

    buf.advance(2);
    assert_eq!(buf.get(), &[30, 40]);

    buf.compact();
    assert_eq!(buf.get(), &[30, 40]);
}

#[test]
fn clears_once_fully_consumed() {
    let mut buf = OwnedBuf::new();
    buf.store(1u8);
    buf.advance(1);
    assert!(buf.is_empty());
    assert_eq!(buf.len(), 0);
}
