//! Black-box coverage of the pull decoder's public surface: magic/header
//! rejection, `NeedMoreInput` suspension through the plain-byte primary
//! header and range-coder init, and resumability across arbitrary byte
//! chunking (spec's dominant invariant — no input byte may be consumed
//! twice and no state lost across suspension). Bit-exact, fully-decoded
//! end-to-end pixel scenarios are covered at the component level instead
//! (colocated `#[cfg(test)]` modules in `ranges.rs`, `maniac.rs`,
//! `pred.rs`, `transforms.rs`, `header.rs`, `secondary_header.rs`,
//! `rangecoder/*`): hand-authoring bit-exact RAC-coded fixtures for a
//! whole stream without an encoder to generate them would be guesswork,
//! not test coverage.

extern crate flif16;

use flif16::{DecodeStatus, Decoder};

// "FLIF" + ia=3/planes=1 (still, non-interlaced, grayscale) + bpc='1'
// (8-bit) + width-1=0 + height-1=0 + metadata terminator.
const MINIMAL_STILL_HEADER: &[u8] = &[b'F', b'L', b'I', b'F', 0x31, 0x31, 0x00, 0x00, 0x00];

#[test]
fn rejects_bad_magic() {
    let mut d = Decoder::new();
    let err = d.decode(b"XLIF\x31\x31\x00\x00\x00").unwrap_err();
    assert_eq!(format!("{}", err).is_empty(), false);
}

#[test]
fn needs_more_input_on_empty_stream() {
    let mut d = Decoder::new();
    let status = d.decode(&[]).unwrap();
    assert!(matches!(status, DecodeStatus::NeedMoreInput));
}

#[test]
fn needs_more_input_mid_magic() {
    let mut d = Decoder::new();
    let status = d.decode(b"FL").unwrap();
    assert!(matches!(status, DecodeStatus::NeedMoreInput));
}

#[test]
fn needs_more_input_after_full_header_before_rac_init() {
    // The header alone parses cleanly, but the range coder still needs
    // its 3-byte init fill before secondary-header parsing can start.
    let mut d = Decoder::new();
    let status = d.decode(MINIMAL_STILL_HEADER).unwrap();
    assert!(matches!(status, DecodeStatus::NeedMoreInput));
}

#[test]
fn header_parsing_is_resumable_one_byte_at_a_time() {
    // Feeding the same bytes in one-byte increments must reach the same
    // "still waiting past the header" state as feeding them all at once,
    // with no byte consumed twice and no error raised along the way.
    let mut d = Decoder::new();
    for &b in MINIMAL_STILL_HEADER {
        let status = d.decode(&[b]).unwrap();
        assert!(matches!(status, DecodeStatus::NeedMoreInput));
    }
}

#[test]
fn header_parsing_is_resumable_at_every_split_point() {
    // The resumability invariant (spec §8): decoding `input[..k]` then
    // `input[k..]` must behave the same as decoding `input` in one shot,
    // for every split point k. Exercised here over the header bytes,
    // which are the portion of the stream constructible without a
    // bit-exact arithmetic encoder.
    for k in 0..=MINIMAL_STILL_HEADER.len() {
        let mut d = Decoder::new();
        let first = d.decode(&MINIMAL_STILL_HEADER[..k]).unwrap();
        assert!(matches!(first, DecodeStatus::NeedMoreInput));
        let second = d.decode(&MINIMAL_STILL_HEADER[k..]).unwrap();
        assert!(matches!(second, DecodeStatus::NeedMoreInput));
    }
}

#[test]
fn rejects_invalid_ia_nibble() {
    // ia must be in 3..=6; 0 is neither a valid still nor animated mode.
    let mut d = Decoder::new();
    let bytes = [b'F', b'L', b'I', b'F', 0x01, 0x31, 0x00, 0x00, 0x00];
    let err = d.decode(&bytes).unwrap_err();
    assert_eq!(format!("{}", err).is_empty(), false);
}

#[test]
fn metadata_chunk_is_skipped_without_affecting_header_fields() {
    let bytes = [
        b'F', b'L', b'I', b'F', 0x31, 0x31, 0x00, 0x00, // fixed fields, 1x1 gray8
        b'x', b'x', b'x', // 3-byte tag
        0x02, // varint len = 2
        0xAA, 0xBB, // payload, skipped verbatim
        0x00, // terminator
    ];
    let mut d = Decoder::new();
    // Past the header the decoder is waiting on the range coder's 3-byte
    // init fill, same as the no-metadata case — the metadata chunk must
    // not have perturbed anything past itself.
    let status = d.decode(&bytes).unwrap();
    assert!(matches!(status, DecodeStatus::NeedMoreInput));
}
