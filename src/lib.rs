pub mod constants;
pub mod error;
pub mod pred;
pub mod resumable;

pub mod rangecoder;
pub use rangecoder::RangeCoder;

pub mod checksum;
pub mod varint;

pub mod maniac;
pub mod ranges;
pub mod transforms;

pub mod frame;

pub mod header;
pub mod secondary_header;
pub mod output;

pub mod decoder;
pub use decoder::{DecodeStatus, Decoder};
