//! Optional end-of-stream checksum (§6): a CRC-32 over frame 0's decoded
//! pixel bytes in plane-major order.

use crc::crc32;

pub struct Checksum {
    state: u32,
}

impl Checksum {
    pub fn new() -> Self {
        Checksum { state: 0 }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.state = crc32::update(self.state, &crc32::IEEE_TABLE, bytes);
    }

    pub fn finish(&self) -> u32 {
        self.state
    }
}

impl Default for Checksum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_incremental_and_one_shot() {
        let mut a = Checksum::new();
        a.update(b"hello ");
        a.update(b"world");

        let mut b = Checksum::new();
        b.update(b"hello world");

        assert_eq!(a.finish(), b.finish());
    }
}
