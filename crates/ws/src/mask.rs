//! Payload masking.
//!
//! Client-to-server payloads are XORed with a 4-byte key, cycling through the
//! key by payload offset. Because XOR is its own inverse the same routine
//! masks and unmasks.
//!
//! A frame payload can arrive split over any number of reads, so the position
//! within the key has to survive between calls: [`Mask`] carries it. The
//! hot loop processes the word-aligned interior of each slice 4 bytes at a
//! time and falls back to byte-wise XOR for the unaligned head and tail.

/// A masking key plus the rolling offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mask {
    key: [u8; 4],
    pos: usize,
}

impl Mask {
    pub fn new(key: [u8; 4]) -> Self {
        Self { key, pos: 0 }
    }

    pub fn key(&self) -> [u8; 4] {
        self.key
    }

    /// Offset of the next byte within the key, always in `0..4`.
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// XORs `buf` in place, continuing from wherever the previous call
    /// stopped.
    pub fn apply(&mut self, buf: &mut [u8]) {
        // SAFETY: every bit pattern is a valid u32 and align_to_mut only
        // hands out the correctly aligned interior of the slice.
        let (head, words, tail) = unsafe { buf.align_to_mut::<u32>() };

        self.apply_bytes(head);

        if !words.is_empty() {
            let word = self.word();
            for w in words.iter_mut() {
                *w ^= word;
            }
            // whole words leave the offset unchanged
        }

        self.apply_bytes(tail);
    }

    #[inline]
    fn apply_bytes(&mut self, bytes: &mut [u8]) {
        for b in bytes {
            *b ^= self.key[self.pos];
            self.pos = (self.pos + 1) & 3;
        }
    }

    /// The key rotated to the current offset, in native byte order so that a
    /// single XOR on an in-memory word matches four byte-wise XORs.
    #[inline]
    fn word(&self) -> u32 {
        let k = self.key;
        let p = self.pos;
        u32::from_ne_bytes([k[p], k[(p + 1) & 3], k[(p + 2) & 3], k[(p + 3) & 3]])
    }
}

/// Masks (or unmasks) a whole payload starting at key offset zero.
pub fn apply_mask(buf: &mut [u8], key: [u8; 4]) {
    Mask::new(key).apply(buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn naive(buf: &mut [u8], key: [u8; 4]) {
        for (i, b) in buf.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }

    #[test]
    fn zero_key_is_identity() {
        let mut data = *b"hi";
        apply_mask(&mut data, [0, 0, 0, 0]);
        assert_eq!(&data, b"hi");
    }

    #[test]
    fn rfc_example() {
        // RFC 6455 5.7: masked "Hello"
        let mut data = [0x7f, 0x9f, 0x4d, 0x51, 0x58];
        apply_mask(&mut data, [0x37, 0xfa, 0x21, 0x3d]);
        assert_eq!(&data, b"Hello");
    }

    #[test]
    fn matches_naive_on_unaligned_subslices() {
        let key = [0xde, 0xad, 0xbe, 0xef];
        let backing: Vec<u8> = (0..=255u8).cycle().take(1031).collect();
        for start in 0..8 {
            let mut fast = backing.clone();
            let mut slow = backing.clone();
            apply_mask(&mut fast[start..], key);
            naive(&mut slow[start..], key);
            assert_eq!(fast, slow, "start offset {start}");
        }
    }

    #[test]
    fn split_calls_keep_key_position() {
        let key = [1, 2, 3, 4];
        let original: Vec<u8> = (0..97).collect();

        let mut whole = original.clone();
        apply_mask(&mut whole, key);

        let mut pieces = original.clone();
        let mut mask = Mask::new(key);
        let (a, rest) = pieces.split_at_mut(3);
        let (b, c) = rest.split_at_mut(41);
        mask.apply(a);
        mask.apply(b);
        mask.apply(c);

        assert_eq!(pieces, whole);
        assert_eq!(mask.offset(), 97 % 4);
    }

    proptest! {
        #[test]
        fn mask_is_an_involution(payload in proptest::collection::vec(any::<u8>(), 0..512), key in any::<[u8; 4]>(), split in 0usize..512) {
            let mut data = payload.clone();
            apply_mask(&mut data, key);

            let split = split.min(data.len());
            let mut mask = Mask::new(key);
            let (head, tail) = data.split_at_mut(split);
            mask.apply(head);
            mask.apply(tail);

            prop_assert_eq!(data, payload);
        }
    }
}
