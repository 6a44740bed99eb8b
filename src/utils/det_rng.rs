//! Deterministic filler source.
//!
//! Fixture padding must be random enough that a candidate cannot rely on
//! zero-initialized memory, and reproducible enough that a campaign can be
//! replayed from its seed. xorshift64 gives both.

/// xorshift64 generator. Not cryptographically secure.
#[derive(Debug, Clone)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    /// A zero seed is replaced with 1 (xorshift has a zero fixpoint).
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Seed for one candidate address, so verdicts do not depend on probing order.
    #[must_use]
    pub fn for_address(campaign_seed: u64, address: u64) -> Self {
        // splitmix64 finalizer over the pair
        let mut z = campaign_seed ^ address.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        Self::new(z ^ (z >> 31))
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    pub fn fill(&mut self, out: &mut [u8]) {
        for chunk in out.chunks_mut(8) {
            let word = self.next_u64().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }

    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.fill(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_sequence() {
        let mut rng1 = DetRng::new(42);
        let mut rng2 = DetRng::new(42);
        for _ in 0..100 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_zero_seed_handled() {
        let mut rng = DetRng::new(0);
        assert_ne!(rng.next_u64(), 0);
    }

    #[test]
    fn test_per_address_streams_differ() {
        let mut a = DetRng::for_address(7, 0x1000);
        let mut b = DetRng::for_address(7, 0x2000);
        assert_ne!(a.next_u64(), b.next_u64());
        let mut again = DetRng::for_address(7, 0x1000);
        let mut first = DetRng::for_address(7, 0x1000);
        assert_eq!(again.bytes(13), first.bytes(13));
    }
}
