use crate::real;

/// The linear congruential generator word2vec has always used.
///
/// There is no shared generator: every training worker builds its own from
/// the run's base seed, its worker id and the epoch number.
#[derive(Debug, Clone)]
pub struct Rng(u64);

impl Rng {
    pub fn new(seed: u64) -> Self {
        Rng(seed)
    }

    /// Generator for worker `worker` during epoch `epoch`.
    pub fn for_worker(seed: u64, worker: usize, epoch: usize) -> Self {
        // splitmix64 finalizer, so that neighboring workers start far apart
        let mut z = seed
            .wrapping_add((worker as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .wrapping_add((epoch as u64).wrapping_mul(0xD1B5_4A32_D192_ED03));
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Rng(z ^ (z >> 31))
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(25214903917).wrapping_add(11);
        self.0
    }

    /// Get a uniformly distributed random number in `0.0 .. 1.0`.
    pub fn next_float(&mut self) -> real {
        (self.next_u64() & 0xFFFF) as real / 65536.0
    }
}
