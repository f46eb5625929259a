//! Seeded random number generation.
//!
//! A small xorshift generator keeps weight initialization and mini-batch
//! shuffling reproducible from the `seed` field of a network description.

/// Substituted for a zero seed, which would lock xorshift at zero.
const ZERO_SEED_STATE: u64 = 0x9e3779b97f4a7c15;

/// Xorshift PRNG; the same seed always yields the same sequence.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { ZERO_SEED_STATE } else { seed },
        }
    }

    fn advance(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// High 32 bits of the next state.
    pub fn next_u32(&mut self) -> u32 {
        (self.advance() >> 32) as u32
    }

    /// Uniform sample in [0, 1), using 24 bits so the result is exact in f32.
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    /// Uniform sample in [low, high).
    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Integer sample in [0, upper); 0 when `upper` is 0.
    pub fn gen_usize(&mut self, upper: usize) -> usize {
        match upper {
            0 => 0,
            _ => self.next_u32() as usize % upper,
        }
    }

    /// Fills `values` with Xavier/Glorot uniform samples in
    /// [-sqrt(6 / (fan_in + fan_out)), sqrt(6 / (fan_in + fan_out))).
    pub fn fill_xavier(&mut self, values: &mut [f32], fan_in: usize, fan_out: usize) {
        let limit = (6.0f32 / (fan_in + fan_out).max(1) as f32).sqrt();
        values
            .iter_mut()
            .for_each(|value| *value = self.gen_range_f32(-limit, limit));
    }

    /// In-place Fisher-Yates shuffle.
    pub fn shuffle_usize(&mut self, data: &mut [usize]) {
        for i in (1..data.len()).rev() {
            let j = self.gen_usize(i + 1);
            data.swap(i, j);
        }
    }
}
