use rand::{Rng, RngCore};
use rand_distr::Distribution;

/// A "generator" that simply counts upwards. Paired with
/// [`VdcUniform`] it drives low-discrepancy quasi-random sampling,
/// where the n-th draw must be the n-th element of the sequence rather
/// than anything random.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequenceRng {
    state: u32,
}

impl SequenceRng {
    pub fn new() -> SequenceRng {
        SequenceRng { state: 0 }
    }
}

impl RngCore for SequenceRng {
    fn next_u32(&mut self) -> u32 {
        let s = self.state;
        self.state = self.state.wrapping_add(1);
        s
    }

    fn next_u64(&mut self) -> u64 {
        self.next_u32() as u64
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        for chunk in dst.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

/// Uniform variates on `[a,b)` from the base-10 Van der Corput
/// sequence: the n-th draw mirrors the decimal digits of n across the
/// decimal point. Consecutive indices from the generator map to a
/// low-discrepancy sequence suitable for inverse-CDF sampling.
#[derive(Clone, Copy, Debug)]
pub struct VdcUniform {
    a: f64,
    b: f64,
}

impl VdcUniform {
    pub fn new(a: f64, b: f64) -> VdcUniform {
        VdcUniform { a, b }
    }
}

impl Default for VdcUniform {
    fn default() -> VdcUniform {
        VdcUniform::new(0.0, 1.0)
    }
}

impl Distribution<f64> for VdcUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let mut n = rng.next_u32();
        let mut r = 0.0;
        let mut k = 0.1;
        while n != 0 {
            r += (n % 10) as f64 * k;
            k /= 10.0;
            n /= 10;
        }
        (self.b - self.a) * r + self.a
    }
}
