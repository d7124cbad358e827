use nalgebra::SVector;

/// Running mean and variance of N-component samples.
#[derive(Debug, Clone)]
pub struct Welford<const N: usize> {
    count: u32,
    mean: SVector<f32, N>,
    m2: SVector<f32, N>,
}

impl<const N: usize> Default for Welford<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Welford<N> {
    pub fn new() -> Self {
        Self {
            count: 0,
            mean: SVector::zeros(),
            m2: SVector::zeros(),
        }
    }

    pub fn update(&mut self, x: &SVector<f32, N>) {
        self.count += 1;
        let n = self.count as f32;

        for i in 0..N {
            let delta = x[i] - self.mean[i];
            self.mean[i] += delta / n;
            let delta2 = x[i] - self.mean[i];
            self.m2[i] += delta * delta2;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mean(&self) -> SVector<f32, N> {
        self.mean
    }

    /// Population variance, `None` before the first sample.
    pub fn variance(&self) -> Option<SVector<f32, N>> {
        if self.count > 0 {
            Some(self.m2 / self.count as f32)
        } else {
            None
        }
    }

    pub fn variance_magnitude(&self) -> Option<f32> {
        self.variance().map(|v| v.magnitude())
    }
}
