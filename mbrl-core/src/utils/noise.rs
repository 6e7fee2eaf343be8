use crate::{error::Result, rng::RNG};
use candle_core::{Device, Tensor};
use rand::Rng;

/// Temporally correlated exploration noise for continuous actions.
#[derive(Debug, Clone)]
pub struct OrnsteinUhlenbeckNoise {
    mu: f32,
    theta: f32,
    sigma: f32,
    state: Vec<f32>,
}

impl OrnsteinUhlenbeckNoise {
    pub fn new(action_dim: usize, mu: f32, theta: f32, sigma: f32) -> Self {
        Self {
            mu,
            theta,
            sigma,
            state: vec![mu; action_dim],
        }
    }

    pub fn with_defaults(action_dim: usize) -> Self {
        Self::new(action_dim, 0., 0.15, 0.2)
    }

    pub fn reset(&mut self) {
        self.state.fill(self.mu);
    }

    /// Advances the process by one step and returns its new value.
    pub fn sample(&mut self) -> &[f32] {
        RNG.with_borrow_mut(|rng| {
            for x in self.state.iter_mut() {
                *x += self.theta * (self.mu - *x) + self.sigma * standard_normal(rng);
            }
        });
        &self.state
    }

    pub fn sample_tensor(&mut self, device: &Device) -> Result<Tensor> {
        let dim = self.state.len();
        Ok(Tensor::from_slice(self.sample(), dim, device)?)
    }
}

// Box-Muller
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    let u1: f32 = rng.random_range(f32::EPSILON..1.);
    let u2: f32 = rng.random();
    (-2. * u1.ln()).sqrt() * (2. * std::f32::consts::PI * u2).cos()
}

#[cfg(test)]
mod test {
    use super::OrnsteinUhlenbeckNoise;
    use crate::rng::seed_rng;
    use candle_core::Device;

    #[test]
    fn reset_returns_to_the_mean() {
        seed_rng(7);
        let mut noise = OrnsteinUhlenbeckNoise::new(3, 0.5, 0.15, 0.2);
        let first = noise.sample().to_vec();
        assert_eq!(first.len(), 3);
        assert!(first.iter().any(|x| *x != 0.5));
        noise.reset();
        assert_eq!(noise.state, vec![0.5; 3]);
    }

    #[test]
    fn without_diffusion_the_process_decays_to_the_mean() {
        let mut noise = OrnsteinUhlenbeckNoise::new(2, 1., 0.5, 0.);
        noise.state = vec![3., -1.];
        let next = noise.sample().to_vec();
        assert_eq!(next, vec![2., 0.]);
        let tensor = noise.sample_tensor(&Device::Cpu).unwrap();
        assert_eq!(tensor.to_vec1::<f32>().unwrap(), vec![1.5, 0.5]);
    }

    #[test]
    fn same_seed_same_noise() {
        seed_rng(11);
        let a = OrnsteinUhlenbeckNoise::with_defaults(4).sample().to_vec();
        seed_rng(11);
        let b = OrnsteinUhlenbeckNoise::with_defaults(4).sample().to_vec();
        assert_eq!(a, b);
    }
}
