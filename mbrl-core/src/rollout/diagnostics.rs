use crate::{dynamics::ModelPrediction, error::Result, transition::Transition};
use candle_core::{DType, Tensor};
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    pub max: f32,
    pub min: f32,
    pub mean: f32,
}

impl ErrorStats {
    /// Statistics of `|expected - predicted|` over every element.
    pub fn absolute(expected: &Tensor, predicted: &Tensor) -> Result<Self> {
        let error = expected
            .to_dtype(DType::F32)?
            .to_device(predicted.device())?
            .sub(&predicted.to_dtype(DType::F32)?)?
            .abs()?
            .flatten_all()?;
        Ok(Self {
            max: error.max(0)?.to_scalar::<f32>()?,
            min: error.min(0)?.to_scalar::<f32>()?,
            mean: error.mean_all()?.to_scalar::<f32>()?,
        })
    }
}

impl Display for ErrorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "max {:.4} min {:.4} mean {:.4}",
            self.max, self.min, self.mean
        )
    }
}

/// How far the model's first step lands from what the real environment did for the same seeds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionDiagnostics {
    pub state: ErrorStats,
    pub reward: ErrorStats,
}

impl PredictionDiagnostics {
    pub fn measure(seeds: &[&Transition], prediction: &ModelPrediction) -> Result<Self> {
        let next_states: Vec<&Tensor> = seeds.iter().map(|t| &t.state1).collect();
        let next_states = Tensor::stack(&next_states, 0)?;
        let rewards: Vec<f32> = seeds.iter().flat_map(|t| t.reward.iter().copied()).collect();
        let rewards = Tensor::from_vec(rewards, prediction.rewards.shape(), prediction.rewards.device())?;
        Ok(Self {
            state: ErrorStats::absolute(&next_states, &prediction.next_states)?,
            reward: ErrorStats::absolute(&rewards, &prediction.rewards)?,
        })
    }
}
