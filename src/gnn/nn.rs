//! Dense building blocks shared by the message-passing layers and the
//! classifier head.

use ndarray::{s, Array1, Array2, ArrayViewMutD, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use crate::utils::{DetectorError, Result};

pub type NamedParams<'a> = Vec<(String, ArrayViewMutD<'a, f32>)>;

/// Fully connected layer, `y = x Wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    /// `(out_features, in_features)`
    pub weight: Array2<f32>,
    pub bias: Option<Array1<f32>>,
}

impl Linear {
    /// Uniform init in `±1/sqrt(in_features)` for weight and bias.
    pub fn new(in_features: usize, out_features: usize, bias: bool, rng: &mut StdRng) -> Self {
        let bound = if in_features > 0 {
            1.0 / (in_features as f32).sqrt()
        } else {
            0.0
        };
        let weight = Array2::from_shape_fn((out_features, in_features), |_| {
            rng.gen_range(-bound..=bound)
        });
        let bias = bias.then(|| Array1::from_shape_fn(out_features, |_| rng.gen_range(-bound..=bound)));
        Self { weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Result<Array2<f32>> {
        if x.ncols() != self.in_features() {
            return Err(DetectorError::ShapeMismatch(format!(
                "linear layer expects {} input features, got {}",
                self.in_features(),
                x.ncols()
            )));
        }
        let mut y = x.dot(&self.weight.t());
        if let Some(bias) = &self.bias {
            y += bias;
        }
        Ok(y)
    }

    pub(crate) fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        out.push((format!("{}.weight", prefix), self.weight.view_mut().into_dyn()));
        if let Some(bias) = self.bias.as_mut() {
            out.push((format!("{}.bias", prefix), bias.view_mut().into_dyn()));
        }
    }
}

/// GRU cell with gate rows stacked as reset, update, candidate.
#[derive(Debug, Clone)]
pub struct GruCell {
    hidden_size: usize,
    /// Input projection, `(3 * hidden, input)`
    pub input: Linear,
    /// Hidden projection, `(3 * hidden, hidden)`
    pub hidden: Linear,
}

impl GruCell {
    pub fn new(input_size: usize, hidden_size: usize, rng: &mut StdRng) -> Self {
        Self {
            hidden_size,
            input: Linear::new(input_size, 3 * hidden_size, true, rng),
            hidden: Linear::new(hidden_size, 3 * hidden_size, true, rng),
        }
    }

    /// One step: `h' = (1 - z) * n + z * h`.
    pub fn forward(&self, x: &Array2<f32>, h: &Array2<f32>) -> Result<Array2<f32>> {
        let c = self.hidden_size;
        let gi = self.input.forward(x)?;
        let gh = self.hidden.forward(h)?;

        let r = (&gi.slice(s![.., ..c]) + &gh.slice(s![.., ..c])).mapv(sigmoid);
        let z = (&gi.slice(s![.., c..2 * c]) + &gh.slice(s![.., c..2 * c])).mapv(sigmoid);
        let n = (&gi.slice(s![.., 2 * c..]) + &(&r * &gh.slice(s![.., 2 * c..]))).mapv(f32::tanh);

        Ok(&n + &(&z * &(h - &n)))
    }

    pub(crate) fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        self.input.collect_params(&format!("{}.input", prefix), out);
        self.hidden.collect_params(&format!("{}.hidden", prefix), out);
    }
}

/// Per-feature batch normalization with running statistics.
#[derive(Debug, Clone)]
pub struct BatchNorm1d {
    pub weight: Array1<f32>,
    pub bias: Array1<f32>,
    pub running_mean: Array1<f32>,
    pub running_var: Array1<f32>,
    eps: f32,
    momentum: f32,
}

impl BatchNorm1d {
    pub fn new(features: usize) -> Self {
        Self {
            weight: Array1::ones(features),
            bias: Array1::zeros(features),
            running_mean: Array1::zeros(features),
            running_var: Array1::ones(features),
            eps: 1e-5,
            momentum: 0.1,
        }
    }

    pub fn features(&self) -> usize {
        self.weight.len()
    }

    /// Training mode normalizes with batch statistics and updates the running
    /// estimates; eval mode uses the running estimates only.
    pub fn forward(&mut self, x: &Array2<f32>, training: bool) -> Result<Array2<f32>> {
        if x.ncols() != self.features() {
            return Err(DetectorError::ShapeMismatch(format!(
                "batch norm expects {} features, got {}",
                self.features(),
                x.ncols()
            )));
        }

        let (mean, var) = if training {
            let n = x.nrows();
            if n <= 1 {
                return Err(DetectorError::ShapeMismatch(format!(
                    "batch norm needs more than 1 value per channel when training, got {}",
                    n
                )));
            }
            let mean = x.sum_axis(Axis(0)) / n as f32;
            let centered = x - &mean;
            let var = (&centered * &centered).sum_axis(Axis(0)) / n as f32;

            let unbiased = &var * (n as f32 / (n - 1) as f32);
            self.running_mean = &self.running_mean * (1.0 - self.momentum) + &mean * self.momentum;
            self.running_var = &self.running_var * (1.0 - self.momentum) + unbiased * self.momentum;
            (mean, var)
        } else {
            (self.running_mean.clone(), self.running_var.clone())
        };

        let scale = &self.weight / &var.mapv(|v| (v + self.eps).sqrt());
        Ok((x - &mean) * &scale + &self.bias)
    }

    pub(crate) fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        out.push((format!("{}.weight", prefix), self.weight.view_mut().into_dyn()));
        out.push((format!("{}.bias", prefix), self.bias.view_mut().into_dyn()));
    }
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// `ln(1 + eˣ)`, linear above 20 like torch's default threshold.
pub fn softplus(x: f32) -> f32 {
    if x > 20.0 {
        x
    } else {
        x.exp().ln_1p()
    }
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

pub fn leaky_relu(x: f32, negative_slope: f32) -> f32 {
    if x >= 0.0 {
        x
    } else {
        x * negative_slope
    }
}

/// Inverted dropout: zero with probability `p`, scale survivors by `1/(1-p)`.
pub fn dropout(x: &mut Array2<f32>, p: f32, rng: &mut StdRng) {
    if p <= 0.0 {
        return;
    }
    if p >= 1.0 {
        x.fill(0.0);
        return;
    }
    let keep = 1.0 / (1.0 - p);
    x.mapv_inplace(|v| if rng.gen::<f32>() < p { 0.0 } else { v * keep });
}

/// Sum rows of `messages` into `num_nodes` buckets chosen by `index`.
pub fn scatter_add(messages: &Array2<f32>, index: &[usize], num_nodes: usize) -> Array2<f32> {
    let mut out = Array2::zeros((num_nodes, messages.ncols()));
    for (row, &target) in messages.rows().into_iter().zip(index) {
        let mut slot = out.row_mut(target);
        slot += &row;
    }
    out
}

/// Elementwise max over the nodes of each graph; graphs without nodes pool to zeros.
pub fn global_max_pool(x: &Array2<f32>, batch: &[usize], num_graphs: usize) -> Array2<f32> {
    let mut out = Array2::from_elem((num_graphs, x.ncols()), f32::NEG_INFINITY);
    let mut seen = vec![false; num_graphs];
    for (row, &graph) in x.rows().into_iter().zip(batch) {
        seen[graph] = true;
        let mut slot = out.row_mut(graph);
        slot.zip_mut_with(&row, |acc, &v| *acc = acc.max(v));
    }
    for (graph, present) in seen.into_iter().enumerate() {
        if !present {
            out.row_mut(graph).fill(0.0);
        }
    }
    out
}

/// Index of the first maximum in each row.
pub fn argmax_rows(x: &Array2<f32>) -> Vec<usize> {
    x.rows()
        .into_iter()
        .map(|row| {
            let mut best = 0;
            for (i, &v) in row.iter().enumerate() {
                if v > row[best] {
                    best = i;
                }
            }
            best
        })
        .collect()
}

/// Cross entropy with probability targets, averaged over rows.
///
/// Inputs are treated as unnormalized scores and pass through log-softmax first.
pub fn cross_entropy(input: &Array2<f32>, target: &Array2<f32>) -> Result<f32> {
    if input.dim() != target.dim() {
        return Err(DetectorError::ShapeMismatch(format!(
            "cross entropy input {:?} vs target {:?}",
            input.dim(),
            target.dim()
        )));
    }
    if input.nrows() == 0 {
        return Ok(0.0);
    }

    let mut total = 0.0;
    for (scores, labels) in input.rows().into_iter().zip(target.rows()) {
        let max = scores.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let log_sum = scores.fold(0.0, |acc, &v| acc + (v - max).exp()).ln() + max;
        total -= scores
            .iter()
            .zip(labels.iter())
            .map(|(&s, &y)| y * (s - log_sum))
            .sum::<f32>();
    }
    Ok(total / input.nrows() as f32)
}
