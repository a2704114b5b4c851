//! Message-passing layers.
//!
//! Every variant works in scatter/gather form: gather per-edge inputs,
//! transform all edges with one matrix product, then sum messages into
//! their destination nodes. Edge order only affects float summation order.

use ndarray::{concatenate, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::Rng;

use super::config::{GnnConfig, LayerKind};
use super::nn::{leaky_relu, scatter_add, sigmoid, softplus, BatchNorm1d, GruCell, Linear, NamedParams};
use crate::utils::{DetectorError, Result};

/// Edge-gated residual convolution.
///
/// For an edge `s -> t` the layer builds `z = [x_t, e_st]`, computes
/// `sigmoid(W_a z) * softplus(W_n z)` and sums those messages at `t`. The
/// node's own features are added back before the optional batch norm.
#[derive(Debug, Clone)]
pub struct EdgeGatedConv {
    channels: usize,
    edge_dim: usize,
    line_attention: Linear,
    line_node: Linear,
    bn: Option<BatchNorm1d>,
}

impl EdgeGatedConv {
    pub fn new(channels: usize, edge_dim: usize, batch_norm: bool, rng: &mut StdRng) -> Self {
        Self {
            channels,
            edge_dim,
            line_attention: Linear::new(channels + edge_dim, channels, true, rng),
            line_node: Linear::new(channels + edge_dim, channels, true, rng),
            bn: batch_norm.then(|| BatchNorm1d::new(channels)),
        }
    }

    pub fn forward(
        &mut self,
        x: &Array2<f32>,
        edge_index: &[(usize, usize)],
        edge_attr: Option<&Array2<f32>>,
        training: bool,
    ) -> Result<Array2<f32>> {
        check_nodes(x, self.channels, edge_index)?;
        match (edge_attr, self.edge_dim) {
            (None, 0) => {}
            (Some(attr), dim) if dim > 0 && attr.ncols() == dim && attr.nrows() == edge_index.len() => {}
            (Some(attr), dim) => {
                return Err(DetectorError::ShapeMismatch(format!(
                    "edge features {:?} for {} edges, layer edge dim {}",
                    attr.dim(),
                    edge_index.len(),
                    dim
                )))
            }
            (None, dim) => {
                return Err(DetectorError::ShapeMismatch(format!(
                    "layer expects {}-wide edge features, none given",
                    dim
                )))
            }
        }

        let mut out = if edge_index.is_empty() {
            Array2::zeros(x.dim())
        } else {
            let targets: Vec<usize> = edge_index.iter().map(|&(_, t)| t).collect();
            let x_i = x.select(Axis(0), &targets);
            let z = match edge_attr {
                Some(attr) => concatenate(Axis(1), &[x_i.view(), attr.view()])?,
                None => x_i,
            };

            let gate = self.line_attention.forward(&z)?.mapv(sigmoid);
            let candidate = self.line_node.forward(&z)?.mapv(softplus);
            scatter_add(&(gate * candidate), &targets, x.nrows())
        };

        out += x;
        match self.bn.as_mut() {
            Some(bn) => bn.forward(&out, training),
            None => Ok(out),
        }
    }

    fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        self.line_attention.collect_params(&format!("{}.line_attention", prefix), out);
        self.line_node.collect_params(&format!("{}.line_node", prefix), out);
        if let Some(bn) = self.bn.as_mut() {
            bn.collect_params(&format!("{}.bn", prefix), out);
        }
    }
}

/// `out_i = W_root x_i + W_rel * sum_{j -> i} x_j + b`
#[derive(Debug, Clone)]
pub struct GraphConv {
    channels: usize,
    lin_rel: Linear,
    lin_root: Linear,
}

impl GraphConv {
    pub fn new(channels: usize, rng: &mut StdRng) -> Self {
        Self {
            channels,
            lin_rel: Linear::new(channels, channels, true, rng),
            lin_root: Linear::new(channels, channels, false, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>, edge_index: &[(usize, usize)]) -> Result<Array2<f32>> {
        check_nodes(x, self.channels, edge_index)?;

        let sources: Vec<usize> = edge_index.iter().map(|&(s, _)| s).collect();
        let targets: Vec<usize> = edge_index.iter().map(|&(_, t)| t).collect();
        let aggregated = scatter_add(&x.select(Axis(0), &sources), &targets, x.nrows());

        Ok(self.lin_rel.forward(&aggregated)? + self.lin_root.forward(x)?)
    }

    fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        self.lin_rel.collect_params(&format!("{}.lin_rel", prefix), out);
        self.lin_root.collect_params(&format!("{}.lin_root", prefix), out);
    }
}

/// Single-head graph attention with one self loop per node.
#[derive(Debug, Clone)]
pub struct AttentionConv {
    channels: usize,
    lin: Linear,
    att_src: Array1<f32>,
    att_dst: Array1<f32>,
    bias: Array1<f32>,
    negative_slope: f32,
}

impl AttentionConv {
    pub fn new(channels: usize, rng: &mut StdRng) -> Self {
        let bound = (6.0 / (1.0 + channels as f32)).sqrt();
        Self {
            channels,
            lin: Linear::new(channels, channels, false, rng),
            att_src: Array1::from_shape_fn(channels, |_| rng.gen_range(-bound..=bound)),
            att_dst: Array1::from_shape_fn(channels, |_| rng.gen_range(-bound..=bound)),
            bias: Array1::zeros(channels),
            negative_slope: 0.2,
        }
    }

    pub fn forward(&self, x: &Array2<f32>, edge_index: &[(usize, usize)]) -> Result<Array2<f32>> {
        check_nodes(x, self.channels, edge_index)?;
        let n = x.nrows();

        let h = self.lin.forward(x)?;
        let alpha_src = h.dot(&self.att_src);
        let alpha_dst = h.dot(&self.att_dst);

        let edges: Vec<(usize, usize)> = edge_index
            .iter()
            .copied()
            .filter(|(s, t)| s != t)
            .chain((0..n).map(|i| (i, i)))
            .collect();

        let scores: Vec<f32> = edges
            .iter()
            .map(|&(s, t)| leaky_relu(alpha_src[s] + alpha_dst[t], self.negative_slope))
            .collect();

        // Softmax over each node's incoming edges
        let mut max = vec![f32::NEG_INFINITY; n];
        for (&(_, t), &score) in edges.iter().zip(&scores) {
            max[t] = max[t].max(score);
        }
        let weights: Vec<f32> = edges
            .iter()
            .zip(&scores)
            .map(|(&(_, t), &score)| (score - max[t]).exp())
            .collect();
        let mut denom = vec![0.0f32; n];
        for (&(_, t), &w) in edges.iter().zip(&weights) {
            denom[t] += w;
        }

        let sources: Vec<usize> = edges.iter().map(|&(s, _)| s).collect();
        let targets: Vec<usize> = edges.iter().map(|&(_, t)| t).collect();
        let mut messages = h.select(Axis(0), &sources);
        for ((mut row, &(_, t)), &w) in messages.rows_mut().into_iter().zip(&edges).zip(&weights) {
            row *= w / denom[t];
        }

        Ok(scatter_add(&messages, &targets, n) + &self.bias)
    }

    fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        self.lin.collect_params(&format!("{}.lin", prefix), out);
        out.push((format!("{}.att_src", prefix), self.att_src.view_mut().into_dyn()));
        out.push((format!("{}.att_dst", prefix), self.att_dst.view_mut().into_dyn()));
        out.push((format!("{}.bias", prefix), self.bias.view_mut().into_dyn()));
    }
}

/// Gated graph convolution.
///
/// Each step transforms every node with its own weight, sums the results
/// of `j -> i` edges at `i`, then updates `x_i` through a shared GRU cell.
#[derive(Debug, Clone)]
pub struct GatedGraphConv {
    channels: usize,
    steps: Vec<Linear>,
    gru: GruCell,
}

impl GatedGraphConv {
    pub fn new(channels: usize, steps: usize, rng: &mut StdRng) -> Self {
        Self {
            channels,
            steps: (0..steps).map(|_| Linear::new(channels, channels, false, rng)).collect(),
            gru: GruCell::new(channels, channels, rng),
        }
    }

    pub fn forward(&self, x: &Array2<f32>, edge_index: &[(usize, usize)]) -> Result<Array2<f32>> {
        check_nodes(x, self.channels, edge_index)?;

        let sources: Vec<usize> = edge_index.iter().map(|&(s, _)| s).collect();
        let targets: Vec<usize> = edge_index.iter().map(|&(_, t)| t).collect();

        let mut h = x.clone();
        for weight in &self.steps {
            let m = weight.forward(&h)?;
            let aggregated = scatter_add(&m.select(Axis(0), &sources), &targets, h.nrows());
            h = self.gru.forward(&aggregated, &h)?;
        }
        Ok(h)
    }

    fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        for (i, weight) in self.steps.iter_mut().enumerate() {
            weight.collect_params(&format!("{}.weight.{}", prefix, i), out);
        }
        self.gru.collect_params(&format!("{}.rnn", prefix), out);
    }
}

/// A message-passing layer of the configured [`LayerKind`].
#[derive(Debug, Clone)]
pub enum MessagePassingLayer {
    EdgeGated(EdgeGatedConv),
    GraphConv(GraphConv),
    Attention(AttentionConv),
    GatedGraph(GatedGraphConv),
}

impl MessagePassingLayer {
    /// Layer of `config.layer_kind` over `config.feature_size` channels.
    pub fn new(config: &GnnConfig, rng: &mut StdRng) -> Self {
        let channels = config.feature_size;
        match config.layer_kind {
            LayerKind::EdgeGated => Self::EdgeGated(EdgeGatedConv::new(
                channels,
                config.layer_edge_dim(),
                config.batch_norm,
                rng,
            )),
            LayerKind::GraphConv => Self::GraphConv(GraphConv::new(channels, rng)),
            LayerKind::Attention => Self::Attention(AttentionConv::new(channels, rng)),
            LayerKind::GatedGraph => Self::GatedGraph(GatedGraphConv::new(channels, config.gated_steps, rng)),
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Self::EdgeGated(_) => LayerKind::EdgeGated,
            Self::GraphConv(_) => LayerKind::GraphConv,
            Self::Attention(_) => LayerKind::Attention,
            Self::GatedGraph(_) => LayerKind::GatedGraph,
        }
    }

    /// Update node features; output has the same shape as `x`.
    ///
    /// Only the edge-gated variant reads `edge_attr`.
    pub fn forward(
        &mut self,
        x: &Array2<f32>,
        edge_index: &[(usize, usize)],
        edge_attr: Option<&Array2<f32>>,
        training: bool,
    ) -> Result<Array2<f32>> {
        match self {
            Self::EdgeGated(layer) => layer.forward(x, edge_index, edge_attr, training),
            Self::GraphConv(layer) => layer.forward(x, edge_index),
            Self::Attention(layer) => layer.forward(x, edge_index),
            Self::GatedGraph(layer) => layer.forward(x, edge_index),
        }
    }

    pub(crate) fn collect_params<'a>(&'a mut self, prefix: &str, out: &mut NamedParams<'a>) {
        match self {
            Self::EdgeGated(layer) => layer.collect_params(prefix, out),
            Self::GraphConv(layer) => layer.collect_params(prefix, out),
            Self::Attention(layer) => layer.collect_params(prefix, out),
            Self::GatedGraph(layer) => layer.collect_params(prefix, out),
        }
    }
}

fn check_nodes(x: &Array2<f32>, channels: usize, edge_index: &[(usize, usize)]) -> Result<()> {
    if x.ncols() != channels {
        return Err(DetectorError::ShapeMismatch(format!(
            "layer has {} channels, node features have {}",
            channels,
            x.ncols()
        )));
    }
    let n = x.nrows();
    if let Some(&(s, t)) = edge_index.iter().find(|(s, t)| *s >= n || *t >= n) {
        return Err(DetectorError::ShapeMismatch(format!(
            "edge ({}, {}) out of range for {} nodes",
            s, t, n
        )));
    }
    Ok(())
}
