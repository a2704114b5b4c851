use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::batch::GraphBatch;
use super::config::GnnConfig;
use super::layer::MessagePassingLayer;
use super::nn::{argmax_rows, dropout, global_max_pool, relu, sigmoid, BatchNorm1d, Linear, NamedParams};
use crate::utils::{DetectorError, Result};

/// Two stacked linear layers mapping raw edge attributes to the layer edge width.
#[derive(Debug, Clone)]
pub struct EdgeEncoder {
    linear1: Linear,
    linear2: Linear,
}

impl EdgeEncoder {
    fn new(config: &GnnConfig, rng: &mut StdRng) -> Self {
        Self {
            linear1: Linear::new(config.edge_dim, config.edge_dense_neurons, true, rng),
            linear2: Linear::new(config.edge_dense_neurons, config.edge_neurons, true, rng),
        }
    }

    fn forward(&self, edge_attr: &Array2<f32>) -> Result<Array2<f32>> {
        self.linear2.forward(&self.linear1.forward(edge_attr)?)
    }
}

/// Graph-level binary classifier.
///
/// Output channels are squashed independently with a sigmoid, so a row is
/// not a probability distribution; callers pick the argmax channel.
#[derive(Debug, Clone)]
pub struct GraphClassifier {
    config: GnnConfig,
    edge_encoder: Option<EdgeEncoder>,
    layers: Vec<MessagePassingLayer>,
    linear1: Linear,
    bn: BatchNorm1d,
    linear2: Linear,
    training: bool,
    rng: StdRng,
}

impl GraphClassifier {
    /// Build with parameters drawn from a generator seeded by `seed`; dropout
    /// masks come from the same generator.
    pub fn new(config: &GnnConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let edge_encoder = (config.edge_dim > 0).then(|| EdgeEncoder::new(config, &mut rng));
        let layers = (0..config.layers)
            .map(|_| MessagePassingLayer::new(config, &mut rng))
            .collect();
        let linear1 = Linear::new(config.feature_size, config.dense_neurons, true, &mut rng);
        let linear2 = Linear::new(config.dense_neurons, config.out_channels, true, &mut rng);

        tracing::info!(
            "Built {} classifier: {} layers, {} features, edge dim {}",
            config.layer_kind.model_name(),
            config.layers,
            config.feature_size,
            config.edge_dim
        );

        Ok(Self {
            config: config.clone(),
            edge_encoder,
            layers,
            linear1,
            bn: BatchNorm1d::new(config.dense_neurons),
            linear2,
            training: true,
            rng,
        })
    }

    pub fn config(&self) -> &GnnConfig {
        &self.config
    }

    pub fn model_name(&self) -> &'static str {
        self.config.layer_kind.model_name()
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Per-graph sigmoid scores, shape `(num_graphs, out_channels)`.
    pub fn forward(&mut self, batch: &GraphBatch) -> Result<Array2<f32>> {
        self.check_divergence()?;
        if batch.num_graphs == 0 {
            return Ok(Array2::zeros((0, self.config.out_channels)));
        }
        if batch.x.ncols() != self.config.feature_size {
            return Err(DetectorError::ShapeMismatch(format!(
                "model expects {} node features, batch has {}",
                self.config.feature_size,
                batch.x.ncols()
            )));
        }
        if batch.batch.len() != batch.x.nrows() {
            return Err(DetectorError::ShapeMismatch(format!(
                "batch index covers {} nodes, features have {}",
                batch.batch.len(),
                batch.x.nrows()
            )));
        }
        if let Some(&graph) = batch.batch.iter().find(|&&g| g >= batch.num_graphs) {
            return Err(DetectorError::ShapeMismatch(format!(
                "node assigned to graph {} of {}",
                graph, batch.num_graphs
            )));
        }

        let edge_attr = match (&self.edge_encoder, &batch.edge_attr) {
            (Some(encoder), Some(attr)) => Some(encoder.forward(attr)?),
            (Some(_), None) => {
                return Err(DetectorError::ShapeMismatch(format!(
                    "model expects {}-wide edge features, batch has none",
                    self.config.edge_dim
                )))
            }
            (None, _) => None,
        };

        let mut x = batch.x.clone();
        for layer in self.layers.iter_mut() {
            x = layer.forward(&x, &batch.edge_index, edge_attr.as_ref(), self.training)?;
        }

        let mut h = global_max_pool(&x, &batch.batch, batch.num_graphs);
        if self.training {
            dropout(&mut h, self.config.dropout_rate, &mut self.rng);
        }
        let h = self.linear1.forward(&h)?.mapv(relu);
        let h = self.bn.forward(&h, self.training)?;
        let logits = self.linear2.forward(&h)?;

        Ok(logits.mapv(sigmoid))
    }

    /// Argmax class per graph, `1` meaning Ponzi.
    pub fn predict(&mut self, batch: &GraphBatch) -> Result<Vec<usize>> {
        Ok(argmax_rows(&self.forward(batch)?))
    }

    fn check_divergence(&self) -> Result<()> {
        let mean = self.linear2.weight.mean().unwrap_or(f32::NAN);
        if !mean.is_finite() {
            tracing::warn!("Output layer weights diverged (mean {})", mean);
            return Err(DetectorError::Diverged(format!(
                "mean of output layer weight is {}",
                mean
            )));
        }
        Ok(())
    }

    /// Mutable views of every learnable tensor, for an external optimizer.
    pub fn named_parameters_mut(&mut self) -> NamedParams<'_> {
        let mut params = Vec::new();
        if let Some(encoder) = self.edge_encoder.as_mut() {
            encoder.linear1.collect_params("linear_edge1", &mut params);
            encoder.linear2.collect_params("linear_edge2", &mut params);
        }
        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.collect_params(&format!("gnn_layers.{}", i), &mut params);
        }
        self.linear1.collect_params("linear1", &mut params);
        self.bn.collect_params("bn2", &mut params);
        self.linear2.collect_params("linear2", &mut params);
        params
    }
}
