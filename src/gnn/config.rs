use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::utils::{DetectorError, Result};

/// Which message-passing layer the classifier stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Sigmoid-gated softplus messages with a residual ("RS-GCN")
    #[default]
    #[serde(alias = "RS-GCN")]
    EdgeGated,
    /// Root plus summed-neighbour linear transform
    #[serde(alias = "GCN")]
    GraphConv,
    /// Single-head graph attention with self loops
    #[serde(alias = "GATConv")]
    Attention,
    /// Gated graph convolution: summed neighbour messages fed through a GRU cell
    #[serde(alias = "GGNN")]
    GatedGraph,
}

impl LayerKind {
    pub fn model_name(&self) -> &'static str {
        match self {
            LayerKind::EdgeGated => "RS-GCN",
            LayerKind::GraphConv => "GCN",
            LayerKind::Attention => "GATConv",
            LayerKind::GatedGraph => "GGNN",
        }
    }
}

/// Classifier hyperparameters.
///
/// Field aliases accept the upper-case `MODEL_*` keys used by the training
/// scripts' parameter dictionaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GnnConfig {
    #[serde(alias = "MODEL_FEAT_SIZE")]
    pub feature_size: usize,
    #[serde(alias = "MODEL_LAYERS")]
    pub layers: usize,
    #[serde(alias = "MODEL_DROPOUT_RATE")]
    pub dropout_rate: f32,
    #[serde(alias = "MODEL_DENSE_NEURONS")]
    pub dense_neurons: usize,
    /// Hidden width of the edge encoder
    #[serde(alias = "MODEL_EDGE_DENSE_NEURONS")]
    pub edge_dense_neurons: usize,
    /// Edge width seen by the message-passing layers
    #[serde(alias = "MODEL_EDGE_NEURONS")]
    pub edge_neurons: usize,
    /// Raw edge feature width; 0 disables edge features
    #[serde(alias = "MODEL_EDGE_DIM")]
    pub edge_dim: usize,
    #[serde(alias = "MODEL_OUT_CHANNELS")]
    pub out_channels: usize,
    pub layer_kind: LayerKind,
    /// Batch norm inside each message-passing layer
    pub batch_norm: bool,
    /// Propagation steps per gated graph layer
    pub gated_steps: usize,
}

impl Default for GnnConfig {
    fn default() -> Self {
        Self {
            feature_size: crate::features::NODE_FEATURE_SIZE,
            layers: 3,
            dropout_rate: 0.1,
            dense_neurons: 48,
            edge_dense_neurons: 8,
            edge_neurons: 8,
            edge_dim: 0,
            out_channels: 2,
            layer_kind: LayerKind::EdgeGated,
            batch_norm: true,
            gated_steps: 3,
        }
    }
}

impl GnnConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Loading GNN config from {:?}", path);
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Width of edge features reaching the message-passing layers.
    pub fn layer_edge_dim(&self) -> usize {
        if self.edge_dim > 0 {
            self.edge_neurons
        } else {
            0
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.feature_size == 0 {
            return Err(DetectorError::InvalidConfig("feature_size must be positive".into()));
        }
        if self.dense_neurons == 0 {
            return Err(DetectorError::InvalidConfig("dense_neurons must be positive".into()));
        }
        if self.out_channels != 2 {
            return Err(DetectorError::InvalidConfig(format!(
                "out_channels must be 2 for binary classification, got {}",
                self.out_channels
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(DetectorError::InvalidConfig(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if self.layer_kind == LayerKind::GatedGraph && self.gated_steps == 0 {
            return Err(DetectorError::InvalidConfig("gated_steps must be positive".into()));
        }
        if self.edge_dim > 0 && (self.edge_dense_neurons == 0 || self.edge_neurons == 0) {
            return Err(DetectorError::InvalidConfig(
                "edge encoder widths must be positive when edge_dim is set".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = GnnConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.layer_edge_dim(), 0);
        assert_eq!(config.layer_kind.model_name(), "RS-GCN");
    }

    #[test]
    fn test_training_script_keys() {
        let config = GnnConfig::from_json_str(
            r#"{
                "MODEL_FEAT_SIZE": 100,
                "MODEL_LAYERS": 3,
                "MODEL_DROPOUT_RATE": 0.1,
                "MODEL_DENSE_NEURONS": 48,
                "MODEL_EDGE_DIM": 4,
                "MODEL_OUT_CHANNELS": 2,
                "layer_kind": "GATConv"
            }"#,
        )
        .unwrap();

        assert_eq!(config.feature_size, 100);
        assert_eq!(config.edge_dim, 4);
        assert_eq!(config.layer_edge_dim(), 8);
        assert_eq!(config.layer_kind, LayerKind::Attention);
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = GnnConfig { out_channels: 3, ..GnnConfig::default() };
        assert!(matches!(config.validate(), Err(DetectorError::InvalidConfig(_))));

        let config = GnnConfig { dropout_rate: 1.0, ..GnnConfig::default() };
        assert!(config.validate().is_err());

        let config = GnnConfig { edge_dim: 2, edge_neurons: 0, ..GnnConfig::default() };
        assert!(config.validate().is_err());

        assert!(GnnConfig::from_json_str(r#"{"feature_size": 0}"#).is_err());

        let config = GnnConfig { layer_kind: LayerKind::GatedGraph, gated_steps: 0, ..GnnConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gated_graph_alias() {
        let config = GnnConfig::from_json_str(r#"{"layer_kind": "GGNN"}"#).unwrap();
        assert_eq!(config.layer_kind, LayerKind::GatedGraph);
        assert_eq!(config.layer_kind.model_name(), "GGNN");
        assert_eq!(config.gated_steps, 3);
    }
}
