use serde::Serialize;

use super::batch::GraphBatch;
use super::network::GraphClassifier;
use super::nn::{argmax_rows, cross_entropy};
use crate::utils::{DetectorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    /// Share of graphs whose argmax channel matches the label's
    pub accuracy: f64,
    /// Cross entropy averaged over graphs
    pub mean_loss: f64,
    pub graphs: usize,
}

/// Score `model` over labelled batches.
///
/// Leaves the model in eval mode; call [`GraphClassifier::train`] before
/// resuming training.
pub fn evaluate(model: &mut GraphClassifier, batches: &[GraphBatch]) -> Result<Evaluation> {
    model.eval();

    let mut correct = 0usize;
    let mut loss = 0.0f64;
    let mut graphs = 0usize;

    for batch in batches {
        let labels = batch.y.as_ref().ok_or(DetectorError::MissingLabel(graphs))?;
        let out = model.forward(batch)?;

        let predicted = argmax_rows(&out);
        let expected = argmax_rows(labels);
        correct += predicted.iter().zip(&expected).filter(|(p, e)| p == e).count();

        loss += cross_entropy(&out, labels)? as f64 * batch.num_graphs as f64;
        graphs += batch.num_graphs;
    }

    if graphs == 0 {
        tracing::warn!("Evaluation over an empty dataset");
        return Ok(Evaluation { accuracy: 0.0, mean_loss: 0.0, graphs });
    }

    let evaluation = Evaluation {
        accuracy: correct as f64 / graphs as f64,
        mean_loss: loss / graphs as f64,
        graphs,
    };
    tracing::info!(
        "Evaluated {} graphs: accuracy {:.4}, loss {:.4}",
        graphs,
        evaluation.accuracy,
        evaluation.mean_loss
    );
    Ok(evaluation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gnn::batch::GraphData;
    use crate::gnn::config::GnnConfig;
    use ndarray::array;

    fn config() -> GnnConfig {
        GnnConfig {
            feature_size: 2,
            layers: 1,
            dense_neurons: 4,
            ..GnnConfig::default()
        }
    }

    fn graph(label: bool) -> GraphData {
        GraphData::new(array![[1.0, 0.0], [0.0, 1.0]], vec![(0, 1)]).with_label(label)
    }

    #[test]
    fn test_evaluate_switches_to_eval_mode() {
        let mut model = GraphClassifier::new(&config(), 8).unwrap();
        assert!(model.is_training());

        let batch = GraphBatch::collate(&[graph(true), graph(false)]).unwrap();
        let result = evaluate(&mut model, &[batch]).unwrap();

        assert!(!model.is_training());
        assert_eq!(result.graphs, 2);
        // identical inputs, opposite labels: exactly one is right
        assert_eq!(result.accuracy, 0.5);
        assert!(result.mean_loss > 0.0);
    }

    #[test]
    fn test_loss_weighted_by_batch_size() {
        let mut model = GraphClassifier::new(&config(), 8).unwrap();
        let single = GraphBatch::from_graph(&graph(true)).unwrap();
        let pair = GraphBatch::collate(&[graph(true), graph(true)]).unwrap();

        let one = evaluate(&mut model, &[single.clone()]).unwrap();
        let mixed = evaluate(&mut model, &[single, pair]).unwrap();
        assert_eq!(mixed.graphs, 3);
        assert!((one.mean_loss - mixed.mean_loss).abs() < 1e-6);
        assert_eq!(one.accuracy, mixed.accuracy);
    }

    #[test]
    fn test_unlabelled_batch() {
        let mut model = GraphClassifier::new(&config(), 8).unwrap();
        let batch = GraphBatch::from_graph(&GraphData::new(array![[1.0, 0.0]], vec![])).unwrap();
        assert!(matches!(evaluate(&mut model, &[batch]), Err(DetectorError::MissingLabel(0))));
    }

    #[test]
    fn test_empty_dataset() {
        let mut model = GraphClassifier::new(&config(), 8).unwrap();
        let result = evaluate(&mut model, &[]).unwrap();
        assert_eq!(result.graphs, 0);
        assert_eq!(result.accuracy, 0.0);
    }
}
