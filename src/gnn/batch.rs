use ndarray::{concatenate, Array1, Array2, ArrayView2, Axis};

use crate::utils::{DetectorError, Result};

/// One attributed graph: node features, directed `(source, target)` edges,
/// optional per-edge features and an optional one-hot label.
#[derive(Debug, Clone)]
pub struct GraphData {
    pub x: Array2<f32>,
    pub edge_index: Vec<(usize, usize)>,
    pub edge_attr: Option<Array2<f32>>,
    pub y: Option<Array1<f32>>,
}

impl GraphData {
    pub fn new(x: Array2<f32>, edge_index: Vec<(usize, usize)>) -> Self {
        Self {
            x,
            edge_index,
            edge_attr: None,
            y: None,
        }
    }

    pub fn with_edge_attr(mut self, edge_attr: Array2<f32>) -> Self {
        self.edge_attr = Some(edge_attr);
        self
    }

    /// One-hot label over two classes, `1` meaning Ponzi.
    pub fn with_label(mut self, is_ponzi: bool) -> Self {
        let mut y = Array1::zeros(2);
        y[usize::from(is_ponzi)] = 1.0;
        self.y = Some(y);
        self
    }

    pub fn num_nodes(&self) -> usize {
        self.x.nrows()
    }

    pub fn num_edges(&self) -> usize {
        self.edge_index.len()
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.num_nodes();
        if let Some(&(s, t)) = self.edge_index.iter().find(|(s, t)| *s >= n || *t >= n) {
            return Err(DetectorError::ShapeMismatch(format!(
                "edge ({}, {}) out of range for {} nodes",
                s, t, n
            )));
        }
        if let Some(edge_attr) = &self.edge_attr {
            if edge_attr.nrows() != self.num_edges() {
                return Err(DetectorError::ShapeMismatch(format!(
                    "{} edge feature rows for {} edges",
                    edge_attr.nrows(),
                    self.num_edges()
                )));
            }
        }
        Ok(())
    }
}

/// Several graphs merged into one disconnected graph.
///
/// `batch[i]` is the graph that node `i` belongs to.
#[derive(Debug, Clone)]
pub struct GraphBatch {
    pub x: Array2<f32>,
    pub edge_index: Vec<(usize, usize)>,
    pub edge_attr: Option<Array2<f32>>,
    pub batch: Vec<usize>,
    /// `(num_graphs, 2)` labels, present only when every graph is labelled
    pub y: Option<Array2<f32>>,
    pub num_graphs: usize,
}

impl GraphBatch {
    pub fn from_graph(graph: &GraphData) -> Result<Self> {
        Self::collate(std::slice::from_ref(graph))
    }

    pub fn collate(graphs: &[GraphData]) -> Result<Self> {
        let Some(first) = graphs.first() else {
            return Ok(Self {
                x: Array2::zeros((0, 0)),
                edge_index: Vec::new(),
                edge_attr: None,
                batch: Vec::new(),
                y: None,
                num_graphs: 0,
            });
        };

        let feature_size = first.x.ncols();
        let has_edge_attr = first.edge_attr.is_some();
        let labelled = first.y.is_some();

        let mut edge_index = Vec::new();
        let mut batch = Vec::new();
        let mut offset = 0;

        for (i, graph) in graphs.iter().enumerate() {
            graph.validate()?;
            if graph.x.ncols() != feature_size {
                return Err(DetectorError::ShapeMismatch(format!(
                    "graph {} has {} node features, expected {}",
                    i,
                    graph.x.ncols(),
                    feature_size
                )));
            }
            if graph.edge_attr.is_some() != has_edge_attr {
                return Err(DetectorError::ShapeMismatch(format!(
                    "graph {} disagrees with the batch on edge features",
                    i
                )));
            }
            if graph.y.is_some() != labelled {
                let unlabelled = graphs.iter().position(|g| g.y.is_none()).unwrap_or(i);
                return Err(DetectorError::MissingLabel(unlabelled));
            }

            edge_index.extend(graph.edge_index.iter().map(|&(s, t)| (s + offset, t + offset)));
            batch.extend(std::iter::repeat(i).take(graph.num_nodes()));
            offset += graph.num_nodes();
        }

        let xs: Vec<ArrayView2<f32>> = graphs.iter().map(|g| g.x.view()).collect();
        let x = concatenate(Axis(0), &xs)?;

        let edge_attr = if has_edge_attr {
            let views: Vec<ArrayView2<f32>> = graphs
                .iter()
                .filter_map(|g| g.edge_attr.as_ref().map(|e| e.view()))
                .collect();
            Some(concatenate(Axis(0), &views)?)
        } else {
            None
        };

        let y = if labelled {
            let rows: Vec<ArrayView2<f32>> = graphs
                .iter()
                .filter_map(|g| g.y.as_ref().map(|y| y.view().insert_axis(Axis(0))))
                .collect();
            Some(concatenate(Axis(0), &rows)?)
        } else {
            None
        };

        Ok(Self {
            x,
            edge_index,
            edge_attr,
            batch,
            y,
            num_graphs: graphs.len(),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.x.nrows()
    }
}
