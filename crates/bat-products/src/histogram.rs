//! N-dimensional histograms over labelled, unit-tagged edge axes.

use std::ops::Range;

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn, Slice};

use crate::error::{Error, Result};
use crate::units::{Quantity, Unit};

/// Relative tolerance used when matching bin edges.
const EDGE_TOLERANCE: f64 = 1e-9;

fn same_edge(a: f64, b: f64) -> bool {
    (a - b).abs() <= EDGE_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

/// One histogram axis: a label and `n + 1` monotonic edges.
#[derive(Debug, Clone, PartialEq)]
pub struct BinAxis {
    label: String,
    edges: Quantity,
}

impl BinAxis {
    pub fn new(label: &str, edges: Quantity) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::invalid(format!(
                "axis {label} needs at least two edges"
            )));
        }
        let v = edges.values();
        if (1..v.len()).any(|i| v[i] < v[i - 1]) {
            return Err(Error::invalid(format!(
                "edges of axis {label} must be non-decreasing"
            )));
        }
        Ok(BinAxis {
            label: label.to_string(),
            edges,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn edges(&self) -> &Quantity {
        &self.edges
    }

    pub fn unit(&self) -> &Unit {
        self.edges.unit()
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions of each of `edges` within this axis' edges.
    pub(crate) fn edge_indices(&self, edges: &[f64]) -> Result<Vec<usize>> {
        let own = self.edges.values();
        edges
            .iter()
            .map(|&e| {
                own.iter().position(|&o| same_edge(o, e)).ok_or_else(|| {
                    Error::invalid(format!(
                        "edge {e} is not an existing edge of axis {}",
                        self.label
                    ))
                })
            })
            .collect()
    }
}

/// Histogram contents with one [`BinAxis`] per array dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    axes: Vec<BinAxis>,
    contents: ArrayD<f64>,
    unit: Unit,
}

impl Histogram {
    pub fn new(axes: Vec<BinAxis>, contents: ArrayD<f64>, unit: Unit) -> Result<Self> {
        let expected: Vec<usize> = axes.iter().map(BinAxis::len).collect();
        if contents.shape() != expected.as_slice() {
            return Err(Error::invalid(format!(
                "contents shape {:?} does not match axes {:?}",
                contents.shape(),
                expected
            )));
        }
        Ok(Histogram {
            axes,
            contents,
            unit,
        })
    }

    /// A histogram of zeros over `axes`.
    pub fn zeros(axes: Vec<BinAxis>, unit: Unit) -> Self {
        let shape: Vec<usize> = axes.iter().map(BinAxis::len).collect();
        Histogram {
            axes,
            contents: ArrayD::zeros(IxDyn(&shape)),
            unit,
        }
    }

    pub fn axes(&self) -> &[BinAxis] {
        &self.axes
    }

    pub fn axis(&self, label: &str) -> Option<&BinAxis> {
        self.axes.iter().find(|a| a.label == label)
    }

    pub fn axis_index(&self, label: &str) -> Result<usize> {
        self.axes
            .iter()
            .position(|a| a.label == label)
            .ok_or_else(|| Error::invalid(format!("histogram has no axis {label}")))
    }

    pub fn labels(&self) -> Vec<&str> {
        self.axes.iter().map(BinAxis::label).collect()
    }

    pub fn contents(&self) -> &ArrayD<f64> {
        &self.contents
    }

    pub fn contents_mut(&mut self) -> &mut ArrayD<f64> {
        &mut self.contents
    }

    pub fn into_contents(self) -> ArrayD<f64> {
        self.contents
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn shape(&self) -> &[usize] {
        self.contents.shape()
    }

    pub fn sum(&self) -> f64 {
        self.contents.sum()
    }

    /// Sum out every axis not named in `labels`. Kept axes retain their
    /// original order.
    pub fn project(&self, labels: &[&str]) -> Result<Histogram> {
        for label in labels {
            self.axis_index(label)?;
        }
        let mut contents = self.contents.clone();
        let mut axes = Vec::with_capacity(labels.len());
        for (i, axis) in self.axes.iter().enumerate().rev() {
            if labels.contains(&axis.label.as_str()) {
                axes.push(axis.clone());
            } else {
                contents = contents.sum_axis(Axis(i));
            }
        }
        axes.reverse();
        Histogram::new(axes, contents, self.unit.clone())
    }

    /// Merge bins of `label` onto `edges`, which must all be existing edges
    /// of that axis. Bins outside the new range are dropped.
    pub fn rebin_axis(&self, label: &str, edges: &Quantity) -> Result<Histogram> {
        let ax = self.axis_index(label)?;
        let axis = &self.axes[ax];
        let new_edges = edges.to(axis.unit())?;
        let new_axis = BinAxis::new(label, new_edges)?;
        let idx = axis.edge_indices(&new_axis.edges.to_vec())?;
        if idx.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::invalid(format!(
                "new edges of axis {label} must be strictly increasing"
            )));
        }

        let merged: Vec<ArrayD<f64>> = idx
            .windows(2)
            .map(|w| {
                self.contents
                    .slice_axis(Axis(ax), Slice::from(w[0]..w[1]))
                    .sum_axis(Axis(ax))
            })
            .collect();
        let views: Vec<ArrayViewD<f64>> = merged.iter().map(|a| a.view()).collect();
        let contents = ndarray::stack(Axis(ax), &views)?;

        let mut axes = self.axes.clone();
        axes[ax] = new_axis;
        log::debug!(
            "rebinned axis {label}: {} -> {} bins",
            axis.len(),
            axes[ax].len()
        );
        Histogram::new(axes, contents, self.unit.clone())
    }

    /// Keep bins `range` of axis `label`.
    pub fn slice(&self, label: &str, range: Range<usize>) -> Result<Histogram> {
        let ax = self.axis_index(label)?;
        let axis = &self.axes[ax];
        if range.start >= range.end || range.end > axis.len() {
            return Err(Error::invalid(format!(
                "bin range {range:?} out of bounds for axis {label} with {} bins",
                axis.len()
            )));
        }
        let edges = axis.edges.values().slice(ndarray::s![range.start..=range.end]);
        let new_axis = BinAxis::new(label, Quantity::new(edges.to_owned(), axis.unit().clone()))?;
        let contents = self
            .contents
            .slice_axis(Axis(ax), Slice::from(range))
            .to_owned();
        let mut axes = self.axes.clone();
        axes[ax] = new_axis;
        Histogram::new(axes, contents, self.unit.clone())
    }

    /// Multiply every bin by `factor`.
    pub fn scale(&self, factor: f64) -> Histogram {
        Histogram {
            axes: self.axes.clone(),
            contents: &self.contents * factor,
            unit: self.unit.clone(),
        }
    }

    /// Replace the unit of the contents without touching values.
    pub fn with_unit(mut self, unit: Unit) -> Histogram {
        self.unit = unit;
        self
    }

    /// Stack histograms with identical axes along a new leading axis
    /// `label` with the given `edges`.
    pub fn concatenate(hists: &[Histogram], label: &str, edges: Quantity) -> Result<Histogram> {
        let first = hists
            .first()
            .ok_or_else(|| Error::invalid("nothing to concatenate"))?;
        if edges.len() != hists.len() + 1 {
            return Err(Error::invalid(format!(
                "{} histograms need {} edges, got {}",
                hists.len(),
                hists.len() + 1,
                edges.len()
            )));
        }
        if hists.iter().any(|h| h.axes != first.axes) {
            return Err(Error::invalid("histograms have different axes"));
        }
        let views: Vec<ArrayViewD<f64>> = hists.iter().map(|h| h.contents.view()).collect();
        let contents = ndarray::stack(Axis(0), &views)?;
        let mut axes = Vec::with_capacity(first.axes.len() + 1);
        axes.push(BinAxis::new(label, edges)?);
        axes.extend(first.axes.iter().cloned());
        Histogram::new(axes, contents, first.unit.clone())
    }
}
