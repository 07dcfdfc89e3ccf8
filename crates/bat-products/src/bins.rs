//! Time and energy binning, and the histogram state that bundles them.

use crate::error::{Error, Result};
use crate::histogram::Histogram;
use crate::units::{Dimension, Quantity, Unit};

/// Contiguous or gapped time intervals with their midpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBins {
    start: Quantity,
    stop: Quantity,
    center: Quantity,
}

impl TimeBins {
    /// Build from parallel start/stop values. `stop` is converted into the
    /// unit of `start`.
    pub fn new(start: Quantity, stop: Quantity) -> Result<Self> {
        if start.unit().dimension() != Dimension::Time {
            return Err(Error::invalid(format!(
                "time bins need a time unit, got '{}'",
                start.unit()
            )));
        }
        let stop = stop.to(start.unit())?;
        if start.len() != stop.len() {
            return Err(Error::invalid(format!(
                "{} bin starts but {} bin stops",
                start.len(),
                stop.len()
            )));
        }
        let s = start.values();
        if (1..s.len()).any(|i| s[i] < s[i - 1]) {
            return Err(Error::invalid("time bin starts must be non-decreasing"));
        }
        let center = start.midpoints(&stop)?;
        Ok(TimeBins {
            start,
            stop,
            center,
        })
    }

    /// Contiguous bins from `n + 1` edges.
    pub fn from_edges(edges: &Quantity) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::invalid("time binning needs at least two edges"));
        }
        let v = edges.to_vec();
        let n = v.len();
        TimeBins::new(
            Quantity::from_vec(v[..n - 1].to_vec(), edges.unit().clone()),
            Quantity::from_vec(v[1..].to_vec(), edges.unit().clone()),
        )
    }

    pub fn start(&self) -> &Quantity {
        &self.start
    }

    pub fn stop(&self) -> &Quantity {
        &self.stop
    }

    pub fn center(&self) -> &Quantity {
        &self.center
    }

    pub fn len(&self) -> usize {
        self.start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_empty()
    }

    /// Histogram edges: every start plus the final stop.
    pub fn edges(&self) -> Quantity {
        let mut v = self.start.to_vec();
        v.extend(self.stop.last());
        Quantity::from_vec(v, self.start.unit().clone())
    }

    /// Earliest start and latest stop, in the bins' unit.
    pub fn span(&self) -> Option<(f64, f64)> {
        let lo = self.start.first()?;
        let hi = self.stop.values().iter().copied().fold(f64::MIN, f64::max);
        Some((lo, hi))
    }
}

/// Energy channels with their lower and upper bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyBins {
    index: Vec<i64>,
    min: Quantity,
    max: Quantity,
}

impl EnergyBins {
    pub fn new(index: Vec<i64>, min: Quantity, max: Quantity) -> Result<Self> {
        if min.unit().dimension() != Dimension::Energy {
            return Err(Error::invalid(format!(
                "energy bins need an energy unit, got '{}'",
                min.unit()
            )));
        }
        let max = max.to(min.unit())?;
        if index.len() != min.len() || min.len() != max.len() {
            return Err(Error::invalid(format!(
                "energy bins have {} indices, {} minima and {} maxima",
                index.len(),
                min.len(),
                max.len()
            )));
        }
        if min
            .values()
            .iter()
            .zip(max.values().iter())
            .any(|(lo, hi)| lo >= hi)
        {
            return Err(Error::invalid("every energy bin needs min < max"));
        }
        Ok(EnergyBins { index, min, max })
    }

    /// Contiguous bins from `n + 1` edges, indexed from 1.
    pub fn from_edges(edges: &Quantity) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::invalid("energy binning needs at least two edges"));
        }
        let v = edges.to_vec();
        let n = v.len() - 1;
        EnergyBins::new(
            (1..=n as i64).collect(),
            Quantity::from_vec(v[..n].to_vec(), edges.unit().clone()),
            Quantity::from_vec(v[1..].to_vec(), edges.unit().clone()),
        )
    }

    /// Bins from parallel lower and upper bounds, indexed from 1.
    pub fn from_bounds(min: Quantity, max: Quantity) -> Result<Self> {
        let index = (1..=min.len() as i64).collect();
        EnergyBins::new(index, min, max)
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn min(&self) -> &Quantity {
        &self.min
    }

    pub fn max(&self) -> &Quantity {
        &self.max
    }

    pub fn unit(&self) -> &Unit {
        self.min.unit()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Histogram edges: every minimum plus the final maximum.
    pub fn edges(&self) -> Quantity {
        let mut v = self.min.to_vec();
        v.extend(self.max.last());
        Quantity::from_vec(v, self.min.unit().clone())
    }

    /// `(min, max)` pairs in keV.
    pub fn bounds_kev(&self) -> Result<Vec<(f64, f64)>> {
        let lo = self.min.values_in(&Unit::KiloElectronVolt)?;
        let hi = self.max.values_in(&Unit::KiloElectronVolt)?;
        Ok(lo.into_iter().zip(hi).collect())
    }
}

/// Histogram contents bundled with the bins that describe them.
///
/// Axis 0 of the histogram is time and the last axis is energy; the
/// constructor rejects anything else, so a state is always consistent.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramState {
    histogram: Histogram,
    tbins: TimeBins,
    ebins: EnergyBins,
}

impl HistogramState {
    pub fn new(histogram: Histogram, tbins: TimeBins, ebins: EnergyBins) -> Result<Self> {
        let shape = histogram.shape();
        let (Some(&ntime), Some(&nenergy)) = (shape.first(), shape.last()) else {
            return Err(Error::invalid("histogram has no axes"));
        };
        if ntime != tbins.len() {
            return Err(Error::invalid(format!(
                "histogram has {ntime} time bins but {} were given",
                tbins.len()
            )));
        }
        if nenergy != ebins.len() {
            return Err(Error::invalid(format!(
                "histogram has {nenergy} energy bins but {} were given",
                ebins.len()
            )));
        }
        Ok(HistogramState {
            histogram,
            tbins,
            ebins,
        })
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn tbins(&self) -> &TimeBins {
        &self.tbins
    }

    pub fn ebins(&self) -> &EnergyBins {
        &self.ebins
    }

    pub fn into_parts(self) -> (Histogram, TimeBins, EnergyBins) {
        (self.histogram, self.tbins, self.ebins)
    }
}
