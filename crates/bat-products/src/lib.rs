//! Swift/BAT data-product wrappers.
//!
//! Detector plane histograms ([`BatDph`]) and detector response matrices
//! ([`BatDrm`]) parsed from FITS, rebinned either in memory or by re-running
//! the HEASoft task that made them, and written back.

pub mod binning;
pub mod bins;
pub mod dph;
pub mod drm;
pub mod error;
pub mod events;
pub mod gti;
pub mod histogram;
pub mod history;
pub mod tool;
pub mod units;

pub use binning::{BinningRecord, EnergyBinSpec, OutType, TimeBinAlg, TimeBound};
pub use bins::{EnergyBins, HistogramState, TimeBins};
pub use dph::{BatDph, DataColumn, DphBuilder, DphOptions, EnergyBinRequest, TimeBinRequest};
pub use drm::{calc_drm, BatDrm, DrmBuilder, DrmSource};
pub use error::{Error, Result};
pub use events::{DetectorAddress, EventColumns, EventList};
pub use histogram::{BinAxis, Histogram};
pub use history::ParameterSet;
pub use tool::{Heasoft, TaskOutput, TaskRunner};
pub use units::{Quantity, Unit};
