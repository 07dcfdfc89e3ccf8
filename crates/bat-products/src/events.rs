//! Time-tagged BAT event lists.

use std::path::Path;

use bat_fits::{BinTable, FitsFile};
use ndarray::{ArrayD, IxDyn};

use crate::error::{Error, Result};
use crate::histogram::{BinAxis, Histogram};
use crate::units::{Quantity, Unit};

/// Detector plane width in pixels (DETX).
pub const DETX_PIXELS: usize = 286;
/// Detector plane height in pixels (DETY).
pub const DETY_PIXELS: usize = 173;

/// Hardware location encoded in a detector id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorAddress {
    pub block: u8,
    /// Detector module within the block.
    pub dm: u8,
    /// Sandwich side within the module.
    pub side: u8,
    pub channel: u8,
}

impl DetectorAddress {
    pub fn from_id(id: i64) -> Self {
        DetectorAddress {
            block: ((id >> 11) & 0xF) as u8,
            dm: ((id >> 8) & 0x7) as u8,
            side: ((id >> 7) & 0x1) as u8,
            channel: (id & 0x7F) as u8,
        }
    }
}

/// Per-event columns used to build an [`EventList`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventColumns {
    pub time: Quantity,
    pub detector_id: Vec<i64>,
    pub detx: Vec<i64>,
    pub dety: Vec<i64>,
    pub quality_flag: Vec<i64>,
    pub energy: Quantity,
    pub pha: Vec<f64>,
    pub pi: Vec<f64>,
    pub mask_weight: Option<Vec<f64>>,
}

/// Photon events with their detector addresses decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct EventList {
    columns: EventColumns,
    address: Vec<DetectorAddress>,
}

impl EventList {
    pub fn new(columns: EventColumns) -> Result<Self> {
        let n = columns.time.len();
        let lengths = [
            ("detector_id", columns.detector_id.len()),
            ("detx", columns.detx.len()),
            ("dety", columns.dety.len()),
            ("quality_flag", columns.quality_flag.len()),
            ("energy", columns.energy.len()),
            ("pha", columns.pha.len()),
            ("pi", columns.pi.len()),
            (
                "mask_weight",
                columns.mask_weight.as_ref().map_or(n, Vec::len),
            ),
        ];
        if let Some((name, len)) = lengths.iter().find(|(_, len)| *len != n) {
            return Err(Error::invalid(format!(
                "{name} has {len} entries but there are {n} event times"
            )));
        }
        let address = columns
            .detector_id
            .iter()
            .map(|&id| DetectorAddress::from_id(id))
            .collect();
        Ok(EventList { columns, address })
    }

    /// Read the `EVENTS` extension of a BAT event file.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingFile(path.to_path_buf()));
        }
        let file = FitsFile::open(path)?;
        let table = BinTable::new(file.hdu_by_name("EVENTS")?)?;
        let unit_of = |name: &str, default: Unit| {
            table
                .column(name)
                .ok()
                .and_then(|c| c.unit.as_deref())
                .map_or(default, Unit::parse)
        };
        let mask_weight = if table.has_column("MASK_WEIGHT") {
            Some(table.read_f64("MASK_WEIGHT")?)
        } else {
            None
        };
        let events = EventList::new(EventColumns {
            time: Quantity::from_vec(table.read_f64("TIME")?, unit_of("TIME", Unit::Second)),
            detector_id: table.read_i64("DET_ID")?,
            detx: table.read_i64("DETX")?,
            dety: table.read_i64("DETY")?,
            quality_flag: table.read_i64("EVENT_FLAGS")?,
            energy: Quantity::from_vec(
                table.read_f64("ENERGY")?,
                unit_of("ENERGY", Unit::KiloElectronVolt),
            ),
            pha: table.read_f64("PHA")?,
            pi: table.read_f64("PI")?,
            mask_weight,
        })?;
        log::info!("read {} events from {}", events.len(), path.display());
        Ok(events)
    }

    pub fn len(&self) -> usize {
        self.columns.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn time(&self) -> &Quantity {
        &self.columns.time
    }

    pub fn energy(&self) -> &Quantity {
        &self.columns.energy
    }

    pub fn detector_id(&self) -> &[i64] {
        &self.columns.detector_id
    }

    pub fn detx(&self) -> &[i64] {
        &self.columns.detx
    }

    pub fn dety(&self) -> &[i64] {
        &self.columns.dety
    }

    pub fn quality_flag(&self) -> &[i64] {
        &self.columns.quality_flag
    }

    pub fn pha(&self) -> &[f64] {
        &self.columns.pha
    }

    pub fn pi(&self) -> &[f64] {
        &self.columns.pi
    }

    pub fn mask_weight(&self) -> Option<&[f64]> {
        self.columns.mask_weight.as_deref()
    }

    pub fn addresses(&self) -> &[DetectorAddress] {
        &self.address
    }

    /// Count events into a `TIME x DETY x DETX x ENERGY` detector plane
    /// histogram. Events outside the edges or the detector plane are dropped.
    pub fn histogram(&self, time_edges: &Quantity, energy_edges: &Quantity) -> Result<Histogram> {
        let time_axis = BinAxis::new("TIME", time_edges.clone())?;
        let energy_axis = BinAxis::new("ENERGY", energy_edges.clone())?;
        let t = self.columns.time.values_in(time_edges.unit())?;
        let e = self.columns.energy.values_in(energy_edges.unit())?;
        let t_edges = time_edges.to_vec();
        let e_edges = energy_edges.to_vec();

        let mut counts = ArrayD::<f64>::zeros(IxDyn(&[
            time_axis.len(),
            DETY_PIXELS,
            DETX_PIXELS,
            energy_axis.len(),
        ]));
        let mut kept = 0usize;
        for i in 0..self.len() {
            let (Some(ti), Some(ei)) = (find_bin(&t_edges, t[i]), find_bin(&e_edges, e[i])) else {
                continue;
            };
            let (x, y) = (self.columns.detx[i], self.columns.dety[i]);
            if !(0..DETX_PIXELS as i64).contains(&x) || !(0..DETY_PIXELS as i64).contains(&y) {
                continue;
            }
            counts[[ti, y as usize, x as usize, ei].as_slice()] += 1.0;
            kept += 1;
        }
        log::debug!("binned {kept} of {} events", self.len());

        Histogram::new(
            vec![
                time_axis,
                pixel_axis("DETY", DETY_PIXELS)?,
                pixel_axis("DETX", DETX_PIXELS)?,
                energy_axis,
            ],
            counts,
            Unit::Count,
        )
    }
}

/// Integer pixel edges `0..=n`.
pub(crate) fn pixel_axis(label: &str, n: usize) -> Result<BinAxis> {
    BinAxis::new(
        label,
        Quantity::from_vec((0..=n).map(|p| p as f64).collect(), Unit::Dimensionless),
    )
}

/// Bin of `x` among ascending `edges`; the last bin includes its right edge.
fn find_bin(edges: &[f64], x: f64) -> Option<usize> {
    let (first, last) = (*edges.first()?, *edges.last()?);
    if x < first || x > last || edges.len() < 2 {
        return None;
    }
    if x == last {
        return Some(edges.len() - 2);
    }
    Some(edges.partition_point(|&edge| edge <= x) - 1)
}
