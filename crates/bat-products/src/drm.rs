//! Detector response matrices (DRM).
//!
//! A [`BatDrm`] is a `TIME x E_IN x E_OUT` histogram of effective area. It
//! is read from an OGIP response file, generated from a PHA spectrum with
//! `batdrmgen`, assembled from arrays, or combined from several responses.

use std::path::{Path, PathBuf};

use bat_fits::{gzip, BinTable, BinTableBuilder, Card, ColumnSpec, ColumnType, FitsFile, Hdu};
use ndarray::{ArrayD, Axis, IxDyn};

use crate::bins::{EnergyBins, TimeBins};
use crate::dph::replace_file;
use crate::error::{Error, Result};
use crate::histogram::{BinAxis, Histogram};
use crate::history::ParameterSet;
use crate::tool::{run_checked, TaskRunner};
use crate::units::{Quantity, Unit};

pub const BATDRMGEN: &str = "batdrmgen";

const LABELS: [&str; 3] = ["TIME", "E_IN", "E_OUT"];

/// Allowed deviation of combination weights from unit sum.
const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Where a response comes from: a PHA file to run `batdrmgen` on, or an
/// existing response file. Exactly one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrmSource {
    pub pha_file: Option<PathBuf>,
    pub drm_file: Option<PathBuf>,
}

impl DrmSource {
    pub fn pha(path: impl Into<PathBuf>) -> Self {
        DrmSource {
            pha_file: Some(path.into()),
            drm_file: None,
        }
    }

    pub fn drm(path: impl Into<PathBuf>) -> Self {
        DrmSource {
            pha_file: None,
            drm_file: Some(path.into()),
        }
    }
}

/// Run `batdrmgen` for each PHA file and return the `.rsp` paths, in order.
///
/// Each run uses the PHA file's directory as its working directory and is
/// given bare file names.
pub fn calc_drm<P: AsRef<Path>>(pha_files: &[P], runner: &dyn TaskRunner) -> Result<Vec<PathBuf>> {
    for pha in pha_files {
        let pha = pha.as_ref();
        let name = pha.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        if !name.contains(".pha") {
            return Err(Error::invalid(format!(
                "{} must have a .pha extension",
                pha.display()
            )));
        }
    }

    let mut outputs = Vec::with_capacity(pha_files.len());
    for pha in pha_files {
        let pha = pha.as_ref();
        let name = pha.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let stem = pha.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
        let rsp = format!("{stem}.rsp");

        let params: ParameterSet = [
            ("infile", name.as_str()),
            ("outfile", rsp.as_str()),
            ("chatter", "2"),
            ("clobber", "YES"),
            ("hkfile", "NONE"),
        ]
        .into_iter()
        .collect();
        let dir = pha.parent().filter(|d| !d.as_os_str().is_empty());
        run_checked(runner, BATDRMGEN, &params, dir)?;

        let out = match dir {
            Some(d) => d.join(&rsp),
            None => PathBuf::from(&rsp),
        };
        log::info!("generated response {}", out.display());
        outputs.push(out);
    }
    Ok(outputs)
}

fn table_unit(table: &BinTable<'_>, name: &str, default: &Unit) -> Unit {
    table
        .column(name)
        .ok()
        .and_then(|c| c.unit.as_deref())
        .map_or_else(|| default.clone(), Unit::parse)
}

/// Lowest channel number, from `TLMINn` of `F_CHAN` when present.
fn first_channel(table: &BinTable<'_>, ebounds: &BinTable<'_>) -> i64 {
    let tlmin = table
        .columns()
        .iter()
        .position(|c| c.name == "F_CHAN")
        .and_then(|i| table.header().integer(&format!("TLMIN{}", i + 1)));
    tlmin
        .or_else(|| ebounds.read_i64("CHANNEL").ok()?.first().copied())
        .unwrap_or(0)
}

/// Expand one grouped `MATRIX` row to `nchan` channels.
fn ungroup(
    row: usize,
    values: &[f64],
    f_chan: &[f64],
    n_chan: &[f64],
    ngrp: usize,
    offset: i64,
    nchan: usize,
) -> Result<Vec<f64>> {
    let mut out = vec![0.0; nchan];
    let mut k = 0;
    for g in 0..ngrp.min(f_chan.len()).min(n_chan.len()) {
        let first = f_chan[g] as i64 - offset;
        let count = n_chan[g] as usize;
        if first < 0 || first as usize + count > nchan || k + count > values.len() {
            return Err(Error::invalid(format!(
                "MATRIX row {row} group {g} does not fit {nchan} channels"
            )));
        }
        let first = first as usize;
        out[first..first + count].copy_from_slice(&values[k..k + count]);
        k += count;
    }
    Ok(out)
}

fn parse_drm(path: &Path) -> Result<BatDrm> {
    let file = FitsFile::open(path)?;

    let eb = BinTable::new(file.hdu_by_name("EBOUNDS")?)?;
    let eunit = table_unit(&eb, "E_MIN", &Unit::KiloElectronVolt);
    let output_ebins = EnergyBins::new(
        (1..=eb.nrows() as i64).collect(),
        Quantity::from_vec(eb.read_f64("E_MIN")?, eunit.clone()),
        Quantity::from_vec(eb.read_f64("E_MAX")?, table_unit(&eb, "E_MAX", &eunit)),
    )?;
    let nout = output_ebins.len();

    let hdu = file.hdu(1)?;
    let table = BinTable::new(hdu)?;
    let in_unit = table_unit(&table, "ENERG_LO", &eunit);
    let input_ebins = EnergyBins::from_bounds(
        Quantity::from_vec(table.read_f64("ENERG_LO")?, in_unit.clone()),
        Quantity::from_vec(table.read_f64("ENERG_HI")?, table_unit(&table, "ENERG_HI", &in_unit)),
    )?;
    let nin = input_ebins.len();

    let time_unit = Unit::parse(hdu.header.string("TIMEUNIT").unwrap_or("s"));
    let tstart = hdu.header.require_float("TSTART")?;
    let tstop = hdu.header.require_float("TSTOP")?;
    let tbins = TimeBins::new(
        Quantity::scalar(tstart, time_unit.clone()),
        Quantity::scalar(tstop, time_unit),
    )?;

    let rows = table.read_rows_f64("MATRIX")?;
    let grouping = if rows.iter().any(|r| r.len() != nout) {
        let offset = first_channel(&table, &eb);
        Some((
            table.read_i64("N_GRP")?,
            table.read_rows_f64("F_CHAN")?,
            table.read_rows_f64("N_CHAN")?,
            offset,
        ))
    } else {
        None
    };

    let mut matrix = Vec::with_capacity(nin * nout);
    for (i, row) in rows.iter().enumerate() {
        match &grouping {
            Some((ngrp, f_chan, n_chan, offset)) => matrix.extend(ungroup(
                i,
                row,
                &f_chan[i],
                &n_chan[i],
                ngrp[i].max(0) as usize,
                *offset,
                nout,
            )?),
            None => matrix.extend_from_slice(row),
        }
    }
    let matrix = ArrayD::from_shape_vec(IxDyn(&[1, nin, nout]), matrix)?;
    log::debug!("parsed response {}: {nin} x {nout}", path.display());

    let histogram = drm_histogram(matrix, &tbins, &input_ebins, &output_ebins, Unit::SquareCentimeter)?;
    Ok(BatDrm {
        histogram,
        tbins,
        input_ebins,
        output_ebins,
    })
}

fn drm_histogram(
    matrix: ArrayD<f64>,
    tbins: &TimeBins,
    input: &EnergyBins,
    output: &EnergyBins,
    unit: Unit,
) -> Result<Histogram> {
    Histogram::new(
        vec![
            BinAxis::new(LABELS[0], tbins.edges())?,
            BinAxis::new(LABELS[1], input.edges())?,
            BinAxis::new(LABELS[2], output.edges())?,
        ],
        matrix,
        unit,
    )
}

fn axis_edges(histogram: &Histogram, label: &str) -> Result<Quantity> {
    histogram
        .axis(label)
        .map(|a| a.edges().clone())
        .ok_or_else(|| Error::invalid(format!("response histogram has no {label} axis")))
}

fn same_edges(a: &Quantity, b: &Quantity) -> Result<bool> {
    let b = b.values_in(a.unit())?;
    Ok(a.len() == b.len()
        && a.values()
            .iter()
            .zip(&b)
            .all(|(x, y)| (x - y).abs() <= 1e-9 * x.abs().max(y.abs()).max(1.0)))
}

/// An instrument response over time, input and output energy.
#[derive(Debug, Clone, PartialEq)]
pub struct BatDrm {
    histogram: Histogram,
    tbins: TimeBins,
    input_ebins: EnergyBins,
    output_ebins: EnergyBins,
}

impl BatDrm {
    /// Wrap a `TIME x E_IN x E_OUT` histogram.
    pub fn from_histogram(histogram: Histogram) -> Result<Self> {
        if histogram.labels() != LABELS {
            return Err(Error::invalid(format!(
                "a response needs axes {LABELS:?}, got {:?}",
                histogram.labels()
            )));
        }
        let tbins = TimeBins::from_edges(&axis_edges(&histogram, "TIME")?)?;
        let input_ebins = EnergyBins::from_edges(&axis_edges(&histogram, "E_IN")?)?;
        let output_ebins = EnergyBins::from_edges(&axis_edges(&histogram, "E_OUT")?)?;
        Ok(BatDrm {
            histogram,
            tbins,
            input_ebins,
            output_ebins,
        })
    }

    /// Load a response file, or generate one from a PHA file first.
    pub fn from_file(source: DrmSource, runner: &dyn TaskRunner) -> Result<Self> {
        let drm_file = match (source.pha_file, source.drm_file) {
            (None, None) => {
                return Err(Error::invalid("give either a PHA file or a response file"))
            }
            (Some(_), Some(_)) => {
                return Err(Error::invalid("give only one of a PHA file and a response file"))
            }
            (Some(pha), None) => {
                if !pha.exists() {
                    return Err(Error::MissingFile(pha));
                }
                let mut generated = calc_drm(&[pha], runner)?;
                generated
                    .pop()
                    .ok_or_else(|| Error::invalid("batdrmgen produced no response"))?
            }
            (None, Some(drm)) => {
                if !drm.exists() {
                    return Err(Error::MissingFile(drm));
                }
                gzip::inflate_to_sibling(&drm)?
            }
        };
        parse_drm(&drm_file)
    }

    /// Weighted sum of responses in one time bin spanning all of them.
    ///
    /// Weights must sum to one; `None` weighs every response `1/N`.
    pub fn concatenate(drms: &[BatDrm], weights: Option<&[f64]>) -> Result<Self> {
        let first = drms
            .first()
            .ok_or_else(|| Error::invalid("no responses to combine"))?;
        let weights = match weights {
            Some(w) => w.to_vec(),
            None => vec![1.0 / drms.len() as f64; drms.len()],
        };
        if weights.len() != drms.len() {
            return Err(Error::invalid(format!(
                "{} weights for {} responses",
                weights.len(),
                drms.len()
            )));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(Error::invalid(format!("weights sum to {total}, not 1")));
        }

        let e_in = axis_edges(&first.histogram, "E_IN")?;
        let e_out = axis_edges(&first.histogram, "E_OUT")?;
        let time_unit = first.tbins.start().unit().clone();
        let (mut lo, mut hi) = (f64::INFINITY, f64::NEG_INFINITY);
        let mut summed: Option<Histogram> = None;
        for (drm, &w) in drms.iter().zip(&weights) {
            if !same_edges(&e_in, &axis_edges(&drm.histogram, "E_IN")?)?
                || !same_edges(&e_out, &axis_edges(&drm.histogram, "E_OUT")?)?
            {
                return Err(Error::invalid("responses have different energy binning"));
            }
            let edges = drm.tbins.edges().values_in(&time_unit)?;
            lo = edges.iter().copied().fold(lo, f64::min);
            hi = edges.iter().copied().fold(hi, f64::max);

            let part = drm.histogram.project(&["E_IN", "E_OUT"])?.scale(w);
            summed = Some(match summed {
                None => part,
                Some(acc) => Histogram::new(
                    acc.axes().to_vec(),
                    acc.contents() + part.contents(),
                    acc.unit().clone(),
                )?,
            });
        }
        let summed = summed.ok_or_else(|| Error::invalid("no responses to combine"))?;
        let combined = Histogram::concatenate(
            &[summed],
            "TIME",
            Quantity::from_vec(vec![lo, hi], time_unit),
        )?;
        log::debug!("combined {} responses over [{lo}, {hi}]", drms.len());
        BatDrm::from_histogram(combined)
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn matrix(&self) -> &ArrayD<f64> {
        self.histogram.contents()
    }

    pub fn tbins(&self) -> &TimeBins {
        &self.tbins
    }

    pub fn input_ebins(&self) -> &EnergyBins {
        &self.input_ebins
    }

    pub fn output_ebins(&self) -> &EnergyBins {
        &self.output_ebins
    }

    /// Overwrite an existing response file with this response's first time
    /// bin as an OGIP `SPECRESP MATRIX` plus `EBOUNDS`.
    pub fn save(&self, path: &Path, overwrite: bool) -> Result<()> {
        if !path.exists() {
            return Err(Error::NotImplemented("writing a response to a new file"));
        }
        if !overwrite {
            return Err(Error::invalid(format!(
                "{} exists; pass overwrite to replace it",
                path.display()
            )));
        }
        let file = FitsFile::new(vec![
            self.primary_hdu(),
            self.matrix_hdu()?,
            self.ebounds_hdu()?,
        ]);
        replace_file(&file, path)
    }

    // ── OGIP layout ──

    fn primary_hdu(&self) -> Hdu {
        let mut hdu = Hdu::empty_primary();
        hdu.header.set("TELESCOP", "SWIFT");
        hdu.header.set("INSTRUME", "BAT");
        hdu
    }

    fn matrix_hdu(&self) -> Result<Hdu> {
        let nin = self.input_ebins.len();
        let nout = self.output_ebins.len();
        let first = self.histogram.slice("TIME", 0..1)?;
        let matrix: Vec<f64> = first.contents().index_axis(Axis(0), 0).iter().copied().collect();
        let (tstart, tstop) = (
            self.tbins.start().first().unwrap_or(0.0),
            self.tbins.stop().first().unwrap_or(0.0),
        );
        let in_unit = self.input_ebins.unit().symbol();

        let hdu = BinTableBuilder::new("SPECRESP MATRIX", nin)
            .column(
                ColumnSpec::new("ENERG_LO", ColumnType::Float).with_unit(in_unit),
                self.input_ebins.min().to_vec(),
            )
            .column(
                ColumnSpec::new("ENERG_HI", ColumnType::Float).with_unit(in_unit),
                self.input_ebins.max().to_vec(),
            )
            .column(ColumnSpec::new("N_GRP", ColumnType::Short), vec![1.0; nin])
            .column(ColumnSpec::new("F_CHAN", ColumnType::Short), vec![0.0; nin])
            .column(ColumnSpec::new("N_CHAN", ColumnType::Short), vec![nout as f64; nin])
            .column(
                ColumnSpec::new("MATRIX", ColumnType::Float).with_repeat(nout),
                matrix,
            )
            .card(Card::new("TLMIN4", 0_i64))
            .card(Card::new("TELESCOP", "SWIFT"))
            .card(Card::new("INSTRUME", "BAT"))
            .card(Card::new("HDUCLASS", "OGIP"))
            .card(Card::new("HDUCLAS1", "RESPONSE"))
            .card(Card::new("HDUCLAS2", "RSP_MATRIX"))
            .card(Card::new("CHANTYPE", "PI"))
            .card(Card::new("DETCHANS", nout as i64))
            .card(Card::new("TSTART", tstart))
            .card(Card::new("TSTOP", tstop))
            .card(Card::new("TIMEUNIT", self.tbins.start().unit().symbol()))
            .build()?;
        Ok(hdu)
    }

    fn ebounds_hdu(&self) -> Result<Hdu> {
        let ebins = &self.output_ebins;
        let unit = ebins.unit().symbol();
        let hdu = BinTableBuilder::new("EBOUNDS", ebins.len())
            .column(
                ColumnSpec::new("CHANNEL", ColumnType::Short),
                ebins.index().iter().map(|&i| (i - 1) as f64).collect::<Vec<_>>(),
            )
            .column(
                ColumnSpec::new("E_MIN", ColumnType::Float).with_unit(unit),
                ebins.min().to_vec(),
            )
            .column(
                ColumnSpec::new("E_MAX", ColumnType::Float).with_unit(unit),
                ebins.max().to_vec(),
            )
            .card(Card::new("TELESCOP", "SWIFT"))
            .card(Card::new("INSTRUME", "BAT"))
            .card(Card::new("HDUCLASS", "OGIP"))
            .card(Card::new("HDUCLAS1", "RESPONSE"))
            .card(Card::new("HDUCLAS2", "EBOUNDS"))
            .card(Card::new("CHANTYPE", "PI"))
            .card(Card::new("DETCHANS", ebins.len() as i64))
            .build()?;
        Ok(hdu)
    }
}

/// Assembles a [`BatDrm`] from a response array and its bins.
#[derive(Debug, Clone, Default)]
pub struct DrmBuilder {
    matrix: Option<ArrayD<f64>>,
    timebins: Option<Quantity>,
    tmin: Option<Quantity>,
    tmax: Option<Quantity>,
    input_energybins: Option<Quantity>,
    input_bounds: Option<(Quantity, Quantity)>,
    output_energybins: Option<Quantity>,
    output_bounds: Option<(Quantity, Quantity)>,
    unit: Option<Unit>,
}

impl DrmBuilder {
    /// `E_IN x E_OUT` or `TIME x E_IN x E_OUT` values.
    pub fn new(matrix: ArrayD<f64>) -> Self {
        DrmBuilder {
            matrix: Some(matrix),
            ..Default::default()
        }
    }

    pub fn timebins(mut self, edges: Quantity) -> Self {
        self.timebins = Some(edges);
        self
    }

    pub fn time_bounds(mut self, tmin: Quantity, tmax: Quantity) -> Self {
        self.tmin = Some(tmin);
        self.tmax = Some(tmax);
        self
    }

    pub fn input_energybins(mut self, edges: Quantity) -> Self {
        self.input_energybins = Some(edges);
        self
    }

    pub fn input_energy_bounds(mut self, emin: Quantity, emax: Quantity) -> Self {
        self.input_bounds = Some((emin, emax));
        self
    }

    pub fn output_energybins(mut self, edges: Quantity) -> Self {
        self.output_energybins = Some(edges);
        self
    }

    pub fn output_energy_bounds(mut self, emin: Quantity, emax: Quantity) -> Self {
        self.output_bounds = Some((emin, emax));
        self
    }

    /// Unit of the matrix values; `cm2` when not given.
    pub fn unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn build(self) -> Result<BatDrm> {
        let matrix = self
            .matrix
            .ok_or_else(|| Error::invalid("a response matrix is required"))?;
        let tbins = match (self.timebins, self.tmin, self.tmax) {
            (Some(edges), _, _) => TimeBins::from_edges(&edges)?,
            (None, Some(tmin), Some(tmax)) => TimeBins::new(tmin, tmax)?,
            _ => return Err(Error::invalid("time bins or tmin/tmax are required")),
        };
        let input_ebins = energy_bins(self.input_energybins, self.input_bounds, "input")?;
        let output_ebins = energy_bins(self.output_energybins, self.output_bounds, "output")?;

        let matrix = match matrix.ndim() {
            2 => matrix.insert_axis(Axis(0)),
            3 => matrix,
            n => {
                return Err(Error::invalid(format!(
                    "a response matrix has 2 or 3 dimensions, got {n}"
                )))
            }
        };
        let histogram = drm_histogram(
            matrix,
            &tbins,
            &input_ebins,
            &output_ebins,
            self.unit.unwrap_or(Unit::SquareCentimeter),
        )?;
        Ok(BatDrm {
            histogram,
            tbins,
            input_ebins,
            output_ebins,
        })
    }
}

fn energy_bins(
    edges: Option<Quantity>,
    bounds: Option<(Quantity, Quantity)>,
    which: &str,
) -> Result<EnergyBins> {
    match (edges, bounds) {
        (Some(edges), _) => EnergyBins::from_edges(&edges),
        (None, Some((emin, emax))) => EnergyBins::from_bounds(emin, emax),
        (None, None) => Err(Error::invalid(format!(
            "{which} energy bins or bounds are required"
        ))),
    }
}
