//! Detector plane histograms (DPH).
//!
//! A [`BatDph`] is either backed by a file written by `batbinevt`, optionally
//! with the event file it was binned from, or built in memory by
//! [`DphBuilder`]. With an event file attached, rebinning re-runs
//! `batbinevt` and re-parses its output; otherwise rebinning happens on the
//! in-memory histogram.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bat_fits::{gzip, BinTable, BinTableBuilder, ColumnSpec, ColumnType, ColumnValues, FitsFile, Hdu};
use ndarray::{ArrayD, IxDyn};

use crate::binning::{BinningRecord, EnergyBinSpec, OutType, TimeBinAlg, TimeBound};
use crate::bins::{EnergyBins, HistogramState, TimeBins};
use crate::error::{Error, Result};
use crate::events::{pixel_axis, EventList};
use crate::gti::{custom_gti_path, read_gti, write_gti_file};
use crate::histogram::{BinAxis, Histogram};
use crate::history::{batbinevt_defaults, from_history, BATBINEVT};
use crate::tool::{run_checked, Heasoft, TaskOutput, TaskRunner};
use crate::units::{Quantity, Unit};

/// Bookkeeping columns of HDU 1 that are never loaded.
pub const EXCLUDED_COLUMNS: [&str; 7] = [
    "GAIN_INDEX",
    "OFFSET_INDEX",
    "LDPNAME",
    "BLOCK_MAP",
    "NUM_DETS",
    "APID",
    "LDP",
];

const COUNTS: &str = "DPH_COUNTS";
const TIME: &str = "TIME";
const EXPOSURE: &str = "EXPOSURE";

/// Relative tolerance when comparing requested and current bin bounds.
const BOUND_TOLERANCE: f64 = 1e-9;

/// A numeric column of HDU 1, shaped `[rows, cell dims...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataColumn {
    pub name: String,
    pub values: ArrayD<f64>,
    pub unit: Unit,
}

impl DataColumn {
    fn new(name: &str, values: ArrayD<f64>, unit: Unit) -> Self {
        DataColumn {
            name: name.to_string(),
            values,
            unit,
        }
    }

    pub fn rows(&self) -> usize {
        self.values.shape().first().copied().unwrap_or(0)
    }
}

/// Requested energy binning: contiguous edges, or parallel bounds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnergyBinRequest {
    edges: Option<Quantity>,
    emin: Option<Quantity>,
    emax: Option<Quantity>,
}

impl EnergyBinRequest {
    pub fn edges(edges: Quantity) -> Self {
        EnergyBinRequest {
            edges: Some(edges),
            ..Default::default()
        }
    }

    pub fn bounds(emin: Quantity, emax: Quantity) -> Self {
        EnergyBinRequest {
            edges: None,
            emin: Some(emin),
            emax: Some(emax),
        }
    }

    pub fn emin(mut self, emin: Quantity) -> Self {
        self.emin = Some(emin);
        self
    }

    pub fn emax(mut self, emax: Quantity) -> Self {
        self.emax = Some(emax);
        self
    }

    /// Lower and upper bounds in keV.
    fn resolve(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        let kev = Unit::KiloElectronVolt;
        match (&self.edges, &self.emin, &self.emax) {
            (Some(edges), None, None) => {
                let v = edges.values_in(&kev)?;
                if v.len() < 2 {
                    return Err(Error::invalid("energy binning needs at least two edges"));
                }
                Ok((v[..v.len() - 1].to_vec(), v[1..].to_vec()))
            }
            (None, Some(emin), Some(emax)) => {
                if emin.len() != emax.len() {
                    return Err(Error::invalid("emin and emax must have the same length"));
                }
                if emin.is_empty() {
                    return Err(Error::invalid("no energy bins requested"));
                }
                Ok((emin.values_in(&kev)?, emax.values_in(&kev)?))
            }
            (None, None, None) => Err(Error::invalid("no energy binning given")),
            (Some(_), _, _) => Err(Error::invalid("give either energy edges or emin/emax, not both")),
            _ => Err(Error::invalid("both emin and emax must be defined")),
        }
    }
}

/// Requested time binning.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeBinRequest {
    edges: Option<Quantity>,
    tmin: Option<Quantity>,
    tmax: Option<Quantity>,
    algorithm: TimeBinAlg,
    timedel: f64,
    epoch: Option<Quantity>,
    relative: bool,
}

impl Default for TimeBinRequest {
    fn default() -> Self {
        TimeBinRequest {
            edges: None,
            tmin: None,
            tmax: None,
            algorithm: TimeBinAlg::Uniform,
            timedel: 1.0,
            epoch: None,
            relative: false,
        }
    }
}

impl TimeBinRequest {
    pub fn edges(edges: Quantity) -> Self {
        TimeBinRequest {
            edges: Some(edges),
            ..Default::default()
        }
    }

    pub fn bounds(tmin: Quantity, tmax: Quantity) -> Self {
        TimeBinRequest {
            tmin: Some(tmin),
            tmax: Some(tmax),
            ..Default::default()
        }
    }

    /// No explicit edges: let the binning algorithm cover the whole observation.
    pub fn whole() -> Self {
        TimeBinRequest::default()
    }

    pub fn tmin(mut self, tmin: Quantity) -> Self {
        self.tmin = Some(tmin);
        self
    }

    pub fn tmax(mut self, tmax: Quantity) -> Self {
        self.tmax = Some(tmax);
        self
    }

    pub fn algorithm(mut self, algorithm: TimeBinAlg) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Bin width in seconds for uniform binning.
    pub fn timedel(mut self, seconds: f64) -> Self {
        self.timedel = seconds;
        self
    }

    /// Edges are relative to `t0`.
    pub fn relative_to(mut self, t0: Quantity) -> Self {
        self.epoch = Some(t0);
        self.relative = true;
        self
    }

    pub fn epoch(mut self, t0: Quantity) -> Self {
        self.epoch = Some(t0);
        self
    }

    pub fn relative(mut self, relative: bool) -> Self {
        self.relative = relative;
        self
    }

    /// Absolute time edges, if any were requested.
    fn resolve(&self) -> Result<Option<Quantity>> {
        if self.relative && self.epoch.is_none() {
            return Err(Error::invalid(
                "relative time bins need a reference time T0",
            ));
        }
        let edges = match (&self.edges, &self.tmin, &self.tmax) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(Error::invalid("give either time edges or tmin/tmax, not both"))
            }
            (Some(edges), None, None) => Some(edges.clone()),
            (None, Some(tmin), Some(tmax)) => {
                if tmin.len() != tmax.len() {
                    return Err(Error::invalid("tmin and tmax must have the same length"));
                }
                let stop = tmax.to(tmin.unit())?;
                let mut v = tmin.to_vec();
                v.extend(stop.last());
                Some(Quantity::from_vec(v, tmin.unit().clone()))
            }
            (None, None, None) => None,
            _ => return Err(Error::invalid("both tmin and tmax must be defined")),
        };
        let Some(edges) = edges else {
            return Ok(None);
        };
        if edges.len() < 2 {
            return Err(Error::invalid("time binning needs at least two edges"));
        }
        match (&self.epoch, self.relative) {
            (Some(t0), true) => {
                let offset = t0.values_in(edges.unit())?;
                let offset = offset
                    .first()
                    .copied()
                    .ok_or_else(|| Error::invalid("T0 is empty"))?;
                Ok(Some(&edges + offset))
            }
            _ => Ok(Some(edges)),
        }
    }
}

/// Options for [`BatDph::open`].
#[derive(Clone, Default)]
pub struct DphOptions {
    pub event_file: Option<PathBuf>,
    pub record: Option<BinningRecord>,
    pub recalc: bool,
    pub runner: Option<Arc<dyn TaskRunner>>,
}

impl DphOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.event_file = Some(path.into());
        self
    }

    pub fn record(mut self, record: BinningRecord) -> Self {
        self.record = Some(record);
        self
    }

    pub fn recalc(mut self, recalc: bool) -> Self {
        self.recalc = recalc;
        self
    }

    pub fn runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = Some(runner);
        self
    }
}

/// Everything read from one DPH file.
struct ParsedDph {
    columns: Vec<DataColumn>,
    state: HistogramState,
    gti: TimeBins,
    history: Option<BinningRecord>,
}

/// Build the `TIME x DETY x DETX x ENERGY` histogram for a DPH.
fn dph_histogram(
    counts: ArrayD<f64>,
    tbins: &TimeBins,
    ebins: &EnergyBins,
    unit: Unit,
) -> Result<Histogram> {
    let shape = counts.shape().to_vec();
    if shape.len() != 4 {
        return Err(Error::invalid(format!(
            "DPH contents must be TIME x DETY x DETX x ENERGY, got shape {shape:?}"
        )));
    }
    Histogram::new(
        vec![
            BinAxis::new("TIME", tbins.edges())?,
            pixel_axis("DETY", shape[1])?,
            pixel_axis("DETX", shape[2])?,
            BinAxis::new("ENERGY", ebins.edges())?,
        ],
        counts,
        unit,
    )
}

fn column_unit(table: &BinTable<'_>, name: &str, default: Unit) -> Unit {
    table
        .column(name)
        .ok()
        .and_then(|c| c.unit.as_deref())
        .map_or(default, Unit::parse)
}

fn parse_dph(path: &Path) -> Result<ParsedDph> {
    let file = FitsFile::open(path)?;
    let hdu = file.hdu(1)?;
    let table = BinTable::new(hdu)?;
    let nrows = table.nrows();

    let mut columns = Vec::new();
    for info in table.columns() {
        if EXCLUDED_COLUMNS.contains(&info.name.as_str()) {
            continue;
        }
        let Some(repeat) = info.repeat() else {
            log::debug!("skipping variable-length column {}", info.name);
            continue;
        };
        let values = match table.read_f64(&info.name) {
            Ok(values) => values,
            Err(bat_fits::Error::UnsupportedColumn { .. }) => {
                log::debug!("skipping non-numeric column {}", info.name);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let mut shape = vec![nrows];
        match &info.dims {
            Some(dims) => shape.extend(dims),
            None if repeat > 1 => shape.push(repeat),
            None => {}
        }
        let values = ArrayD::from_shape_vec(IxDyn(&shape), values)?;
        let unit = info.unit.as_deref().map_or(Unit::Dimensionless, Unit::parse);
        columns.push(DataColumn::new(&info.name, values, unit));
    }

    let eb = BinTable::new(file.hdu_by_name("EBOUNDS")?)?;
    let eunit = column_unit(&eb, "E_MIN", Unit::KiloElectronVolt);
    let ebins = EnergyBins::new(
        eb.read_i64("CHANNEL")?,
        Quantity::from_vec(eb.read_f64("E_MIN")?, eunit.clone()),
        Quantity::from_vec(eb.read_f64("E_MAX")?, column_unit(&eb, "E_MAX", eunit)),
    )?;

    let time = Quantity::from_vec(table.read_f64(TIME)?, column_unit(&table, TIME, Unit::Second));
    let exposure = Quantity::from_vec(
        table.read_f64(EXPOSURE)?,
        column_unit(&table, EXPOSURE, Unit::Second),
    );
    let stop = time.try_add(&exposure)?;
    let tbins = TimeBins::new(time, stop)?;

    let counts = columns
        .iter()
        .find(|c| c.name == COUNTS)
        .ok_or_else(|| bat_fits::Error::MissingColumn(COUNTS.to_string()))?;
    let histogram = dph_histogram(counts.values.clone(), &tbins, &ebins, counts.unit.clone())?;
    let state = HistogramState::new(histogram, tbins, ebins)?;

    let history = from_history(BATBINEVT, hdu.header.history()).and_then(|params| {
        BinningRecord::from_parameters(&params)
            .map_err(|e| log::warn!("ignoring unusable {BATBINEVT} history: {e}"))
            .ok()
    });

    log::debug!(
        "parsed {}: {} columns, {} time bins, {} energy bins",
        path.display(),
        columns.len(),
        state.tbins().len(),
        state.ebins().len()
    );
    Ok(ParsedDph {
        columns,
        state,
        gti: read_gti(&file)?,
        history,
    })
}

/// Write `file` to a hidden sibling of `target`, then rename it over `target`.
pub(crate) fn replace_file(file: &FitsFile, target: &Path) -> Result<()> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = target.with_file_name(format!(".{name}.tmp"));
    file.write(&tmp)?;
    fs::rename(&tmp, target)?;
    log::info!("wrote {}", target.display());
    Ok(())
}

fn bounds_match(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b)
            .all(|(x, y)| (x - y).abs() <= BOUND_TOLERANCE * x.abs().max(y.abs()).max(1.0))
}

fn edges_from_bounds(lo: &[f64], hi: &[f64], unit: Unit) -> Quantity {
    let mut v = lo.to_vec();
    v.extend(hi.last());
    Quantity::from_vec(v, unit)
}

/// A detector plane histogram with its bins, data columns and provenance.
pub struct BatDph {
    dph_file: Option<PathBuf>,
    event_file: Option<PathBuf>,
    events: Option<EventList>,
    record: Option<BinningRecord>,
    columns: Vec<DataColumn>,
    gti: Option<TimeBins>,
    state: HistogramState,
    runner: Arc<dyn TaskRunner>,
    last_output: Option<TaskOutput>,
}

impl fmt::Debug for BatDph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatDph")
            .field("dph_file", &self.dph_file)
            .field("event_file", &self.event_file)
            .field("record", &self.record)
            .field("shape", &self.state.histogram().shape())
            .finish_non_exhaustive()
    }
}

impl BatDph {
    /// Open `dph_file`, first creating it from the event file when it is
    /// absent or `recalc` is set.
    pub fn open(dph_file: impl AsRef<Path>, options: DphOptions) -> Result<Self> {
        let dph_file = dph_file.as_ref().to_path_buf();
        if let Some(event_file) = &options.event_file {
            if !event_file.exists() {
                return Err(Error::MissingFile(event_file.clone()));
            }
        } else {
            log::warn!(
                "no event file given for {}; rebinning will only merge existing bins",
                dph_file.display()
            );
        }
        let runner: Arc<dyn TaskRunner> = match options.runner {
            Some(runner) => runner,
            None => Arc::new(Heasoft::from_env()),
        };

        let mut record = options.record;
        let mut last_output = None;
        match &options.event_file {
            Some(event_file) if options.recalc || !dph_file.exists() => {
                let base = record
                    .take()
                    .unwrap_or_else(|| BinningRecord::dph_defaults(event_file, &dph_file));
                let used = invocation_record(&base, event_file, &dph_file);
                let out = run_checked(
                    runner.as_ref(),
                    BATBINEVT,
                    &used.to_parameters(),
                    dph_file.parent(),
                )?;
                log::info!("created {}", dph_file.display());
                record = Some(used);
                last_output = Some(out);
            }
            _ if !dph_file.exists() => return Err(Error::MissingFile(dph_file)),
            _ => {}
        }

        let parsed = parse_dph(&dph_file)?;
        let record = match record {
            Some(r) => r,
            None => match parsed.history.clone() {
                Some(r) => r,
                None => BinningRecord::from_parameters(&batbinevt_defaults())?,
            },
        };
        Ok(BatDph {
            dph_file: Some(dph_file),
            event_file: options.event_file,
            events: None,
            record: Some(record),
            columns: parsed.columns,
            gti: Some(parsed.gti),
            state: parsed.state,
            runner,
            last_output,
        })
    }

    /// Load an existing DPH; a `.gz` file is inflated next to itself first.
    pub fn from_file(dph_file: impl AsRef<Path>, event_file: Option<&Path>) -> Result<Self> {
        let dph_file = dph_file.as_ref();
        if !dph_file.exists() {
            return Err(Error::MissingFile(dph_file.to_path_buf()));
        }
        let dph_file = gzip::inflate_to_sibling(dph_file)?;
        let mut options = DphOptions::new();
        if let Some(event_file) = event_file {
            options = options.event_file(event_file);
        }
        BatDph::open(dph_file, options)
    }

    pub fn dph_file(&self) -> Option<&Path> {
        self.dph_file.as_deref()
    }

    pub fn event_file(&self) -> Option<&Path> {
        self.event_file.as_deref()
    }

    /// The `batbinevt` parameters behind the current contents.
    pub fn record(&self) -> Option<&BinningRecord> {
        self.record.as_ref()
    }

    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&DataColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn state(&self) -> &HistogramState {
        &self.state
    }

    pub fn histogram(&self) -> &Histogram {
        self.state.histogram()
    }

    pub fn tbins(&self) -> &TimeBins {
        self.state.tbins()
    }

    pub fn ebins(&self) -> &EnergyBins {
        self.state.ebins()
    }

    /// Exposure of each time bin from the `EXPOSURE` column, or the bin
    /// widths when the column is missing.
    pub fn exposure(&self) -> Result<Quantity> {
        let tbins = self.state.tbins();
        match self.column(EXPOSURE) {
            Some(c) if c.values.len() == tbins.len() => Ok(Quantity::from_vec(
                c.values.iter().copied().collect(),
                c.unit.clone(),
            )),
            _ => tbins.stop().try_sub(tbins.start()),
        }
    }

    pub fn gti(&self) -> Option<&TimeBins> {
        self.gti.as_ref()
    }

    /// Output of the most recent successful `batbinevt` run.
    pub fn last_output(&self) -> Option<&TaskOutput> {
        self.last_output.as_ref()
    }

    /// Rebin in energy.
    pub fn set_energybins(&mut self, request: EnergyBinRequest) -> Result<()> {
        let (emin, emax) = request.resolve()?;

        if self.event_file.is_none() {
            let edges = edges_from_bounds(&emin, &emax, Unit::KiloElectronVolt);
            let histogram = match &self.events {
                Some(events) => {
                    events.histogram(&self.state.tbins().edges(), &edges)?
                }
                None => self.state.histogram().rebin_axis("ENERGY", &edges)?,
            };
            let ebins = EnergyBins::from_bounds(
                Quantity::from_vec(emin, Unit::KiloElectronVolt),
                Quantity::from_vec(emax, Unit::KiloElectronVolt),
            )?;
            let exposure = self.exposure()?;
            let state = HistogramState::new(histogram, self.state.tbins().clone(), ebins)?;
            return self.replace_in_memory(state, exposure);
        }

        let current = self.state.ebins().bounds_kev()?;
        let (cur_lo, cur_hi): (Vec<f64>, Vec<f64>) = current.into_iter().unzip();
        if bounds_match(&emin, &cur_lo) && bounds_match(&emax, &cur_hi) {
            log::debug!("energy bins unchanged; not re-running {BATBINEVT}");
            return Ok(());
        }

        let mut record = self.base_record()?;
        record.energybins = EnergyBinSpec::Ranges(emin.into_iter().zip(emax).collect());
        self.rebin_with_tool(record)
    }

    /// Rebin in time.
    pub fn set_timebins(&mut self, request: TimeBinRequest) -> Result<()> {
        let edges = request.resolve()?;

        if self.event_file.is_none() {
            let ebin_edges = self.state.ebins().edges();
            let (histogram, tbins, exposure) = match (&self.events, &edges) {
                (Some(events), edges) => {
                    let edges = match edges {
                        Some(edges) => edges.clone(),
                        None => self.uniform_edges(request.timedel)?,
                    };
                    let histogram = events.histogram(&edges, &ebin_edges)?;
                    let time_edges = histogram
                        .axis(TIME)
                        .map(|a| a.edges().clone())
                        .ok_or_else(|| Error::invalid("histogram lost its TIME axis"))?;
                    let tbins = TimeBins::from_edges(&time_edges)?;
                    let exposure = tbins.stop().try_sub(tbins.start())?;
                    (histogram, tbins, exposure)
                }
                (None, Some(edges)) => {
                    let histogram = self.state.histogram().rebin_axis(TIME, edges)?;
                    let (tbins, exposure) = self.merged_rows(edges)?;
                    (histogram, tbins, exposure)
                }
                (None, None) => {
                    return Err(Error::invalid(
                        "rebinning without an event file needs explicit time edges",
                    ))
                }
            };
            let state = HistogramState::new(histogram, tbins, self.state.ebins().clone())?;
            return self.replace_in_memory(state, exposure);
        }

        let dph_file = self.backing_file()?.to_path_buf();
        let mut record = self.base_record()?;
        match edges {
            Some(edges) if edges.len() > 2 => {
                let seconds = edges.to(&Unit::Second)?;
                let gti_file = write_gti_file(&seconds, &custom_gti_path(&dph_file))?;
                record.tstart = TimeBound::Indef;
                record.tstop = TimeBound::Indef;
                record.timebinalg = TimeBinAlg::Gti;
                record.gtifile = Some(gti_file);
            }
            edges => {
                if request.algorithm == TimeBinAlg::Gti {
                    return Err(Error::invalid(
                        "gti binning needs more than two explicit time edges",
                    ));
                }
                record.gtifile = None;
                record.timebinalg = request.algorithm;
                record.timedel = request.timedel;
                (record.tstart, record.tstop) = match edges {
                    Some(edges) => {
                        let v = edges.values_in(&Unit::Second)?;
                        (TimeBound::Met(v[0]), TimeBound::Met(v[1]))
                    }
                    None => (TimeBound::Indef, TimeBound::Indef),
                };
            }
        }
        self.rebin_with_tool(record)
    }

    /// Discard in-memory changes by re-reading the backing file.
    pub fn reset(&mut self) -> Result<()> {
        let parsed = parse_dph(self.backing_file()?)?;
        self.columns = parsed.columns;
        self.state = parsed.state;
        self.gti = Some(parsed.gti);
        Ok(())
    }

    /// Write the current contents over an existing DPH file (the backing
    /// file when `path` is `None`).
    pub fn to_fits(&self, path: Option<&Path>, overwrite: bool) -> Result<()> {
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => self.backing_file()?.to_path_buf(),
        };
        if !target.exists() {
            return Err(Error::NotImplemented("writing a DPH to a new file"));
        }
        if !overwrite {
            return Err(Error::invalid(format!(
                "{} exists; pass overwrite to replace it",
                target.display()
            )));
        }

        let mut file = FitsFile::open(&target)?;
        let (tstart, tstop) = self
            .state
            .tbins()
            .span()
            .ok_or_else(|| Error::invalid("no time bins to write"))?;

        let old = file.hdu(1)?.clone();
        let dph_hdu = self.data_hdu(&old)?;
        file.replace(1, dph_hdu)?;

        let eb_index = file
            .position("EBOUNDS")
            .ok_or_else(|| bat_fits::Error::MissingHdu(String::from("EBOUNDS")))?;
        let eb_hdu = self.ebounds_hdu(file.hdu(eb_index)?)?;
        file.replace(eb_index, eb_hdu)?;

        for hdu in file.hdus_mut() {
            hdu.header.set("TSTART", tstart);
            hdu.header.set("TSTOP", tstop);
        }

        replace_file(&file, &target)
    }

    // ── Internals ──

    fn backing_file(&self) -> Result<&Path> {
        self.dph_file
            .as_deref()
            .ok_or_else(|| Error::invalid("this DPH has no backing file"))
    }

    fn base_record(&self) -> Result<BinningRecord> {
        self.record
            .clone()
            .ok_or_else(|| Error::invalid("no binning record for this DPH"))
    }

    /// Run `batbinevt` with `record`, then swap in the re-parsed file. State
    /// is only touched once the new file has been read successfully.
    fn rebin_with_tool(&mut self, record: BinningRecord) -> Result<()> {
        let dph_file = self.backing_file()?.to_path_buf();
        let event_file = self
            .event_file
            .clone()
            .ok_or_else(|| Error::invalid("no event file to rebin"))?;
        let used = invocation_record(&record, &event_file, &dph_file);
        let out = run_checked(
            self.runner.as_ref(),
            BATBINEVT,
            &used.to_parameters(),
            dph_file.parent(),
        )?;
        let parsed = parse_dph(&dph_file)?;
        self.columns = parsed.columns;
        self.state = parsed.state;
        self.gti = Some(parsed.gti);
        self.record = Some(used);
        self.last_output = Some(out);
        log::info!("rebinned {}", dph_file.display());
        Ok(())
    }

    /// Uniform edges of `timedel` seconds covering the current time range.
    fn uniform_edges(&self, timedel: f64) -> Result<Quantity> {
        if timedel <= 0.0 {
            return Err(Error::invalid("timedel must be positive"));
        }
        let unit = self.state.tbins().start().unit().clone();
        let (lo, hi) = self
            .state
            .tbins()
            .span()
            .ok_or_else(|| Error::invalid("no time range to rebin"))?;
        let step = Quantity::scalar(timedel, Unit::Second).values_in(&unit)?[0];
        let mut edges = vec![lo];
        while edges.last().is_some_and(|&e| e < hi) {
            edges.push(lo + step * edges.len() as f64);
        }
        if edges.len() < 2 {
            edges.push(lo + step);
        }
        Ok(Quantity::from_vec(edges, unit))
    }

    /// Swap in `state` and mirror it into the `DPH_COUNTS`, `TIME` and
    /// `EXPOSURE` columns. `exposure` holds one value per time bin.
    fn replace_in_memory(&mut self, state: HistogramState, exposure: Quantity) -> Result<()> {
        let nrows = state.tbins().len();
        if exposure.len() != nrows {
            return Err(Error::invalid(format!(
                "{} exposures for {nrows} time bins",
                exposure.len()
            )));
        }
        self.state = state;
        let time = self.state.tbins().start().clone();

        self.columns.retain(|c| {
            let keep = c.rows() == nrows || [COUNTS, TIME, EXPOSURE].contains(&c.name.as_str());
            if !keep {
                log::debug!("dropping column {} after time rebinning", c.name);
            }
            keep
        });
        let histogram = self.state.histogram();
        let counts = DataColumn::new(
            COUNTS,
            histogram.contents().clone(),
            histogram.unit().clone(),
        );
        self.upsert(counts);
        self.upsert(DataColumn::new(
            TIME,
            time.values().clone().into_dyn(),
            time.unit().clone(),
        ));
        self.upsert(DataColumn::new(
            EXPOSURE,
            exposure.values().clone().into_dyn(),
            exposure.unit().clone(),
        ));
        Ok(())
    }

    /// Rows of the current DPH grouped onto `edges`, which must be existing
    /// time edges. Each group starts at its first row, stops at its latest
    /// stop and sums the exposure of its rows, so gaps between rows add no
    /// exposure.
    fn merged_rows(&self, edges: &Quantity) -> Result<(TimeBins, Quantity)> {
        let axis = self
            .state
            .histogram()
            .axis(TIME)
            .ok_or_else(|| Error::invalid("DPH has no TIME axis"))?;
        let idx = axis.edge_indices(&edges.values_in(axis.unit())?)?;
        if idx.len() < 2 || idx.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::invalid("time edges must be strictly increasing"));
        }
        let tbins = self.state.tbins();
        let start = tbins.start().to_vec();
        let stop = tbins.stop().to_vec();
        let exposure = self.exposure()?;
        let live = exposure.to_vec();

        let mut starts = Vec::with_capacity(idx.len() - 1);
        let mut stops = Vec::with_capacity(idx.len() - 1);
        let mut sums: Vec<f64> = Vec::with_capacity(idx.len() - 1);
        for w in idx.windows(2) {
            let rows = w[0]..w[1];
            starts.push(start[w[0]]);
            stops.push(stop[rows.clone()].iter().copied().fold(f64::MIN, f64::max));
            sums.push(live[rows].iter().sum());
        }
        let unit = tbins.start().unit().clone();
        Ok((
            TimeBins::new(
                Quantity::from_vec(starts, unit.clone()),
                Quantity::from_vec(stops, unit),
            )?,
            Quantity::from_vec(sums, exposure.unit().clone()),
        ))
    }

    fn upsert(&mut self, column: DataColumn) {
        match self.columns.iter_mut().find(|c| c.name == column.name) {
            Some(slot) => *slot = column,
            None => self.columns.push(column),
        }
    }

    /// HDU 1 rebuilt from the current data columns, keeping each column's
    /// stored type, scaling and unit and the old header's metadata cards.
    /// A column whose merged values no longer fit its stored type is widened.
    fn data_hdu(&self, old: &Hdu) -> Result<Hdu> {
        let table = BinTable::new(old)?;
        let nrows = self.state.tbins().len();
        let mut builder = BinTableBuilder::new(old.extname().unwrap_or("BAT_DPH"), nrows);
        for column in &self.columns {
            let dims = column.values.shape()[1..].to_vec();
            let mut spec = match table.column(&column.name).ok() {
                Some(c) => ColumnSpec::new(&column.name, c.format.ty()).with_scaling(c.scale(), c.zero()),
                None => ColumnSpec::new(&column.name, ColumnType::Double),
            };
            if dims.len() > 1 {
                spec = spec.with_dims(&dims);
            } else if let Some(&n) = dims.first() {
                spec = spec.with_repeat(n);
            }
            let unit = column.unit.symbol();
            if !unit.is_empty() {
                spec = spec.with_unit(unit);
            }
            let values: Vec<f64> = column.values.iter().copied().collect();
            let spec = spec.widened_for(&values);
            builder = builder.column(spec, values);
        }
        Ok(builder.cards_from(&old.header).build()?)
    }

    fn ebounds_hdu(&self, old: &Hdu) -> Result<Hdu> {
        let table = BinTable::new(old)?;
        let ebins = self.state.ebins();
        let ty = |name: &str, default: ColumnType| {
            table.column(name).map(|c| c.format.ty()).unwrap_or(default)
        };
        let unit = ebins.unit().symbol();
        let hdu = BinTableBuilder::new("EBOUNDS", ebins.len())
            .column(
                ColumnSpec::new("CHANNEL", ty("CHANNEL", ColumnType::Short)),
                ebins.index().iter().map(|&i| i as f64).collect::<Vec<_>>(),
            )
            .column(
                ColumnSpec::new("E_MIN", ty("E_MIN", ColumnType::Float)).with_unit(unit),
                ebins.min().to_vec(),
            )
            .column(
                ColumnSpec::new("E_MAX", ty("E_MAX", ColumnType::Float)).with_unit(unit),
                ColumnValues::Fixed(ebins.max().to_vec()),
            )
            .cards_from(&old.header)
            .build()?;
        Ok(hdu)
    }
}

/// `record` with the files this DPH binds forced, ready to pass to `batbinevt`.
fn invocation_record(record: &BinningRecord, event_file: &Path, dph_file: &Path) -> BinningRecord {
    let mut used = record.prepared_for(OutType::Dph);
    used.infile = event_file.to_path_buf();
    used.outfile = dph_file.to_path_buf();
    used
}

/// Assembles a [`BatDph`] from in-memory counts or events.
#[derive(Debug, Clone, Default)]
pub struct DphBuilder {
    timebins: Option<Quantity>,
    tmin: Option<Quantity>,
    tmax: Option<Quantity>,
    energybins: Option<Quantity>,
    emin: Option<Quantity>,
    emax: Option<Quantity>,
    counts: Option<ArrayD<f64>>,
    events: Option<EventList>,
}

impl DphBuilder {
    pub fn new() -> Self {
        Self::default()
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

    pub fn energybins(mut self, edges: Quantity) -> Self {
        self.energybins = Some(edges);
        self
    }

    pub fn energy_bounds(mut self, emin: Quantity, emax: Quantity) -> Self {
        self.emin = Some(emin);
        self.emax = Some(emax);
        self
    }

    /// Counts shaped `TIME x DETY x DETX x ENERGY`.
    pub fn counts(mut self, counts: ArrayD<f64>) -> Self {
        self.counts = Some(counts);
        self
    }

    pub fn events(mut self, events: EventList) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<BatDph> {
        let tbins = match (self.timebins, self.tmin, self.tmax) {
            (Some(edges), _, _) => TimeBins::from_edges(&edges)?,
            (None, Some(tmin), Some(tmax)) => TimeBins::new(tmin, tmax)?,
            _ => return Err(Error::invalid("time bins or tmin/tmax are required")),
        };
        let ebins = match (self.energybins, self.emin, self.emax) {
            (Some(edges), _, _) => EnergyBins::from_edges(&edges)?,
            (None, Some(emin), Some(emax)) => EnergyBins::from_bounds(emin, emax)?,
            _ => return Err(Error::invalid("energy bins or emin/emax are required")),
        };
        let histogram = match (&self.events, self.counts) {
            (Some(events), _) => events.histogram(&tbins.edges(), &ebins.edges())?,
            (None, Some(counts)) => dph_histogram(counts, &tbins, &ebins, Unit::Count)?,
            (None, None) => return Err(Error::invalid("either counts or events are required")),
        };
        let exposure = tbins.stop().try_sub(tbins.start())?;
        let state = HistogramState::new(histogram, tbins, ebins)?;
        let mut dph = BatDph {
            dph_file: None,
            event_file: None,
            events: self.events,
            record: None,
            columns: Vec::new(),
            gti: None,
            state: state.clone(),
            runner: Arc::new(Heasoft::from_env()),
            last_output: None,
        };
        dph.replace_in_memory(state, exposure)?;
        Ok(dph)
    }
}
