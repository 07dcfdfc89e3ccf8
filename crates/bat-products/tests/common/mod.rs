//! Shared fixtures: a stand-in for HEASoft that writes small but complete
//! products, and writers for DPH and event files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bat_fits::{BinTable, BinTableBuilder, Card, ColumnSpec, ColumnType, FitsFile, Hdu};
use bat_products::gti::gti_hdu;
use bat_products::history::ParameterSet;
use bat_products::{
    DrmBuilder, EnergyBinSpec, Error, Quantity, Result, TaskOutput, TaskRunner, TimeBins, Unit,
};

/// Detector plane used by the fixtures; much smaller than the real 173 x 286.
pub const DETY: usize = 2;
pub const DETX: usize = 3;

/// Time range binned when no bounds or GTI file are given.
pub const OBS_START: f64 = 0.0;
pub const OBS_STOP: f64 = 100.0;

/// Records every call and writes a deterministic product for each.
#[derive(Default)]
pub struct FakeHeasoft {
    calls: AtomicUsize,
    params: Mutex<Vec<(String, ParameterSet, Option<PathBuf>)>>,
    fail_with: Mutex<Option<String>>,
}

impl FakeHeasoft {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeHeasoft::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_params(&self) -> ParameterSet {
        self.params
            .lock()
            .unwrap()
            .last()
            .map(|(_, p, _)| p.clone())
            .expect("no task has run")
    }

    pub fn last_workdir(&self) -> Option<PathBuf> {
        self.params.lock().unwrap().last().and_then(|(_, _, w)| w.clone())
    }

    /// Make every following run exit with status 1 and this output.
    pub fn fail_with(&self, text: &str) {
        *self.fail_with.lock().unwrap() = Some(text.to_string());
    }
}

impl TaskRunner for FakeHeasoft {
    fn run(&self, task: &str, params: &ParameterSet, workdir: Option<&Path>) -> Result<TaskOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.params.lock().unwrap().push((
            task.to_string(),
            params.clone(),
            workdir.map(Path::to_path_buf),
        ));
        if let Some(text) = self.fail_with.lock().unwrap().clone() {
            return Ok(TaskOutput {
                status: 1,
                output: text,
            });
        }
        match task {
            "batbinevt" => fake_batbinevt(params)?,
            "batdrmgen" => fake_batdrmgen(params, workdir)?,
            other => {
                return Ok(TaskOutput {
                    status: 127,
                    output: format!("{other}: command not found"),
                })
            }
        }
        Ok(TaskOutput {
            status: 0,
            output: format!("{task} finished"),
        })
    }
}

fn time_bins(params: &ParameterSet) -> Result<(Vec<f64>, Vec<f64>)> {
    let gtifile = params.get("gtifile").unwrap_or("NONE");
    if !gtifile.eq_ignore_ascii_case("NONE") {
        let file = FitsFile::open(gtifile)?;
        let table = BinTable::new(file.hdu_by_name("GTI")?)?;
        return Ok((table.read_f64("START")?, table.read_f64("STOP")?));
    }
    let bound = |name: &str, default: f64| {
        params
            .get(name)
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(default)
    };
    Ok((
        vec![bound("tstart", OBS_START)],
        vec![bound("tstop", OBS_STOP)],
    ))
}

fn energy_bins(params: &ParameterSet) -> Vec<(f64, f64)> {
    match params.get("energybins") {
        Some(text) if !text.eq_ignore_ascii_case("CALDB") => text
            .split(',')
            .filter_map(|r| {
                let (lo, hi) = r.split_once('-')?;
                Some((lo.parse().ok()?, hi.parse().ok()?))
            })
            .collect(),
        _ => vec![(14.0, 195.0)],
    }
}

fn fake_batbinevt(params: &ParameterSet) -> Result<()> {
    let outfile = params
        .get("outfile")
        .ok_or_else(|| Error::InvalidInput("outfile missing".into()))?;
    let (start, stop) = time_bins(params)?;
    let ebins = energy_bins(params);
    let history: Vec<String> = params
        .iter()
        .enumerate()
        .flat_map(|(i, (name, value))| history_lines(i + 1, name, value))
        .collect();
    write_dph(Path::new(outfile), &start, &stop, &ebins, &history)
}

/// `P<n> name = value`, wrapped onto `P<n> rest` lines to fit a card.
fn history_lines(n: usize, name: &str, value: &str) -> Vec<String> {
    const WIDTH: usize = 72;
    let head = format!("P{n} {name} = ");
    let mut lines = Vec::new();
    let mut rest = value;
    let take = WIDTH.saturating_sub(head.len()).max(1).min(rest.len());
    lines.push(format!("{head}{}", &rest[..take]));
    rest = &rest[take..];
    while !rest.is_empty() {
        let prefix = format!("P{n} ");
        let take = (WIDTH - prefix.len()).min(rest.len());
        lines.push(format!("{prefix}{}", &rest[..take]));
        rest = &rest[take..];
    }
    lines
}

fn fake_batdrmgen(params: &ParameterSet, workdir: Option<&Path>) -> Result<()> {
    let outfile = params
        .get("outfile")
        .ok_or_else(|| Error::InvalidInput("outfile missing".into()))?;
    let path = workdir.map_or_else(|| PathBuf::from(outfile), |d| d.join(outfile));
    std::fs::write(&path, b"")?;
    DrmBuilder::new(ndarray::array![[1.0, 0.5], [0.25, 2.0]].into_dyn())
        .timebins(Quantity::from_vec(vec![OBS_START, OBS_STOP], Unit::Second))
        .input_energybins(Quantity::from_vec(vec![10.0, 50.0, 200.0], Unit::KiloElectronVolt))
        .output_energybins(Quantity::from_vec(vec![14.0, 50.0, 195.0], Unit::KiloElectronVolt))
        .build()?
        .save(&path, true)
}

/// Write a DPH with one row per `(start, stop)` pair and one energy bin per
/// range; every count is 1 in the first row, 2 in the second, and so on.
pub fn write_dph(
    path: &Path,
    start: &[f64],
    stop: &[f64],
    ebins: &[(f64, f64)],
    history: &[String],
) -> Result<()> {
    let rows: Vec<DphRow> = start
        .iter()
        .zip(stop)
        .enumerate()
        .map(|(i, (&a, &b))| DphRow {
            time: a,
            exposure: b - a,
            count: (i + 1) as f64,
        })
        .collect();
    write_dph_rows(path, &rows, ebins, ColumnType::Int, history)
}

/// One DPH row: bin start, live exposure and the count held by every cell.
#[derive(Debug, Clone, Copy)]
pub struct DphRow {
    pub time: f64,
    pub exposure: f64,
    pub count: f64,
}

/// Write a DPH from explicit rows, storing `DPH_COUNTS` as `counts_type`.
/// Rows may leave gaps; each covers `time .. time + exposure`.
pub fn write_dph_rows(
    path: &Path,
    rows: &[DphRow],
    ebins: &[(f64, f64)],
    counts_type: ColumnType,
    history: &[String],
) -> Result<()> {
    let nrows = rows.len();
    let ne = ebins.len();
    let cell = DETY * DETX * ne;
    let counts: Vec<f64> = rows
        .iter()
        .flat_map(|row| std::iter::repeat(row.count).take(cell))
        .collect();
    let last = rows[nrows - 1];

    let mut builder = BinTableBuilder::new("BAT_DPH", nrows)
        .column(
            ColumnSpec::new("TIME", ColumnType::Double).with_unit("s"),
            rows.iter().map(|r| r.time).collect::<Vec<_>>(),
        )
        .column(
            ColumnSpec::new("EXPOSURE", ColumnType::Double).with_unit("s"),
            rows.iter().map(|r| r.exposure).collect::<Vec<_>>(),
        )
        .column(
            ColumnSpec::new("DPH_COUNTS", counts_type)
                .with_dims(&[DETY, DETX, ne])
                .with_unit("count"),
            counts,
        )
        .column(ColumnSpec::new("GAIN_INDEX", ColumnType::Int), vec![7.0; nrows])
        .card(Card::new("TSTART", rows[0].time))
        .card(Card::new("TSTOP", last.time + last.exposure))
        .card(Card::history("START PARAMETER list for batbinevt_1.48 at 2024-01-01T00:00:00"));
    for line in history {
        builder = builder.card(Card::history(line));
    }
    let dph = builder
        .card(Card::history("END PARAMETER list for batbinevt_1.48"))
        .build()?;

    let channels: Vec<f64> = (0..ne).map(|i| i as f64).collect();
    let ebounds = BinTableBuilder::new("EBOUNDS", ne)
        .column(ColumnSpec::new("CHANNEL", ColumnType::Short), channels)
        .column(
            ColumnSpec::new("E_MIN", ColumnType::Float).with_unit("keV"),
            ebins.iter().map(|e| e.0).collect::<Vec<_>>(),
        )
        .column(
            ColumnSpec::new("E_MAX", ColumnType::Float).with_unit("keV"),
            ebins.iter().map(|e| e.1).collect::<Vec<_>>(),
        )
        .build()?;

    let gti = TimeBins::new(
        Quantity::from_vec(vec![OBS_START], Unit::Second),
        Quantity::from_vec(vec![OBS_STOP], Unit::Second),
    )?;
    FitsFile::new(vec![Hdu::empty_primary(), dph, ebounds, gti_hdu(&gti)?]).write(path)?;
    Ok(())
}

/// A DPH with a single 0-100 s row in 14-195 keV and no history.
pub fn write_plain_dph(path: &Path) -> Result<()> {
    write_dph(path, &[OBS_START], &[OBS_STOP], &[(14.0, 195.0)], &[])
}

/// The file does not have to be a real event list; the fake tool never
/// reads it.
pub fn touch(path: &Path) {
    std::fs::write(path, b"").unwrap();
}

pub fn energy_spec(ranges: &[(f64, f64)]) -> EnergyBinSpec {
    EnergyBinSpec::Ranges(ranges.to_vec())
}

/// Gzip-wrap `payload` (the CRC is left zero).
pub fn gzip_bytes(payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];
    out.extend_from_slice(&miniz_oxide::deflate::compress_to_vec(payload, 6));
    out.extend_from_slice(&[0; 4]);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out
}
