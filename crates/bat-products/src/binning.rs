//! Typed parameter record for `batbinevt`.

use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::history::ParameterSet;

/// Kind of product `batbinevt` writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OutType {
    Dph,
    Pha,
    Lc,
}

impl OutType {
    pub fn as_param(self) -> &'static str {
        match self {
            OutType::Dph => "DPH",
            OutType::Pha => "PHA",
            OutType::Lc => "LC",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_uppercase().as_str() {
            "DPH" => Some(OutType::Dph),
            "PHA" => Some(OutType::Pha),
            "LC" => Some(OutType::Lc),
            _ => None,
        }
    }
}

/// The `energybins` parameter.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EnergyBinSpec {
    /// Use the calibration database default binning.
    Caldb,
    /// Explicit `(lo, hi)` keV ranges.
    Ranges(Vec<(f64, f64)>),
    /// Anything else (e.g. a file name), passed through verbatim.
    Raw(String),
}

impl EnergyBinSpec {
    fn parse(text: &str) -> Self {
        if text.eq_ignore_ascii_case("CALDB") {
            return EnergyBinSpec::Caldb;
        }
        let ranges: Option<Vec<(f64, f64)>> = text
            .split(',')
            .map(|part| {
                let (lo, hi) = part.split_once('-')?;
                Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?))
            })
            .collect();
        match ranges {
            Some(r) if !r.is_empty() => EnergyBinSpec::Ranges(r),
            _ => EnergyBinSpec::Raw(text.to_string()),
        }
    }
}

impl fmt::Display for EnergyBinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnergyBinSpec::Caldb => f.write_str("CALDB"),
            EnergyBinSpec::Ranges(ranges) => {
                let parts: Vec<String> = ranges.iter().map(|(lo, hi)| format!("{lo}-{hi}")).collect();
                f.write_str(&parts.join(","))
            }
            EnergyBinSpec::Raw(s) => f.write_str(s),
        }
    }
}

/// `tstart` / `tstop`: a mission elapsed time or `INDEF`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeBound {
    Indef,
    Met(f64),
}

impl TimeBound {
    fn parse(name: &str, text: &str) -> Result<Self> {
        if text.eq_ignore_ascii_case("INDEF") {
            return Ok(TimeBound::Indef);
        }
        text.parse()
            .map(TimeBound::Met)
            .map_err(|_| Error::invalid(format!("{name} must be INDEF or a time, got '{text}'")))
    }
}

impl fmt::Display for TimeBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBound::Indef => f.write_str("INDEF"),
            TimeBound::Met(t) => write!(f, "{t}"),
        }
    }
}

/// The `timebinalg` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TimeBinAlg {
    Uniform,
    Snr,
    Gti,
}

impl TimeBinAlg {
    pub fn as_param(self) -> &'static str {
        match self {
            TimeBinAlg::Uniform => "uniform",
            TimeBinAlg::Snr => "snr",
            TimeBinAlg::Gti => "gti",
        }
    }

    fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "uniform" | "u" => Some(TimeBinAlg::Uniform),
            "snr" | "s" => Some(TimeBinAlg::Snr),
            "gti" | "g" => Some(TimeBinAlg::Gti),
            _ => None,
        }
    }
}

fn parse_bool(name: &str, text: &str) -> Result<bool> {
    match text.to_ascii_uppercase().as_str() {
        "YES" | "Y" | "TRUE" | "T" => Ok(true),
        "NO" | "N" | "FALSE" | "F" => Ok(false),
        _ => Err(Error::invalid(format!("{name} must be YES or NO, got '{text}'"))),
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

/// Parameters of one `batbinevt` invocation.
///
/// The fields the wrappers manipulate are typed; every other task parameter
/// is kept in `extra` and passed through untouched.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinningRecord {
    pub infile: PathBuf,
    pub outfile: PathBuf,
    pub outtype: OutType,
    pub energybins: EnergyBinSpec,
    pub weighted: bool,
    /// Bin width in seconds; 0 accumulates a single bin.
    pub timedel: f64,
    pub tstart: TimeBound,
    pub tstop: TimeBound,
    pub timebinalg: TimeBinAlg,
    /// Custom good time intervals; `None` is passed as `NONE`.
    pub gtifile: Option<PathBuf>,
    pub clobber: bool,
    pub extra: ParameterSet,
}

const TYPED: [&str; 11] = [
    "infile",
    "outfile",
    "outtype",
    "energybins",
    "weighted",
    "timedel",
    "tstart",
    "tstop",
    "timebinalg",
    "gtifile",
    "clobber",
];

impl BinningRecord {
    /// Record used when a DPH is first made from an event file: 14-195 keV,
    /// unweighted, the whole observation in one uniform bin.
    pub fn dph_defaults(infile: &Path, outfile: &Path) -> Self {
        BinningRecord {
            infile: infile.to_path_buf(),
            outfile: outfile.to_path_buf(),
            outtype: OutType::Dph,
            energybins: EnergyBinSpec::Ranges(vec![(14.0, 195.0)]),
            weighted: false,
            timedel: 0.0,
            tstart: TimeBound::Indef,
            tstop: TimeBound::Indef,
            timebinalg: TimeBinAlg::Uniform,
            gtifile: None,
            clobber: true,
            extra: ParameterSet::new(),
        }
    }

    /// Copy of this record forced to write `outtype` and to overwrite.
    pub fn prepared_for(&self, outtype: OutType) -> Self {
        BinningRecord {
            outtype,
            clobber: true,
            ..self.clone()
        }
    }

    /// Validate and convert a raw parameter list.
    pub fn from_parameters(params: &ParameterSet) -> Result<Self> {
        let get = |name: &str| {
            params
                .get(name)
                .ok_or_else(|| Error::invalid(format!("missing parameter {name}")))
        };
        let outtype = get("outtype")?;
        let timedel = get("timedel")?;
        let timebinalg = get("timebinalg")?;
        let gtifile = get("gtifile")?;

        let extra = params
            .iter()
            .filter(|(name, _)| !TYPED.contains(name))
            .collect();

        Ok(BinningRecord {
            infile: PathBuf::from(get("infile")?),
            outfile: PathBuf::from(get("outfile")?),
            outtype: OutType::parse(outtype)
                .ok_or_else(|| Error::invalid(format!("unknown outtype '{outtype}'")))?,
            energybins: EnergyBinSpec::parse(get("energybins")?),
            weighted: parse_bool("weighted", get("weighted")?)?,
            timedel: timedel
                .parse()
                .map_err(|_| Error::invalid(format!("timedel must be a number, got '{timedel}'")))?,
            tstart: TimeBound::parse("tstart", get("tstart")?)?,
            tstop: TimeBound::parse("tstop", get("tstop")?)?,
            timebinalg: TimeBinAlg::parse(timebinalg)
                .ok_or_else(|| Error::invalid(format!("unknown timebinalg '{timebinalg}'")))?,
            gtifile: (!gtifile.eq_ignore_ascii_case("NONE")).then(|| PathBuf::from(gtifile)),
            clobber: parse_bool("clobber", get("clobber")?)?,
            extra,
        })
    }

    /// Flatten into the task's parameter list, typed fields first.
    pub fn to_parameters(&self) -> ParameterSet {
        let mut params = ParameterSet::new();
        params.set("infile", self.infile.display().to_string());
        params.set("outfile", self.outfile.display().to_string());
        params.set("outtype", self.outtype.as_param());
        params.set("energybins", self.energybins.to_string());
        params.set("weighted", yes_no(self.weighted));
        params.set("timedel", self.timedel.to_string());
        params.set("tstart", self.tstart.to_string());
        params.set("tstop", self.tstop.to_string());
        params.set("timebinalg", self.timebinalg.as_param());
        params.set(
            "gtifile",
            match &self.gtifile {
                Some(path) => path.display().to_string(),
                None => String::from("NONE"),
            },
        );
        params.set("clobber", yes_no(self.clobber));
        for (name, value) in self.extra.iter() {
            params.set(name, value);
        }
        params
    }
}
