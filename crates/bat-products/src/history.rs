//! Recover the parameters a HEASoft task was run with from the `HISTORY`
//! cards it wrote into its output.
//!
//! Tasks record their parameters as a block such as
//!
//! ```text
//! START PARAMETER list for batbinevt_1.48 at 2023-11-16T18:47:52
//! P1 infile = /data/01116441000/events/sw0
//! P1 1116441000bevshsp_uf.evt
//! P3 outtype = DPH
//! END PARAMETER list for batbinevt_1.48
//! ```
//!
//! where long values wrap onto continuation lines that repeat the ordinal
//! but carry no `=`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Name of the binning task whose history DPH files carry.
pub const BATBINEVT: &str = "batbinevt";

/// Ordered `name -> raw value` parameter list of a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterSet {
    entries: Vec<(String, String)>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set `name`, keeping its position if it already exists.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    fn append(&mut self, name: &str, suffix: &str) {
        if let Some((_, v)) = self.entries.iter_mut().find(|(k, _)| k == name) {
            v.push_str(suffix);
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == name)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `name=value` arguments in order, as passed on a task command line.
    pub fn to_args(&self) -> Vec<String> {
        self.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = ParameterSet::new();
        for (k, v) in iter {
            set.set(&k.into(), v);
        }
        set
    }
}

/// The default parameter list of `batbinevt`, in task order.
pub fn batbinevt_defaults() -> ParameterSet {
    [
        ("infile", ""),
        ("outfile", ""),
        ("outtype", "PHA"),
        ("timedel", "0.0"),
        ("timebinalg", "uniform"),
        ("energybins", "CALDB"),
        ("gtifile", "NONE"),
        ("ecol", "ENERGY"),
        ("weighted", "YES"),
        ("outunits", "INDEF"),
        ("timepixr", "-1.0"),
        ("maskwt", "NONE"),
        ("tstart", "INDEF"),
        ("tstop", "INDEF"),
        ("snrthresh", "6.0"),
        ("detmask", "NONE"),
        ("tcol", "TIME"),
        ("countscol", "DPH_COUNTS"),
        ("xcol", "DETX"),
        ("ycol", "DETY"),
        ("maskwtcol", "MASK_WEIGHT"),
        ("ebinquant", "0.1"),
        ("delzeroes", "no"),
        ("minfracexp", "0.1"),
        ("min_dph_frac_overlap", "0.999"),
        ("min_dph_time_overlap", "0.0"),
        ("max_dph_time_nonoverlap", "0.5"),
        ("buffersize", "16384"),
        ("clobber", "no"),
        ("chatter", "2"),
        ("history", "yes"),
        ("mode", "ql"),
    ]
    .into_iter()
    .collect()
}

/// Overlay the parameters recorded for `task` in `lines` onto `defaults`.
///
/// The first line mentioning `task` opens the parameter block and the next
/// one closes it; later mentions do not reopen it. Inside the block, lines
/// containing `START` and empty lines are skipped, `<n> <name> = <value>`
/// sets a parameter and a line without `=` extends the previous one.
pub fn reconstruct<'a, I>(defaults: &ParameterSet, task: &str, lines: I) -> ParameterSet
where
    I: IntoIterator<Item = &'a str>,
{
    scan(defaults.clone(), task, lines).0
}

/// Like [`reconstruct`] but `None` when the task never appears.
pub fn from_history<'a, I>(task: &str, lines: I) -> Option<ParameterSet>
where
    I: IntoIterator<Item = &'a str>,
{
    let defaults = match task {
        BATBINEVT => batbinevt_defaults(),
        _ => ParameterSet::new(),
    };
    match scan(defaults, task, lines) {
        (params, true) => Some(params),
        (_, false) => None,
    }
}

fn scan<'a, I>(mut params: ParameterSet, task: &str, lines: I) -> (ParameterSet, bool)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut active: Option<bool> = None;
    let mut previous: Option<String> = None;

    for line in lines {
        if line.contains(task) {
            active = match active {
                None => Some(true),
                Some(_) => Some(false),
            };
        }
        if active != Some(true) || line.contains("START") || line.is_empty() {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let (Some(name), Some(last)) = (tokens.get(1), tokens.last()) else {
            continue;
        };
        if tokens.contains(&"=") {
            params.set(name, *last);
            previous = Some(name.to_string());
        } else if let Some(prev) = &previous {
            params.append(prev, last);
        }
    }

    if active.is_none() {
        log::warn!("no {task} parameter block found in history");
    }
    (params, active.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &[&str] = &[
        "START PARAMETER list for batbinevt_1.48 at 2023-11-16T18:47:52",
        "",
        "P1 infile = /data/01116441000/events/sw0",
        "P1 1116441000bevshsp_uf.evt",
        "P2 outfile = /data/01116441000/pha/spect",
        "P2 rum_0.pha",
        "P3 outtype = PHA",
        "P6 energybins = 14-195",
        "P13 tstart = INDEF",
        "END PARAMETER list for batbinevt_1.48",
        "P3 outtype = LC",
    ];

    #[test]
    fn continuation_lines_append() {
        let params = reconstruct(
            &ParameterSet::new(),
            "batbinevt",
            ["batbinevt", "P2 outfile = /a/b", "P2 c", "batbinevt"],
        );
        assert_eq!(params.get("outfile"), Some("/a/bc"));
    }

    #[test]
    fn block_overrides_defaults() {
        let params = reconstruct(&batbinevt_defaults(), BATBINEVT, HISTORY.iter().copied());
        assert_eq!(
            params.get("infile"),
            Some("/data/01116441000/events/sw01116441000bevshsp_uf.evt")
        );
        assert_eq!(
            params.get("outfile"),
            Some("/data/01116441000/pha/spectrum_0.pha")
        );
        assert_eq!(params.get("energybins"), Some("14-195"));
        assert_eq!(params.get("ecol"), Some("ENERGY"));
    }

    #[test]
    fn lines_after_end_marker_are_ignored() {
        let params = reconstruct(&batbinevt_defaults(), BATBINEVT, HISTORY.iter().copied());
        assert_eq!(params.get("outtype"), Some("PHA"));
    }

    #[test]
    fn third_marker_does_not_reopen() {
        let params = reconstruct(
            &ParameterSet::new(),
            "batbinevt",
            [
                "START batbinevt",
                "P1 a = 1",
                "END batbinevt",
                "START batbinevt",
                "P1 a = 2",
            ],
        );
        assert_eq!(params.get("a"), Some("1"));
    }

    #[test]
    fn orphan_continuation_and_short_lines_are_ignored() {
        let params = reconstruct(
            &ParameterSet::new(),
            "batbinevt",
            ["batbinevt begins", "P1 orphan", "lonely", "P2 x = 3"],
        );
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("x"), Some("3"));
    }

    #[test]
    fn no_marker_returns_defaults() {
        let defaults = batbinevt_defaults();
        let params = reconstruct(&defaults, BATBINEVT, ["P3 outtype = LC"]);
        assert_eq!(params, defaults);
        assert!(from_history(BATBINEVT, ["P3 outtype = LC"]).is_none());
    }

    #[test]
    fn from_history_starts_from_task_defaults() {
        let params = from_history(BATBINEVT, HISTORY.iter().copied()).unwrap();
        assert_eq!(params.get("countscol"), Some("DPH_COUNTS"));
        assert_eq!(params.get("outtype"), Some("PHA"));
    }

    #[test]
    fn args_keep_order() {
        let mut set = ParameterSet::new();
        set.set("infile", "a.evt");
        set.set("clobber", "YES");
        set.set("infile", "b.evt");
        assert_eq!(set.to_args(), vec!["infile=b.evt", "clobber=YES"]);
    }
}
