//! Good time interval extensions and custom time-binning files.

use std::path::{Component, Path, PathBuf};

use bat_fits::{BinTable, BinTableBuilder, Card, ColumnSpec, ColumnType, FitsFile, Hdu};

use crate::bins::TimeBins;
use crate::error::{Error, Result};
use crate::units::{Quantity, Unit};

/// Extension names searched for good time intervals, in order.
const GTI_EXTENSIONS: [&str; 2] = ["GTI", "STDGTI"];

/// Read the good time intervals of `file` from `GTI`, else `STDGTI`.
pub fn read_gti(file: &FitsFile) -> Result<TimeBins> {
    let hdu = GTI_EXTENSIONS
        .iter()
        .find_map(|name| file.find(name))
        .ok_or_else(|| bat_fits::Error::MissingHdu(String::from("GTI")))?;
    let table = BinTable::new(hdu)?;
    let unit = |col: &str| -> Result<Unit> {
        Ok(table
            .column(col)?
            .unit
            .as_deref()
            .map_or(Unit::Second, Unit::parse))
    };
    let start = Quantity::from_vec(table.read_f64("START")?, unit("START")?);
    let stop = Quantity::from_vec(table.read_f64("STOP")?, unit("STOP")?);
    TimeBins::new(start, stop)
}

/// A `GTI` extension holding one interval per bin of `bins`, in seconds.
pub fn gti_hdu(bins: &TimeBins) -> Result<Hdu> {
    let start = bins.start().values_in(&Unit::Second)?;
    let stop = bins.stop().values_in(&Unit::Second)?;
    let (tstart, tstop) = bins
        .span()
        .ok_or_else(|| Error::invalid("no time bins to write"))?;
    let hdu = BinTableBuilder::new("GTI", start.len())
        .column(ColumnSpec::new("START", ColumnType::Double).with_unit("s"), start)
        .column(ColumnSpec::new("STOP", ColumnType::Double).with_unit("s"), stop)
        .card(Card::new("HDUCLASS", "OGIP"))
        .card(Card::new("HDUCLAS1", "GTI"))
        .card(Card::new("HDUCLAS2", "STANDARD"))
        .card(Card::new("TIMEUNIT", "s"))
        .card(Card::new("TSTART", tstart))
        .card(Card::new("TSTOP", tstop))
        .build()?;
    Ok(hdu)
}

/// Write a GTI file whose intervals are the bins between consecutive
/// `edges`. An existing file at `path` is replaced.
pub fn write_gti_file(edges: &Quantity, path: &Path) -> Result<PathBuf> {
    let bins = TimeBins::from_edges(edges)?;
    let file = FitsFile::new(vec![Hdu::empty_primary(), gti_hdu(&bins)?]);
    file.write(path)?;
    log::info!("wrote {} custom time bins to {}", bins.len(), path.display());
    Ok(path.to_path_buf())
}

/// Where the custom time-binning file for `dph_file` goes: `dph` becomes
/// `gti` in the file name, and the file sits in the directory above a
/// `survey` path component when there is one, else beside the DPH.
pub fn custom_gti_path(dph_file: &Path) -> PathBuf {
    let name = dph_file
        .file_name()
        .map(|n| n.to_string_lossy().replace("dph", "gti"))
        .unwrap_or_else(|| String::from("custom.gti"));

    let components: Vec<Component> = dph_file.components().collect();
    match components
        .iter()
        .position(|c| c.as_os_str() == "survey")
    {
        Some(idx) => components[..idx].iter().collect::<PathBuf>().join(name),
        None => dph_file.with_file_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gti_path_goes_above_survey() {
        assert_eq!(
            custom_gti_path(Path::new("/obs/0011/results/survey/sw0011b.dph")),
            PathBuf::from("/obs/0011/results/sw0011b.gti")
        );
    }

    #[test]
    fn gti_path_beside_dph_without_survey() {
        assert_eq!(
            custom_gti_path(Path::new("/obs/0011/dph/sw0011b_dph.dph")),
            PathBuf::from("/obs/0011/dph/sw0011b_gti.gti")
        );
    }

    #[test]
    fn gti_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bins.gti");
        let edges = Quantity::from_vec(vec![0.0, 10.0, 25.0, 40.0], Unit::Second);
        write_gti_file(&edges, &path).unwrap();

        let file = FitsFile::open(&path).unwrap();
        let bins = read_gti(&file).unwrap();
        assert_eq!(bins.start().to_vec(), vec![0.0, 10.0, 25.0]);
        assert_eq!(bins.stop().to_vec(), vec![10.0, 25.0, 40.0]);
        let gti = file.hdu_by_name("GTI").unwrap();
        assert_eq!(gti.header.float("TSTOP"), Some(40.0));
    }

    #[test]
    fn stdgti_is_the_fallback() {
        let bins = TimeBins::from_edges(&Quantity::from_vec(vec![1.0, 2.0], Unit::Second)).unwrap();
        let mut hdu = gti_hdu(&bins).unwrap();
        hdu.header.set("EXTNAME", "STDGTI");
        let file = FitsFile::new(vec![Hdu::empty_primary(), hdu]);
        assert_eq!(read_gti(&file).unwrap(), bins);
    }

    #[test]
    fn missing_gti_is_an_error() {
        let file = FitsFile::new(vec![Hdu::empty_primary()]);
        assert!(matches!(read_gti(&file), Err(Error::Fits(_))));
    }
}
