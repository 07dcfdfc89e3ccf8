//! Response matrices: generation through a fake `batdrmgen`, parsing of
//! plain, compressed and grouped response files, and combination.

mod common;

use std::fs;

use approx::assert_relative_eq;
use bat_fits::{BinTableBuilder, Card, ColumnSpec, ColumnType, ColumnValues, FitsFile, Hdu};
use bat_products::{calc_drm, BatDrm, DrmSource, Error, Unit};
use common::FakeHeasoft;
use ndarray::array;

#[test]
fn pha_file_goes_through_batdrmgen() {
    let dir = tempfile::tempdir().unwrap();
    let pha = dir.path().join("grb_total.pha");
    common::touch(&pha);
    let fake = FakeHeasoft::new();

    let drm = BatDrm::from_file(DrmSource::pha(&pha), &*fake).unwrap();

    assert_eq!(fake.calls(), 1);
    let params = fake.last_params();
    assert_eq!(params.get("infile"), Some("grb_total.pha"));
    assert_eq!(params.get("outfile"), Some("grb_total.rsp"));
    assert_eq!(params.get("chatter"), Some("2"));
    assert_eq!(params.get("clobber"), Some("YES"));
    assert_eq!(params.get("hkfile"), Some("NONE"));
    assert_eq!(fake.last_workdir().as_deref(), Some(dir.path()));

    assert_eq!(drm.matrix(), &array![[[1.0, 0.5], [0.25, 2.0]]].into_dyn());
    assert_eq!(drm.tbins().start().to_vec(), vec![0.0]);
    assert_eq!(drm.tbins().stop().to_vec(), vec![100.0]);
    assert_eq!(drm.input_ebins().len(), 2);
    assert_eq!(drm.output_ebins().bounds_kev().unwrap(), vec![(14.0, 50.0), (50.0, 195.0)]);
    assert_eq!(drm.histogram().unit(), &Unit::SquareCentimeter);
}

#[test]
fn calc_drm_returns_one_response_per_spectrum() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("src.a.pha");
    let b = dir.path().join("bkg.pha");
    common::touch(&a);
    common::touch(&b);
    let fake = FakeHeasoft::new();

    let out = calc_drm(&[&a, &b], &*fake).unwrap();

    assert_eq!(out, vec![dir.path().join("src.a.rsp"), dir.path().join("bkg.rsp")]);
    assert!(out.iter().all(|p| p.exists()));
    assert_eq!(fake.calls(), 2);
}

#[test]
fn batdrmgen_failure_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let pha = dir.path().join("src.pha");
    common::touch(&pha);
    let fake = FakeHeasoft::new();
    fake.fail_with("batdrmgen: unable to find CALDB files");

    let err = BatDrm::from_file(DrmSource::pha(&pha), &*fake).unwrap_err();
    match err {
        Error::ExternalToolFailure { task, message } => {
            assert_eq!(task, "batdrmgen");
            assert_eq!(message, "batdrmgen: unable to find CALDB files");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn source_is_checked_before_anything_runs() {
    let fake = FakeHeasoft::new();
    assert!(matches!(
        BatDrm::from_file(DrmSource::default(), &*fake),
        Err(Error::InvalidInput(_))
    ));
    let both = DrmSource {
        pha_file: Some("x.pha".into()),
        drm_file: Some("x.rsp".into()),
    };
    assert!(matches!(
        BatDrm::from_file(both, &*fake),
        Err(Error::InvalidInput(_))
    ));
    assert!(matches!(
        BatDrm::from_file(DrmSource::pha("/nonexistent/x.pha"), &*fake),
        Err(Error::MissingFile(_))
    ));
    assert_eq!(fake.calls(), 0);
}

#[test]
fn gzipped_response_parses_like_plain() {
    let dir = tempfile::tempdir().unwrap();
    let pha = dir.path().join("src.pha");
    common::touch(&pha);
    let fake = FakeHeasoft::new();
    let rsp = calc_drm(&[&pha], &*fake).unwrap().remove(0);
    let plain = BatDrm::from_file(DrmSource::drm(&rsp), &*fake).unwrap();

    let gz = dir.path().join("copy.rsp.gz");
    fs::write(&gz, common::gzip_bytes(&fs::read(&rsp).unwrap())).unwrap();
    let unpacked = BatDrm::from_file(DrmSource::drm(&gz), &*fake).unwrap();

    assert!(dir.path().join("copy.rsp").exists());
    assert_eq!(unpacked, plain);
    assert_eq!(fake.calls(), 1);
}

/// A two-channel response stored OGIP-grouped: variable-length rows with
/// channel numbering starting at 1.
fn grouped_response(path: &std::path::Path) {
    let matrix = BinTableBuilder::new("SPECRESP MATRIX", 3)
        .column(
            ColumnSpec::new("ENERG_LO", ColumnType::Float).with_unit("keV"),
            vec![10.0, 20.0, 40.0],
        )
        .column(
            ColumnSpec::new("ENERG_HI", ColumnType::Float).with_unit("keV"),
            vec![20.0, 40.0, 80.0],
        )
        .column(ColumnSpec::new("N_GRP", ColumnType::Short), vec![1.0, 1.0, 0.0])
        .column(ColumnSpec::new("F_CHAN", ColumnType::Short), vec![2.0, 1.0, 1.0])
        .column(ColumnSpec::new("N_CHAN", ColumnType::Short), vec![1.0, 2.0, 0.0])
        .column(
            ColumnSpec::variable("MATRIX", ColumnType::Float),
            ColumnValues::Variable(vec![vec![0.5], vec![0.25, 0.75], vec![]]),
        )
        .card(Card::new("TLMIN4", 1_i64))
        .card(Card::new("TSTART", 500.0))
        .card(Card::new("TSTOP", 520.0))
        .card(Card::new("TIMEUNIT", "s"))
        .build()
        .unwrap();
    let ebounds = BinTableBuilder::new("EBOUNDS", 2)
        .column(ColumnSpec::new("CHANNEL", ColumnType::Short), vec![1.0, 2.0])
        .column(
            ColumnSpec::new("E_MIN", ColumnType::Float).with_unit("keV"),
            vec![14.0, 50.0],
        )
        .column(
            ColumnSpec::new("E_MAX", ColumnType::Float).with_unit("keV"),
            vec![50.0, 195.0],
        )
        .build()
        .unwrap();
    FitsFile::new(vec![Hdu::empty_primary(), matrix, ebounds])
        .write(path)
        .unwrap();
}

#[test]
fn grouped_rows_are_expanded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("grouped.rsp");
    grouped_response(&path);

    let drm = BatDrm::from_file(DrmSource::drm(&path), &*FakeHeasoft::new()).unwrap();
    assert_eq!(
        drm.matrix(),
        &array![[[0.0, 0.5], [0.25, 0.75], [0.0, 0.0]]].into_dyn()
    );
    assert_eq!(drm.tbins().center().to_vec(), vec![510.0]);
}

#[test]
fn combined_responses_can_be_saved_and_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let pha = dir.path().join("src.pha");
    common::touch(&pha);
    let fake = FakeHeasoft::new();
    let rsp = calc_drm(&[&pha], &*fake).unwrap().remove(0);
    let a = BatDrm::from_file(DrmSource::drm(&rsp), &*fake).unwrap();
    let doubled = BatDrm::from_histogram(a.histogram().scale(3.0)).unwrap();

    let combined = BatDrm::concatenate(&[a, doubled], Some(&[0.75, 0.25])).unwrap();
    let m = combined.matrix();
    assert_relative_eq!(m[[0, 0, 0]], 1.5);
    assert_relative_eq!(m[[0, 1, 1]], 3.0);

    combined.save(&rsp, true).unwrap();
    let back = BatDrm::from_file(DrmSource::drm(&rsp), &*fake).unwrap();
    assert_eq!(back.matrix(), combined.matrix());
    assert_eq!(back.tbins(), combined.tbins());
}
