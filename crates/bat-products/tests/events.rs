//! Event files read from disk and binned into in-memory DPHs.

use std::path::Path;

use bat_fits::{BinTableBuilder, ColumnSpec, ColumnType, FitsFile, Hdu};
use bat_products::events::{DETX_PIXELS, DETY_PIXELS};
use bat_products::{
    DphBuilder, EnergyBinRequest, Error, EventList, Quantity, TimeBinRequest, Unit,
};

fn write_events(path: &Path, with_mask: bool) {
    let time = vec![1.0, 2.5, 2.6, 7.0, 9.5];
    let n = time.len();
    let det_id = vec![
        ((3 << 11) | (2 << 8) | (1 << 7) | 5) as f64,
        0.0,
        0.0,
        127.0,
        0.0,
    ];
    let mut builder = BinTableBuilder::new("EVENTS", n)
        .column(ColumnSpec::new("TIME", ColumnType::Double).with_unit("s"), time)
        .column(ColumnSpec::new("DET_ID", ColumnType::Int), det_id)
        .column(
            ColumnSpec::new("DETX", ColumnType::Short),
            vec![0.0, 10.0, 10.0, 285.0, 400.0],
        )
        .column(
            ColumnSpec::new("DETY", ColumnType::Short),
            vec![0.0, 5.0, 5.0, 172.0, 0.0],
        )
        .column(ColumnSpec::new("EVENT_FLAGS", ColumnType::Byte), vec![0.0; n])
        .column(
            ColumnSpec::new("ENERGY", ColumnType::Float).with_unit("keV"),
            vec![20.0, 30.0, 80.0, 150.0, 20.0],
        )
        .column(ColumnSpec::new("PHA", ColumnType::Float), vec![100.0; n])
        .column(ColumnSpec::new("PI", ColumnType::Short), vec![40.0; n]);
    if with_mask {
        builder = builder.column(
            ColumnSpec::new("MASK_WEIGHT", ColumnType::Float),
            vec![0.5; n],
        );
    }
    FitsFile::new(vec![Hdu::empty_primary(), builder.build().unwrap()])
        .write(path)
        .unwrap();
}

fn secs(v: &[f64]) -> Quantity {
    Quantity::from_vec(v.to_vec(), Unit::Second)
}

fn kev(v: &[f64]) -> Quantity {
    Quantity::from_vec(v.to_vec(), Unit::KiloElectronVolt)
}

#[test]
fn event_file_is_read_and_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sw.evt");
    write_events(&path, true);

    let events = EventList::from_file(&path).unwrap();
    assert_eq!(events.len(), 5);
    assert_eq!(events.detx()[3], 285);
    assert_eq!(events.mask_weight().map(<[f64]>::len), Some(5));
    let addr = events.addresses()[0];
    assert_eq!((addr.block, addr.dm, addr.side, addr.channel), (3, 2, 1, 5));
    assert_eq!(events.addresses()[3].channel, 127);

    write_events(&path, false);
    assert!(EventList::from_file(&path).unwrap().mask_weight().is_none());

    assert!(matches!(
        EventList::from_file(&dir.path().join("none.evt")),
        Err(Error::MissingFile(_))
    ));
}

#[test]
fn events_build_and_rebin_a_dph() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sw.evt");
    write_events(&path, false);
    let events = EventList::from_file(&path).unwrap();

    let mut dph = DphBuilder::new()
        .timebins(secs(&[0.0, 5.0, 10.0]))
        .energybins(kev(&[14.0, 50.0, 195.0]))
        .events(events)
        .build()
        .unwrap();

    assert_eq!(dph.histogram().shape(), &[2, DETY_PIXELS, DETX_PIXELS, 2]);
    // the DETX = 400 event is off the detector plane
    assert_eq!(dph.histogram().sum(), 4.0);
    assert_eq!(dph.histogram().contents()[[0, 5, 10, 0].as_slice()], 1.0);
    assert_eq!(dph.histogram().contents()[[0, 5, 10, 1].as_slice()], 1.0);

    // edges that are not existing bin edges work because events are re-binned
    dph.set_energybins(EnergyBinRequest::edges(kev(&[25.0, 100.0])))
        .unwrap();
    assert_eq!(dph.ebins().len(), 1);
    assert_eq!(dph.histogram().sum(), 2.0);

    dph.set_timebins(TimeBinRequest::whole().timedel(2.0)).unwrap();
    assert_eq!(dph.tbins().len(), 5);
    assert_eq!(dph.tbins().stop().last(), Some(10.0));
    assert_eq!(dph.column("TIME").unwrap().values.len(), 5);
}
