mod common;
use cliprest::{extract_window, single_tick, AnalysisError, WindowSpec};
use common::synthetic_table;

#[test]
fn window_has_stop_minus_start_rows() {
    let t = synthetic_table(&["s"], &["inception"], 30, 5, 1).clip_rows("inception");
    for spec in [
        WindowSpec::First(19),
        WindowSpec::Last(19),
        WindowSpec::Last(1),
        WindowSpec::Custom { start: 4, stop: 11 },
    ] {
        let (start, stop) = spec.bounds(&t.ticks).unwrap();
        let w = extract_window(&t, &spec).unwrap();
        assert_eq!(w.nrows() as i64, stop - start, "{spec}");
        assert_eq!(w.ncols(), t.n_features(), "{spec}");
        assert_eq!(w.row(0), t.features.row(start as usize), "{spec}");
    }
}

#[test]
fn last_window_ends_before_final_tr() {
    let t = synthetic_table(&["s"], &["garden"], 10, 2, 2).clip_rows("garden");
    assert_eq!(WindowSpec::Last(3).bounds(&t.ticks).unwrap(), (6, 9));
}

#[test]
fn window_outside_clip_is_missing_index() {
    let t = synthetic_table(&["s"], &["flower"], 10, 2, 2).clip_rows("flower");
    let err = extract_window(&t, &WindowSpec::First(19)).unwrap_err();
    assert_eq!(err, AnalysisError::MissingIndex { clip: "flower".into(), tick: 19 });
}

#[test]
fn empty_window_rejected() {
    let t = synthetic_table(&["s"], &["dreary"], 10, 2, 2).clip_rows("dreary");
    let spec = WindowSpec::Custom { start: 5, stop: 5 };
    assert_eq!(extract_window(&t, &spec).unwrap_err(), AnalysisError::InvalidWindow { start: 5, stop: 5 });
}

#[test]
fn single_tick_defaults_to_last_tr() {
    let t = synthetic_table(&["s"], &["oceans", "hotel"], 8, 3, 4);
    let v = single_tick(&t, "hotel", None).unwrap();
    assert_eq!(v, t.features.row(15));
    let v = single_tick(&t, "oceans", Some(2)).unwrap();
    assert_eq!(v, t.features.row(2));
    assert!(single_tick(&t, "starwars", None).is_err());
}

#[test]
fn window_names() {
    assert_eq!(WindowSpec::First(19).to_string(), "first_19_tr");
    assert_eq!(WindowSpec::Last(10).to_string(), "last_10_tr");
    assert_eq!(WindowSpec::Custom { start: 3, stop: 9 }.to_string(), "tr_3_9");
}
