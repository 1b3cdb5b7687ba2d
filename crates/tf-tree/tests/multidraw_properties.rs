use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use approx::assert_relative_eq;
use tf_tree::{
    Column, Corrections, Dataset, DrawPlan, DrawRequest, Error, Histogram1D, Histogram2D,
    MultiDraw, ScalarLookup, Schema,
};

fn tmp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let mut p = std::env::temp_dir();
    p.push(format!("tf_tree_{}_{}_{}", std::process::id(), nanos, name));
    std::fs::create_dir_all(&p).unwrap();
    p
}

/// Deterministic pseudo-random rows: `field_a` in [0, 100), `field_b` in [0, 100).
fn synthetic(n: usize, offset: usize) -> (Vec<f64>, Vec<f64>) {
    let a = (0..n).map(|i| ((i + offset) * 37 % 100) as f64).collect();
    let b = (0..n).map(|i| ((i + offset) * 53 % 100) as f64 + 0.25).collect();
    (a, b)
}

fn single_source(n: usize, offset: usize, weight: f64) -> Dataset {
    let (a, b) = synthetic(n, offset);
    let mut ds = Dataset::new(Schema::new().scalar("field_a").scalar("field_b"));
    ds.add_source("s", weight, vec![("field_a", Column::from(a)), ("field_b", Column::from(b))])
        .unwrap();
    ds
}

#[test]
fn selection_and_fill_match_brute_force() {
    let ds = single_source(100, 0, 1.0);
    let (a, b) = synthetic(100, 0);
    let c = Corrections::new();
    let mut h = Histogram1D::uniform("h", 10, 0.0, 100.0).unwrap();
    let mut md = MultiDraw::new(&ds, &c, "field_a > 50").unwrap();
    md.add("field_b", "1.0", &mut h).unwrap();
    let summary = md.run().unwrap();

    let mut expected = [0.0; 10];
    let mut n_pass = 0;
    for (&ai, &bi) in a.iter().zip(&b) {
        if ai > 50.0 {
            n_pass += 1;
            expected[(bi / 10.0) as usize] += 1.0;
        }
    }
    assert_eq!(h.entries(), n_pass);
    assert_eq!(summary.selected, n_pass);
    assert_eq!(summary.entries, 100);
    for (bin, &e) in expected.iter().enumerate() {
        assert_eq!(h.content(bin + 1), e, "bin {}", bin + 1);
        assert_eq!(h.sumw2(bin + 1), e, "bin {}", bin + 1);
    }
    assert_eq!(h.content(0), 0.0);
    assert_eq!(h.content(11), 0.0);
}

#[test]
fn zero_final_weight_changes_nothing() {
    let ds = single_source(100, 0, 1.0);
    let c = Corrections::new();
    let mut with_zeros = Histogram1D::uniform("z", 10, 0.0, 100.0).unwrap();
    let mut reference = Histogram1D::uniform("r", 10, 0.0, 100.0).unwrap();

    let mut md = MultiDraw::new(&ds, &c, "").unwrap();
    md.add("field_b", "field_a % 2 == 0 ? 2 : 0", &mut with_zeros).unwrap();
    md.run().unwrap();

    let mut md = MultiDraw::new(&ds, &c, "field_a % 2 == 0").unwrap();
    md.add("field_b", "2", &mut reference).unwrap();
    md.run().unwrap();

    assert_eq!(with_zeros.contents(), reference.contents());
    assert_eq!(with_zeros.entries(), reference.entries());
    for bin in 0..12 {
        assert_eq!(with_zeros.sumw2(bin), reference.sumw2(bin));
    }
}

#[test]
fn source_weights_apply_per_source() {
    let (a1, b1) = synthetic(60, 0);
    let (a2, b2) = synthetic(40, 60);
    let mut ds = Dataset::new(Schema::new().scalar("field_a").scalar("field_b"));
    ds.add_source(
        "first",
        2.0,
        vec![("field_a", Column::from(a1.clone())), ("field_b", Column::from(b1.clone()))],
    )
    .unwrap();
    ds.add_source(
        "second",
        0.5,
        vec![("field_a", Column::from(a2.clone())), ("field_b", Column::from(b2.clone()))],
    )
    .unwrap();

    let c = Corrections::new();
    let mut h = Histogram1D::uniform("h", 10, 0.0, 100.0).unwrap();
    let mut md = MultiDraw::new(&ds, &c, "field_a >= 20").unwrap();
    md.add("field_b", "field_a / 100", &mut h).unwrap();
    md.run().unwrap();

    let mut expected = [0.0; 10];
    let mut expected_w2 = [0.0; 10];
    for (rows, norm) in [((a1, b1), 2.0), ((a2, b2), 0.5)] {
        for (&ai, &bi) in rows.0.iter().zip(&rows.1) {
            if ai >= 20.0 {
                let w = ai / 100.0 * norm;
                expected[(bi / 10.0) as usize] += w;
                expected_w2[(bi / 10.0) as usize] += w * w;
            }
        }
    }
    for bin in 0..10 {
        assert_relative_eq!(h.content(bin + 1), expected[bin], max_relative = 1e-12);
        assert_relative_eq!(h.sumw2(bin + 1), expected_w2[bin], max_relative = 1e-12);
    }
}

#[test]
fn partitions_sum_to_the_full_run() {
    let full = single_source(1000, 0, 1.0);
    let first = single_source(500, 0, 1.0);
    let second = single_source(500, 500, 1.0);
    let c = Corrections::new();

    let fill = |ds: &Dataset| {
        let mut h1 = Histogram1D::uniform("h1", 20, 0.0, 100.0).unwrap();
        let mut h2 = Histogram2D::uniform("h2", 5, 0.0, 100.0, 5, 0.0, 100.0).unwrap();
        let mut md = MultiDraw::new(ds, &c, "field_a > 10").unwrap();
        md.add("field_b", "field_a * 0.01", &mut h1).unwrap();
        md.add_2d("field_a", "field_b", "field_a * 0.01", &mut h2).unwrap();
        assert!(md.shares_weight_with_previous(1));
        md.run().unwrap();
        (h1, h2)
    };

    let (full_1d, full_2d) = fill(&full);
    let (mut sum_1d, mut sum_2d) = fill(&first);
    let (part_1d, part_2d) = fill(&second);
    sum_1d.add(&part_1d).unwrap();
    sum_2d.add(&part_2d).unwrap();

    assert_eq!(sum_1d.entries(), full_1d.entries());
    for bin in 0..22 {
        assert_relative_eq!(sum_1d.content(bin), full_1d.content(bin), max_relative = 1e-12);
        assert_relative_eq!(sum_1d.sumw2(bin), full_1d.sumw2(bin), max_relative = 1e-12);
    }
    for iy in 0..7 {
        for ix in 0..7 {
            assert_relative_eq!(sum_2d.content(ix, iy), full_2d.content(ix, iy), max_relative = 1e-12);
        }
    }
}

#[test]
fn repeated_runs_are_bit_identical() {
    let ds = single_source(1000, 7, 1.3);
    let c = Corrections::new();
    let plan = DrawPlan::new(
        "field_a > 5",
        &[
            DrawRequest::new("field_b >> b(25,0,100)", "sqrt(field_a) * 0.1"),
            DrawRequest::new("field_b:field_a >> ab(10,0,100,10,0,100)", "0.37"),
        ],
        &[],
    )
    .unwrap();
    let a = plan.run(&ds, &c).unwrap();
    let b = plan.run(&ds, &c).unwrap();
    assert_eq!(a.histograms, b.histograms);
}

#[test]
fn correction_lookups_weight_rows() {
    let ds = single_source(100, 0, 1.0);
    let mut c = Corrections::new();
    c.insert("getSF", |a: f64| if a < 50.0 { 0.5 } else { 1.5 });
    let mut h = Histogram1D::uniform("h", 1, 0.0, 100.0).unwrap();
    let mut md = MultiDraw::new(&ds, &c, "").unwrap();
    md.add("field_b", "getSF(field_a)", &mut h).unwrap();
    md.run().unwrap();
    let (a, _) = synthetic(100, 0);
    let expected: f64 = a.iter().map(|&v| if v < 50.0 { 0.5 } else { 1.5 }).sum();
    assert_relative_eq!(h.content(1), expected);
}

/// Identity lookup that counts its calls.
struct CountingLookup(Arc<AtomicUsize>);

impl ScalarLookup for CountingLookup {
    fn arity(&self) -> RangeInclusive<usize> {
        1..=1
    }

    fn lookup(&self, args: &[f64]) -> f64 {
        self.0.fetch_add(1, Ordering::Relaxed);
        args[0]
    }
}

#[test]
fn rejected_rows_and_shared_slots_skip_evaluation() {
    let mut ds = Dataset::new(Schema::new().scalar("field_a"));
    ds.add_source("s", 1.0, vec![("field_a", Column::from(vec![0.0, 1.0, 0.0, 2.0, 1e-17]))])
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let mut c = Corrections::new();
    c.insert("counted", CountingLookup(Arc::clone(&calls)));

    let mut first = Histogram1D::uniform("first", 4, 0.0, 4.0).unwrap();
    let mut second = Histogram1D::uniform("second", 4, 0.0, 4.0).unwrap();
    let mut md = MultiDraw::new(&ds, &c, "field_a > 0.5").unwrap();
    md.add("counted(field_a)", "", &mut first).unwrap();
    md.add("counted(field_a)", "", &mut second).unwrap();
    assert!(md.shares_value_with_previous(1));
    assert_eq!(calls.load(Ordering::Relaxed), 0);

    let summary = md.run().unwrap();
    assert_eq!(summary.selected, 2);
    assert_eq!(summary.fills, 4);
    // One call per selected row: rejected rows are never evaluated and the
    // second pair reuses the first pair's value.
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    assert_eq!(first.contents(), second.contents());
    assert_eq!(second.content(2), 1.0);
    assert_eq!(second.content(3), 1.0);
}

fn write_payload(dir: &std::path::Path, file: &str, a: &[f64], jets: &[Vec<f64>]) {
    let payload = serde_json::json!({ "columns": { "field_a": a, "jets": jets } });
    std::fs::write(dir.join(file), serde_json::to_vec(&payload).unwrap()).unwrap();
}

#[test]
fn unreadable_source_mid_scan_keeps_partial_results() {
    let dir = tmp_dir("midscan");
    write_payload(&dir, "one.json", &[1.0, 2.0, 3.0], &[vec![1.0], vec![], vec![2.0, 2.5]]);
    let mut ds = Dataset::new(Schema::new().scalar("field_a").jagged("jets"));
    ds.add_file_source("one", dir.join("one.json"), 1.0, 3);
    ds.add_file_source("two", dir.join("missing.json"), 1.0, 5);

    let c = Corrections::new();
    let mut h = Histogram1D::uniform("h", 4, 0.0, 4.0).unwrap();
    let mut md = MultiDraw::new(&ds, &c, "").unwrap();
    md.add("field_a", "len(jets) > 0", &mut h).unwrap();
    let err = md.run().unwrap_err();
    assert!(err.is_io(), "{err}");
    assert_eq!(h.entries(), 2);
    assert_eq!(h.content(2), 1.0);
    assert_eq!(h.content(4), 1.0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn schema_errors_surface_before_any_row_is_read() {
    let mut ds = Dataset::new(Schema::new().scalar("field_a"));
    ds.add_file_source("gone", "/nonexistent/tf_tree/gone.json", 1.0, 10);
    let c = Corrections::new();
    let mut h = Histogram1D::uniform("h", 4, 0.0, 4.0).unwrap();
    let mut md = MultiDraw::new(&ds, &c, "field_a > 0").unwrap();
    let err = md.add("field_b", "", &mut h).unwrap_err();
    assert!(matches!(err, Error::Schema(_)), "{err}");
}

#[test]
fn manifest_dataset_with_partitioned_plan() {
    let dir = tmp_dir("manifest");
    write_payload(&dir, "a.json", &[10.0, 20.0], &[vec![5.0, 1.0], vec![7.0]]);
    write_payload(&dir, "b.json", &[30.0], &[vec![]]);
    std::fs::write(
        dir.join("dataset.yaml"),
        "fields:\n  - { name: field_a, kind: scalar }\n  - { name: jets, kind: jagged }\n\
         sources:\n  - { name: a, path: a.json, weight: 2.0, entries: 2 }\n\
         \x20 - { name: b, path: b.json, entries: 1 }\n",
    )
    .unwrap();

    let ds = Dataset::from_manifest(dir.join("dataset.yaml")).unwrap();
    assert_eq!(ds.entries(), 3);
    assert_eq!(ds.sources()[1].weight(), 1.0);

    let plan = DrawPlan::new(
        "",
        &[
            DrawRequest::new("field_a >> a(3,0,40)", ""),
            DrawRequest::new("jets[0] >> lead(2,0,10)", "len(jets) > 0"),
        ],
        &[],
    )
    .unwrap();
    let c = Corrections::new();
    let seq = plan.run(&ds, &c).unwrap();
    let par = plan.run_partitioned(&ds, &c).unwrap();
    assert_eq!(seq.histograms, par.histograms);
    let a = seq.get("a").unwrap();
    assert_relative_eq!(a.integral(), 5.0);
    let lead = seq.get("lead").unwrap().as_1d().unwrap();
    assert_eq!(lead.content(2), 4.0);

    let _ = std::fs::remove_dir_all(&dir);
}
