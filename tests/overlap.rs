use geo::{polygon, Area, BooleanOps, MultiPolygon};

use climagg::audit::AuditOperation;
use climagg::boundary::{BoundarySet, OverlapResolver, OverlapSeverity};
use climagg::types::BoundaryFeature;

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]])
}

fn set(features: Vec<(&str, MultiPolygon<f64>)>) -> BoundarySet {
    BoundarySet::new("X", features.into_iter().map(|(id, g)| BoundaryFeature::new(id, "X", g)).collect())
}

fn assert_pairwise_disjoint(set: &BoundarySet, epsilon: f64) {
    let features = set.features();
    for i in 0..features.len() {
        for j in i + 1..features.len() {
            let area = features[i].geometry.intersection(&features[j].geometry).unsigned_area();
            assert!(area <= epsilon, "{} and {} still overlap by {area}", features[i].unit_id, features[j].unit_id);
        }
    }
}

#[test]
fn sliver_goes_to_the_larger_unit() {
    let resolver = OverlapResolver::default();
    let input = set(vec![("a", rect(0.0, 0.0, 20.0, 10.0)), ("b", rect(19.6, 0.0, 29.6, 10.0))]);
    assert_eq!(resolver.severity(4.0, 100.0), OverlapSeverity::Sliver);

    let outcome = resolver.resolve(&input);
    let out = &outcome.boundaries;

    assert_eq!(out.len(), 2);
    assert_eq!(outcome.stats.slivers, 1);
    assert!((out.find(&"a".into()).unwrap().area() - 200.0).abs() < 1e-9);
    assert!((out.find(&"b".into()).unwrap().area() - 96.0).abs() < 1e-9);
    assert_pairwise_disjoint(out, resolver.epsilon());

    let unit_b: climagg::types::UnitId = "b".into();
    let entries: Vec<_> = outcome.audit.for_unit(&unit_b).collect();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation, AuditOperation::Repaired);
    assert!((entries[0].area_delta + 4.0).abs() < 1e-9);
}

#[test]
fn resolving_twice_changes_nothing() {
    let resolver = OverlapResolver::default();
    let input = set(vec![
        ("a", rect(0.0, 0.0, 10.0, 10.0)),
        ("b", rect(8.0, 0.0, 18.0, 10.0)),
        ("c", rect(5.0, 8.0, 15.0, 18.0)),
        ("d", rect(30.0, 30.0, 31.0, 31.0)),
    ]);

    let first = resolver.resolve(&input);
    assert!(!first.audit.is_empty());
    assert_pairwise_disjoint(&first.boundaries, resolver.epsilon());

    let second = resolver.resolve(&first.boundaries);
    assert!(second.audit.is_empty());
    assert_eq!(second.stats.overlaps(), 0);
    assert_eq!(second.boundaries.len(), first.boundaries.len());
}

#[test]
fn contained_unit_is_cut_out_of_its_container() {
    let resolver = OverlapResolver::default();
    let input = set(vec![("outer", rect(0.0, 0.0, 10.0, 10.0)), ("inner", rect(4.0, 4.0, 6.0, 6.0))]);

    let outcome = resolver.resolve(&input);
    let out = &outcome.boundaries;

    assert_eq!(out.len(), 2);
    assert!((out.find(&"outer".into()).unwrap().area() - 96.0).abs() < 1e-9);
    assert!((out.find(&"inner".into()).unwrap().area() - 4.0).abs() < 1e-9);
    assert_pairwise_disjoint(out, resolver.epsilon());
}

#[test]
fn identical_units_keep_the_first_and_drop_the_second() {
    let resolver = OverlapResolver::default();
    let input = set(vec![("a", rect(0.0, 0.0, 1.0, 1.0)), ("b", rect(0.0, 0.0, 1.0, 1.0))]);

    let outcome = resolver.resolve(&input);

    assert_eq!(outcome.boundaries.len(), 1);
    assert!(outcome.boundaries.find(&"a".into()).is_some());
    assert_eq!(outcome.unresolved.len(), 1);
    assert_eq!(outcome.unresolved[0].dropped.as_str(), "b");
    assert_eq!(outcome.audit.dropped_units().map(|u| u.as_str()).collect::<Vec<_>>(), ["b"]);
}
