use std::io::Write;

use capillary_rs::config::ConfigError;
use capillary_rs::template::{Point2, Shape, Template, TemplateError};
use tempfile::NamedTempFile;

const PLATE: &str = "\
# 2x2 plate with a centre divider and a raised corner block
[dimensions]
0 0 100 100

[wells]
a1  circle     4      20,20
a2  circle     4      80,20
b1  rectangle  8,8    20,80
b2  rectangle  8,8    80,80

[ledges]
divider  rectangle  20,100  50,50  10
corner   rectangle  30,30   85,85  5
";

fn plate() -> Template {
    Template::parse("plate", PLATE).unwrap()
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(PLATE.as_bytes()).unwrap();
    file.flush().unwrap();
    let template = Template::load(file.path()).unwrap();
    assert_eq!(template, plate());
    assert_eq!(template.wells().count(), 4);
    assert_eq!(template.ledges().count(), 2);
}

#[test]
fn test_load_missing_file_is_io_error() {
    assert!(matches!(
        Template::load("/nonexistent/plate.template"),
        Err(ConfigError::Io(_))
    ));
}

#[test]
fn test_outside_every_ledge_is_zero() {
    let t = plate();
    for (x, y) in [(20.0, 20.0), (80.0, 20.0), (0.0, 0.0), (39.9, 99.0), (100.0, 60.0)] {
        assert_eq!(t.height_at(x, y), 0.0, "at ({}, {})", x, y);
    }
}

#[test]
fn test_overlapping_ledges_add_up() {
    let t = plate()
        .with_ledge("shim", Shape::circle(50.0, 50.0, 3.0), 2.5)
        .unwrap();
    assert_eq!(t.height_at(50.0, 50.0), 12.5);
    assert_eq!(t.height_at(50.0, 10.0), 10.0);
    // Tallest single ledge, not the stacked height.
    assert_eq!(t.max_ledge_height(), 10.0);
}

#[test]
fn test_height_along_path_is_repeatable() {
    let t = plate();
    let xs: Vec<f64> = (0..=100).map(|i| i as f64).collect();
    let ys: Vec<f64> = (0..=100).map(|i| i as f64).collect();
    let first = t.height_along_path(&xs, &ys);
    let second = t.height_along_path(&xs, &ys);
    assert_eq!(first, second);
    assert_eq!(first.len(), 101);
    assert_eq!(first[50], 10.0);
    assert_eq!(first[90], 5.0);
    assert_eq!(first.iter().copied().fold(0.0, f64::max), 10.0);
}

#[test]
fn test_resolve_wells() {
    let t = plate();
    assert_eq!(t.resolve_well("b2").unwrap(), Point2::new(80.0, 80.0));
    assert_eq!(
        t.resolve_well("c1").unwrap_err(),
        TemplateError::WellNotFound("c1".into())
    );
}

#[test]
fn test_rejected_description_installs_nothing() {
    let broken = PLATE.replace("corner   rectangle  30,30   85,85  5", "corner rectangle 30,30 85,85");
    assert!(matches!(
        Template::parse("plate", &broken),
        Err(ConfigError::Malformed { line: 13, .. })
    ));
}
