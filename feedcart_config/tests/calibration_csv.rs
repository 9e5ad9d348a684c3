use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use feedcart_config::{CalibrationRow, load_calibration_csv, load_toml};
use rstest::rstest;
use tempfile::{TempDir, tempdir};

fn write_csv(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("calibration.csv");
    let mut f = File::create(&path).unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    (dir, path)
}

const TWO_CHANNELS: &str = r#"
[[wired.channels]]
hx711_dt = 5
hx711_sck = 6

[[wired.channels]]
hx711_dt = 13
hx711_sck = 19
"#;

#[test]
fn loads_rows_in_file_order() {
    let (_dir, path) = write_csv("channel,zero_counts,kg_per_count\n1,-1200,0.0000209\n0,84213,0.0000213\n");
    let rows = load_calibration_csv(&path).unwrap();
    assert_eq!(
        rows,
        vec![
            CalibrationRow {
                channel: 1,
                zero_counts: -1200,
                kg_per_count: 0.0000209,
            },
            CalibrationRow {
                channel: 0,
                zero_counts: 84213,
                kg_per_count: 0.0000213,
            },
        ]
    );
}

#[test]
fn tolerates_whitespace_around_fields() {
    let (_dir, path) = write_csv("channel, zero_counts, kg_per_count\n0, 10, 0.5\n");
    let rows = load_calibration_csv(&path).unwrap();
    assert_eq!(rows[0].zero_counts, 10);
}

#[rstest]
#[case("raw,grams\n1,2\n", "must have headers")]
#[case("channel,zero_counts\n0,1\n", "must have headers")]
#[case("channel,zero_counts,kg_per_count\n", "has no rows")]
#[case("channel,zero_counts,kg_per_count\n0,1,0.1\n0,2,0.1\n", "repeats channel 0")]
#[case("channel,zero_counts,kg_per_count\n0,1,0.0\n", "kg_per_count must be finite")]
#[case("channel,zero_counts,kg_per_count\n0,abc,0.1\n", "invalid CSV row 2")]
#[case("channel,zero_counts,kg_per_count\n-1,5,0.1\n", "invalid CSV row 2")]
fn rejects_bad_files(#[case] contents: &str, #[case] expected: &str) {
    let (_dir, path) = write_csv(contents);
    let err = load_calibration_csv(&path).expect_err("should fail");
    assert!(format!("{err}").contains(expected), "got: {err}");
}

#[test]
fn missing_file_names_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nope.csv");
    let err = load_calibration_csv(&path).expect_err("should fail");
    assert!(format!("{err}").contains("open calibration CSV"));
}

#[test]
fn apply_overrides_channel_factors() {
    let mut cfg = load_toml(TWO_CHANNELS).unwrap();
    let rows = [CalibrationRow {
        channel: 1,
        zero_counts: 500,
        kg_per_count: 0.002,
    }];
    cfg.apply_calibration(&rows).unwrap();
    assert_eq!(cfg.wired.channels[0].zero_counts, 0);
    assert_eq!(cfg.wired.channels[1].zero_counts, 500);
    assert_eq!(cfg.wired.channels[1].kg_per_count, 0.002);
    cfg.validate().unwrap();
}

#[test]
fn apply_rejects_unknown_channel() {
    let mut cfg = load_toml(TWO_CHANNELS).unwrap();
    let rows = [CalibrationRow {
        channel: 4,
        zero_counts: 0,
        kg_per_count: 0.1,
    }];
    let err = cfg.apply_calibration(&rows).unwrap_err();
    assert!(format!("{err}").contains("only 2 wired channel(s)"));
}
