use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::detect::FormatDetector;
use crate::errors::{FormatDetectionError, ParseError};
use crate::formats::{PneParser, ToyoParser};
use crate::model::{CyclerFormat, StepMode, ToyoVariant};

const TOYO2_HEADER: &str =
    "Date,Time,PassTime[Sec],Voltage[V],Current[mA],Temp1[Deg],Condition,Mode,Cycle,TotlCycle";
const TOYO1_HEADER: &str =
    "Date,Time,PassTime[Sec],Voltage[V],Current[mA],Temp1[Deg],Condition,Mode,Cycle,TotlCycle,PassedDate";
const CAPACITY_HEADER: &str =
    "Date,Time,Condition,Mode,Cycle,TotlCycle,Cap[mAh],Pow[mWh],AveVolt[V],PeakVolt[V],PeakTemp[Deg],Ocv";

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn toyo2_record(date: &str, time: &str, elapsed: u32, voltage: f64, current_ma: f64, cycle: u32) -> String {
    format!("{date},{time},{elapsed},{voltage},{current_ma},25.0,1,1,{cycle},{cycle}")
}

/// Minimal Toyo tree: one numbered channel with record files and a
/// CAPACITY.LOG covering cycles 1 and 3 (cycle 2 deliberately missing).
fn build_toyo_tree(root: &Path) {
    let channel = root.join("93");
    let mut body = format!("0,0,1,0,0,0,0\n{TOYO2_HEADER}\n");
    for (idx, cycle) in [(0u32, 1u32), (60, 1), (120, 2), (180, 2), (240, 3), (300, 3)] {
        body.push_str(&toyo2_record(
            "2024/01/15",
            &format!("10:{:02}:00", idx / 60),
            idx,
            3.7,
            1500.0,
            cycle,
        ));
        body.push('\n');
    }
    write(&channel.join("000001"), &body);

    let capacity = format!(
        "{CAPACITY_HEADER}\n\
         2024/01/15,10:30:00,1,1,1,1,1000.0,3700,3.7,4.2,25.5,3.65\n\
         2024/01/15,11:00:00,1,2,1,1,980.0,3600,3.6,4.2,25.5,3.65\n\
         2024/01/15,12:30:00,1,1,3,3,990.0,3660,3.7,4.2,25.5,3.65\n\
         2024/01/15,13:00:00,1,2,3,3,960.0,3550,3.6,4.2,25.5,3.65\n"
    );
    write(&channel.join("CAPACITY.LOG"), &capacity);
}

fn pne_row(
    step_type: u32,
    step: u32,
    voltage_uv: i64,
    current_ua: i64,
    chg_uah: i64,
    dchg_uah: i64,
    cycle: u32,
    date: &str,
    centisec: i64,
) -> String {
    let mut fields = vec!["0".to_string(); 47];
    fields[2] = step_type.to_string();
    fields[7] = step.to_string();
    fields[8] = voltage_uv.to_string();
    fields[9] = current_ua.to_string();
    fields[10] = chg_uah.to_string();
    fields[11] = dchg_uah.to_string();
    fields[21] = "25.0".to_string();
    fields[28] = cycle.to_string();
    fields[33] = date.to_string();
    fields[34] = centisec.to_string();
    fields.join(",")
}

/// Minimal PNE tree: one channel, two SaveData files of two rows each.
fn build_pne_tree(root: &Path) {
    let restore = root.join("M01Ch003[003]").join("Restore");
    let file1 = format!(
        "{}\n{}\n",
        pne_row(1, 1, 3_700_000, 1_500_000, 500_000, 0, 1, "20240115", 3_600_000),
        pne_row(1, 1, 3_750_000, 1_500_000, 1_000_000, 0, 1, "20240115", 3_960_000),
    );
    let file2 = format!(
        "{}\n{}\n",
        pne_row(2, 2, 3_650_000, -1_500_000, 1_000_000, 490_000, 1, "20240115", 4_320_000),
        pne_row(2, 2, 3_600_000, -1_500_000, 1_000_000, 980_000, 1, "20240115", 4_680_000),
    );
    write(&restore.join("ch03_SaveData0001.csv"), &file1);
    write(&restore.join("ch03_SaveData0002.csv"), &file2);
    write(&restore.join("savingFileIndex_start.csv"), "1,0,24,1,15\n2,2,24,1,15\n");
    write(&restore.join("savingFileIndex_last.csv"), "1,1,24,1,15\n2,3,24,1,15\n");
}

#[test]
fn detects_toyo2_tree_with_positive_confidence() {
    let dir = TempDir::new().unwrap();
    build_toyo_tree(dir.path());

    let detection = FormatDetector::detect(dir.path()).expect("detection failed");
    assert_eq!(detection.format, Some(CyclerFormat::Toyo2));
    assert!(detection.confidence > 0.0);
    assert!(detection.toyo_markers > detection.pne_markers);
}

#[test]
fn detects_toyo1_from_passed_date_column() {
    let dir = TempDir::new().unwrap();
    let channel = dir.path().join("81");
    let body = format!(
        "{TOYO1_HEADER}\n2024/01/15,10:00:00,0,3.7,1500,25.0,1,1,1,1,0\n"
    );
    write(&channel.join("000001"), &body);
    write(&channel.join("CAPACITY.LOG"), CAPACITY_HEADER);

    let detection = FormatDetector::detect(dir.path()).expect("detection failed");
    assert_eq!(detection.format, Some(CyclerFormat::Toyo1));
}

#[test]
fn detects_pne_tree() {
    let dir = TempDir::new().unwrap();
    build_pne_tree(dir.path());

    let detection = FormatDetector::detect(dir.path()).expect("detection failed");
    assert_eq!(detection.format, Some(CyclerFormat::Pne));
    assert!(detection.confidence > 0.0);
}

#[test]
fn empty_directory_is_unknown_with_zero_confidence() {
    let dir = TempDir::new().unwrap();

    let detection = FormatDetector::detect(dir.path()).expect("detection failed");
    assert_eq!(detection.format, None);
    assert_eq!(detection.confidence, 0.0);
}

#[test]
fn missing_path_is_an_error() {
    let err = FormatDetector::detect(Path::new("/definitely/not/a/real/path"))
        .expect_err("expected detection failure");
    assert!(matches!(err, FormatDetectionError::PathNotFound { .. }));
}

#[test]
fn confirm_rejects_unrecognized_directory() {
    let dir = TempDir::new().unwrap();
    let err = FormatDetector::confirm(dir.path(), None).expect_err("expected confirm failure");
    assert!(matches!(
        err,
        FormatDetectionError::NoFormatRecognized { .. }
    ));
}

#[test]
fn confirm_rejects_inconsistent_hint() {
    let dir = TempDir::new().unwrap();
    build_toyo_tree(dir.path());

    let err = FormatDetector::confirm(dir.path(), Some(CyclerFormat::Pne))
        .expect_err("pne hint should not validate against a toyo tree");
    assert!(matches!(err, FormatDetectionError::HintMismatch { .. }));

    // Wrong sub-version is also a mismatch: the record header says Toyo2.
    let err = FormatDetector::confirm(dir.path(), Some(CyclerFormat::Toyo1))
        .expect_err("toyo1 hint should not validate against a toyo2 tree");
    assert!(matches!(err, FormatDetectionError::HintMismatch { .. }));
}

#[test]
fn confirm_accepts_valid_hint() {
    let dir = TempDir::new().unwrap();
    build_toyo_tree(dir.path());

    let format = FormatDetector::confirm(dir.path(), Some(CyclerFormat::Toyo2))
        .expect("valid hint rejected");
    assert_eq!(format, CyclerFormat::Toyo2);
}

#[test]
fn toyo_parse_keeps_cycles_missing_from_capacity_log() {
    let dir = TempDir::new().unwrap();
    build_toyo_tree(dir.path());

    let parser = ToyoParser::new(ToyoVariant::Toyo2);
    let channel = parser
        .parse_channel_dir(&dir.path().join("93"))
        .expect("toyo parse failed");

    assert_eq!(channel.records.len(), 6);
    assert_eq!(channel.format, CyclerFormat::Toyo2);

    // Cycle 2 rows survive even though CAPACITY.LOG has no entry for them.
    assert!(channel.records.iter().any(|r| r.cycle == 2));
    assert!(channel.summary_for(2).is_none());

    let cycle1 = channel.summary_for(1).expect("cycle 1 summary missing");
    assert_eq!(cycle1.charge_capacity_mah, Some(1000.0));
    assert_eq!(cycle1.discharge_capacity_mah, Some(980.0));
    let efficiency = cycle1.coulombic_efficiency_pct().unwrap();
    assert!((efficiency - 98.0).abs() < 1e-9);
}

#[test]
fn toyo_malformed_line_is_skipped_with_warning() {
    let dir = TempDir::new().unwrap();
    let channel = dir.path().join("93");
    let body = format!(
        "{TOYO2_HEADER}\n\
         2024/01/15,10:00:00,0,3.7,1500,25.0,1,1,1,1\n\
         2024/01/15,10:01:00,60,not-a-number,1500,25.0,1,1,1,1\n\
         2024/01/15,10:02:00,120,3.71,1500,25.0,1,1,1,1\n"
    );
    write(&channel.join("000001"), &body);
    write(
        &channel.join("CAPACITY.LOG"),
        &format!("{CAPACITY_HEADER}\n2024/01/15,10:30:00,1,1,1,1,1000.0,3700,3.7,4.2,25.5,3.65\n"),
    );

    let parser = ToyoParser::new(ToyoVariant::Toyo2);
    let channel = parser
        .parse_channel_dir(&channel)
        .expect("toyo parse failed");

    assert_eq!(channel.records.len(), 2);
    assert_eq!(channel.warnings.len(), 1);
    assert_eq!(channel.warnings[0].line, Some(3));
}

#[test]
fn toyo_rejects_wrong_header() {
    let dir = TempDir::new().unwrap();
    let channel = dir.path().join("93");
    write(
        &channel.join("000001"),
        "Bogus,Header,Row\n1,2,3\n",
    );

    let parser = ToyoParser::new(ToyoVariant::Toyo2);
    let err = parser
        .parse_channel_dir(&channel)
        .expect_err("expected header rejection");
    assert!(matches!(err, ParseError::InvalidHeader { .. }));
}

#[test]
fn toyo_record_files_are_ordered_numerically() {
    let dir = TempDir::new().unwrap();
    let channel = dir.path().join("93");
    // "10" sorts before "2" lexically; numeric ordering must win.
    write(
        &channel.join("10"),
        &format!("{TOYO2_HEADER}\n2024/01/15,11:00:00,0,3.9,1500,25.0,1,1,2,2\n"),
    );
    write(
        &channel.join("2"),
        &format!("{TOYO2_HEADER}\n2024/01/15,10:00:00,0,3.7,1500,25.0,1,1,1,1\n"),
    );
    write(
        &channel.join("CAPACITY.LOG"),
        &format!("{CAPACITY_HEADER}\n2024/01/15,10:30:00,1,1,1,1,1000.0,3700,3.7,4.2,25.5,3.65\n"),
    );

    let parser = ToyoParser::new(ToyoVariant::Toyo2);
    let channel = parser
        .parse_channel_dir(&channel)
        .expect("toyo parse failed");

    assert_eq!(channel.records.len(), 2);
    assert_eq!(channel.records[0].cycle, 1);
    assert_eq!(channel.records[1].cycle, 2);
}

#[test]
fn pne_converts_microvolt_units_exactly() {
    let dir = TempDir::new().unwrap();
    build_pne_tree(dir.path());

    let parser = PneParser;
    let channel = parser
        .parse_channel_dir(&dir.path().join("M01Ch003[003]"))
        .expect("pne parse failed");

    assert_eq!(channel.records.len(), 4);
    assert_eq!(channel.records[0].voltage, 3.7);
    assert_eq!(channel.records[0].current, 1.5);
    assert_eq!(channel.records[0].mode, StepMode::Charge);

    // Capacity accumulators become mAh summaries (max per cycle).
    let summary = channel.summary_for(1).expect("cycle summary missing");
    assert_eq!(summary.charge_capacity_mah, Some(1000.0));
    assert_eq!(summary.discharge_capacity_mah, Some(980.0));
}

#[test]
fn pne_orders_files_by_index_entries_not_filenames() {
    let dir = TempDir::new().unwrap();
    build_pne_tree(dir.path());
    let restore = dir.path().join("M01Ch003[003]").join("Restore");
    // Swap the index entries: file 2 now covers the first rows.
    write(&restore.join("savingFileIndex_start.csv"), "2,0,24,1,15\n1,2,24,1,15\n");
    write(&restore.join("savingFileIndex_last.csv"), "2,1,24,1,15\n1,3,24,1,15\n");

    let parser = PneParser;
    let channel = parser
        .parse_channel_dir(&dir.path().join("M01Ch003[003]"))
        .expect("pne parse failed");

    // File 2's discharge rows must now lead the stream.
    assert_eq!(channel.records[0].mode, StepMode::Discharge);
    assert_eq!(channel.records[0].voltage, 3.65);
}

#[test]
fn pne_index_row_count_mismatch_is_fatal() {
    let dir = TempDir::new().unwrap();
    build_pne_tree(dir.path());
    let restore = dir.path().join("M01Ch003[003]").join("Restore");
    // Claim 3 rows for a 2-row file.
    write(&restore.join("savingFileIndex_last.csv"), "1,2,24,1,15\n2,3,24,1,15\n");

    let parser = PneParser;
    let err = parser
        .parse_channel_dir(&dir.path().join("M01Ch003[003]"))
        .expect_err("expected index mismatch");
    match err {
        ParseError::IndexMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, 3);
            assert_eq!(actual, 2);
        }
        other => panic!("expected IndexMismatch, got {other:?}"),
    }
}

#[test]
fn pne_missing_last_entry_is_fatal() {
    let dir = TempDir::new().unwrap();
    build_pne_tree(dir.path());
    let restore = dir.path().join("M01Ch003[003]").join("Restore");
    write(&restore.join("savingFileIndex_last.csv"), "1,1,24,1,15\n");

    let parser = PneParser;
    let err = parser
        .parse_channel_dir(&dir.path().join("M01Ch003[003]"))
        .expect_err("expected missing index entry");
    assert!(matches!(err, ParseError::MissingIndexEntry { .. }));
}

#[test]
fn pne_short_row_is_warned_but_counts_toward_index_range() {
    let dir = TempDir::new().unwrap();
    let restore = dir.path().join("M01Ch003[003]").join("Restore");
    let content = format!(
        "{}\nshort,row\n",
        pne_row(1, 1, 3_700_000, 1_500_000, 500_000, 0, 1, "20240115", 3_600_000),
    );
    write(&restore.join("ch03_SaveData0001.csv"), &content);
    write(&restore.join("savingFileIndex_start.csv"), "1,0,24,1,15\n");
    write(&restore.join("savingFileIndex_last.csv"), "1,1,24,1,15\n");

    let parser = PneParser;
    let channel = parser
        .parse_channel_dir(&dir.path().join("M01Ch003[003]"))
        .expect("pne parse failed");

    assert_eq!(channel.records.len(), 1);
    assert_eq!(channel.warnings.len(), 1);
}

#[test]
fn cycler_format_round_trips_through_strings() {
    for format in [CyclerFormat::Toyo1, CyclerFormat::Toyo2, CyclerFormat::Pne] {
        assert_eq!(CyclerFormat::try_from(format.as_str()), Ok(format));
    }
    assert!(CyclerFormat::try_from("maccor").is_err());
}
