//! Foundational low-level utilities shared across idlewatch crates.
//!
//! Provides the atomic file-write helper used for state snapshots, wall-clock
//! helpers for inactivity arithmetic, and the deployment timezone that defines
//! calendar days for the daily digest.

pub mod atomic_io;
pub mod time_utils;
pub mod timezone;

pub use atomic_io::write_text_atomic;
pub use time_utils::{
    current_unix_timestamp, current_unix_timestamp_ms, days_to_seconds, elapsed_seconds,
    whole_days, SECONDS_PER_DAY,
};
pub use timezone::DeploymentTimezone;

#[cfg(test)]
mod tests {
    use std::fs::read_to_string;

    use super::*;

    #[test]
    fn unit_time_utils_round_trip_bounds() {
        let now_s = current_unix_timestamp();
        let now_ms = current_unix_timestamp_ms();
        let now_ms_s = now_ms / 1_000;
        assert!(now_ms_s >= now_s);
        assert!(now_ms_s <= now_s.saturating_add(1));
    }

    #[test]
    fn unit_elapsed_seconds_never_goes_negative() {
        assert_eq!(elapsed_seconds(100, 250), 150);
        assert_eq!(elapsed_seconds(300, 250), 0);
    }

    #[test]
    fn unit_whole_days_floors_partial_days() {
        assert_eq!(whole_days(86_399), 0);
        assert_eq!(whole_days(86_401), 1);
        assert_eq!(whole_days(3 * SECONDS_PER_DAY + 5), 3);
    }

    #[test]
    fn unit_days_to_seconds_clamps_invalid_input() {
        assert_eq!(days_to_seconds(1.0), 86_400.0);
        assert_eq!(days_to_seconds(0.5), 43_200.0);
        assert_eq!(days_to_seconds(-2.0), 0.0);
        assert_eq!(days_to_seconds(f64::NAN), 0.0);
    }

    #[test]
    fn functional_write_text_atomic_writes_content() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("sample.txt");
        write_text_atomic(&path, "hello world").expect("write");
        let contents = read_to_string(&path).expect("read");
        assert_eq!(contents, "hello world");
    }

    #[test]
    fn functional_write_text_atomic_replaces_and_leaves_no_temp_files() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let path = tempdir.path().join("nested/state.json");
        write_text_atomic(&path, "first").expect("first write");
        write_text_atomic(&path, "second").expect("second write");
        assert_eq!(read_to_string(&path).expect("read"), "second");

        let leftovers = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().contains(".tmp-"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn regression_write_text_atomic_rejects_directory_destination() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let error = write_text_atomic(tempdir.path(), "data").expect_err("directory target");
        assert!(error.to_string().contains("is a directory"));
    }

    #[test]
    fn unit_deployment_timezone_parses_named_and_local_zones() {
        assert_eq!(
            DeploymentTimezone::parse("").expect("empty"),
            DeploymentTimezone::Local
        );
        assert_eq!(
            DeploymentTimezone::parse(" Local ").expect("local"),
            DeploymentTimezone::Local
        );
        let shanghai = DeploymentTimezone::parse("Asia/Shanghai").expect("shanghai");
        assert_eq!(shanghai.name(), "Asia/Shanghai");
        assert!(DeploymentTimezone::parse("Mars/Olympus").is_err());
    }

    #[test]
    fn functional_deployment_timezone_formats_wall_clock() {
        let utc = DeploymentTimezone::parse("UTC").expect("utc");
        assert_eq!(utc.format_unix_seconds(0), "1970-01-01 00:00:00");
        let shanghai = DeploymentTimezone::parse("Asia/Shanghai").expect("shanghai");
        assert_eq!(
            shanghai.format_unix_seconds(1_700_000_000),
            "2023-11-15 06:13:20"
        );
    }
}
