//! Pairing of raw LST rasters with their cloud masks by acquisition time.
//!
//! Raw files follow the naming used by the data provider bundles, e.g.
//! `ECO2LSTE.001_SDS_LST_doy2023032011500_aid0001.tif` and
//! `ECO2CLD.001_SDS_CloudMask_doy2023032011500_aid0001.tif`. The second to last
//! `_`-separated field carries a 3 character prefix followed by
//! `YYYYDDDHHMMSS` (year, day of year, time of day, UTC).

use crate::types::{LstError, LstResult, MatchReport, TimestampedFilePair};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Marker identifying raw LST rasters
pub const LST_MARKER: &str = "_LST_";
/// Marker identifying cloud mask rasters
pub const CLOUD_MASK_MARKER: &str = "_CloudMask_";

const TOKEN_PREFIX_LEN: usize = 3;

/// Inner join of LST and cloud mask files on their embedded timestamp
pub struct DateKeyedFileMatcher {
    timestamp_pattern: Regex,
}

impl DateKeyedFileMatcher {
    pub fn new() -> LstResult<Self> {
        let timestamp_pattern = Regex::new(r"^(\d{4})(\d{3})(\d{2})(\d{2})(\d{2})$")
            .map_err(|e| LstError::Processing(format!("Invalid timestamp pattern: {}", e)))?;
        Ok(Self { timestamp_pattern })
    }

    /// Scan `folder` and pair every LST raster with the cloud mask of the same timestamp.
    ///
    /// Files present on only one side are left out and counted in the report.
    pub fn match_folder<P: AsRef<Path>>(&self, folder: P) -> LstResult<MatchReport> {
        let folder = folder.as_ref();
        log::debug!("Scanning {} for LST and cloud mask files", folder.display());

        let mut lst_files = Vec::new();
        let mut cloud_files = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            if !name.ends_with(".tif") {
                continue;
            }
            if name.contains(LST_MARKER) {
                lst_files.push(path);
            } else if name.contains(CLOUD_MASK_MARKER) {
                cloud_files.push(path);
            }
        }

        let report = self.match_files(&lst_files, &cloud_files)?;
        if report.unmatched_total() > 0 {
            log::warn!(
                "{}: {} LST file(s) without cloud mask, {} cloud mask(s) without LST file and {} file(s) without timestamp were dropped",
                folder.display(),
                report.unmatched_lst,
                report.unmatched_cloud_masks,
                report.unparseable
            );
        }
        log::info!("{}: matched {} LST/cloud mask pairs", folder.display(), report.pairs.len());
        Ok(report)
    }

    /// Join two file lists on their parsed timestamps, ordered by time.
    ///
    /// Files whose name carries no valid timestamp are logged and counted as
    /// unparseable; they never fail the join.
    pub fn match_files(&self, lst_files: &[PathBuf], cloud_files: &[PathBuf]) -> LstResult<MatchReport> {
        let (lst_by_time, lst_rejected) = self.index_by_timestamp(lst_files);
        let (cloud_by_time, cloud_rejected) = self.index_by_timestamp(cloud_files);

        let mut pairs = Vec::new();
        for (datetime_utc, lst_path) in &lst_by_time {
            if let Some(cloud_mask_path) = cloud_by_time.get(datetime_utc) {
                pairs.push(TimestampedFilePair {
                    datetime_utc: *datetime_utc,
                    lst_path: lst_path.clone(),
                    cloud_mask_path: cloud_mask_path.clone(),
                });
            }
        }

        Ok(MatchReport {
            unmatched_lst: lst_files.len() - lst_rejected - pairs.len(),
            unmatched_cloud_masks: cloud_files.len() - cloud_rejected - pairs.len(),
            unparseable: lst_rejected + cloud_rejected,
            pairs,
        })
    }

    /// Map timestamp -> path, plus the number of files without a valid timestamp.
    /// On duplicate timestamps the lexicographically first path wins, the others
    /// count as unmatched.
    fn index_by_timestamp(&self, files: &[PathBuf]) -> (BTreeMap<DateTime<Utc>, PathBuf>, usize) {
        let mut sorted: Vec<&PathBuf> = files.iter().collect();
        sorted.sort();

        let mut index = BTreeMap::new();
        let mut rejected = 0;
        for path in sorted {
            match self.timestamp_from_path(path) {
                Ok(datetime_utc) => {
                    index.entry(datetime_utc).or_insert_with(|| path.clone());
                }
                Err(e) => {
                    log::warn!("Ignoring {}: {}", path.display(), e);
                    rejected += 1;
                }
            }
        }
        (index, rejected)
    }

    /// Extract the acquisition time embedded in a raw file name
    pub fn timestamp_from_path(&self, path: &Path) -> LstResult<DateTime<Utc>> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| LstError::InvalidFormat(format!("Unreadable file name: {}", path.display())))?;

        let fields: Vec<&str> = stem.split('_').collect();
        if fields.len() < 2 {
            return Err(LstError::InvalidFormat(format!(
                "No timestamp field in file name: {}",
                path.display()
            )));
        }
        let field = fields[fields.len() - 2];
        let code = field.get(TOKEN_PREFIX_LEN..).ok_or_else(|| {
            LstError::InvalidFormat(format!("Timestamp field too short in {}", path.display()))
        })?;

        self.parse_timestamp_code(code)
            .map_err(|e| LstError::InvalidFormat(format!("{} ({})", e, path.display())))
    }

    /// Parse `YYYYDDDHHMMSS` as UTC
    pub fn parse_timestamp_code(&self, code: &str) -> LstResult<DateTime<Utc>> {
        let caps = self
            .timestamp_pattern
            .captures(code)
            .ok_or_else(|| LstError::InvalidFormat(format!("Malformed timestamp code '{}'", code)))?;

        let number = |i: usize| -> u32 { caps[i].parse().unwrap_or(u32::MAX) };
        let year = number(1) as i32;
        let naive = NaiveDate::from_yo_opt(year, number(2))
            .and_then(|date| date.and_hms_opt(number(3), number(4), number(5)))
            .ok_or_else(|| LstError::InvalidFormat(format!("Out of range timestamp code '{}'", code)))?;

        Ok(Utc.from_utc_datetime(&naive))
    }
}

/// Inverse of `parse_timestamp_code`
pub fn format_timestamp_code(datetime_utc: &DateTime<Utc>) -> String {
    datetime_utc.format("%Y%j%H%M%S").to_string()
}

/// Name of the cleaned raster written for a pair
pub fn masked_file_name(datetime_utc: &DateTime<Utc>) -> String {
    format!("{}_LST.tif", datetime_utc.format("%Y.%m.%d.%H.%M.%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn lst(code: &str) -> PathBuf {
        PathBuf::from(format!("/raw/ECO2LSTE.001_SDS_LST_doy{}_aid0001.tif", code))
    }

    fn cloud(code: &str) -> PathBuf {
        PathBuf::from(format!("/raw/ECO2CLD.001_SDS_CloudMask_doy{}_aid0001.tif", code))
    }

    #[test]
    fn test_parse_day_of_year_code() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        let t = matcher.parse_timestamp_code("2023032011500").unwrap();
        assert_eq!(t.year(), 2023);
        assert_eq!(t.ordinal(), 32);
        assert_eq!(t.month(), 2);
        assert_eq!(t.day(), 1);
        assert_eq!((t.hour(), t.minute(), t.second()), (1, 15, 0));
    }

    #[test]
    fn test_malformed_codes_rejected() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        assert!(matcher.parse_timestamp_code("202303201150").is_err());
        assert!(matcher.parse_timestamp_code("2023400011500").is_err());
        assert!(matcher.parse_timestamp_code("2023032251500").is_err());
        assert!(matcher.timestamp_from_path(Path::new("/raw/nounderscores.tif")).is_err());
    }

    #[test]
    fn test_inner_join_sorted_and_counted() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        let lst_files = vec![lst("2023033011500"), lst("2023032011500"), lst("2023040120000")];
        let cloud_files = vec![cloud("2023032011500"), cloud("2023050120000"), cloud("2023033011500")];

        let report = matcher.match_files(&lst_files, &cloud_files).unwrap();
        assert_eq!(report.pairs.len(), 2);
        assert_eq!(report.unmatched_lst, 1);
        assert_eq!(report.unmatched_cloud_masks, 1);
        assert!(report.pairs[0].datetime_utc < report.pairs[1].datetime_utc);
        assert_eq!(report.pairs[0].lst_path, lst("2023032011500"));
        assert_eq!(report.pairs[0].cloud_mask_path, cloud("2023032011500"));
    }

    #[test]
    fn test_join_independent_of_input_order() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        let codes = ["2023152101010", "2023151101010", "2023153101010"];
        let lst_files: Vec<_> = codes.iter().map(|c| lst(c)).collect();
        let mut cloud_files: Vec<_> = codes.iter().map(|c| cloud(c)).collect();
        let forward = matcher.match_files(&lst_files, &cloud_files).unwrap();
        cloud_files.reverse();
        let backward = matcher.match_files(&lst_files, &cloud_files).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_duplicate_timestamps_map_to_one_pair() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        let lst_files = vec![
            lst("2023032011500"),
            PathBuf::from("/raw/ECO2LSTE.001_SDS_LST_doy2023032011500_aid0002.tif"),
        ];
        let cloud_files = vec![cloud("2023032011500")];
        let report = matcher.match_files(&lst_files, &cloud_files).unwrap();
        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.unmatched_lst, 1);
    }

    #[test]
    fn test_unparseable_names_are_counted_not_fatal() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        let lst_files = vec![lst("2023032011500"), PathBuf::from("/raw/X_LST_garbage_aid0001.tif")];
        let cloud_files = vec![
            cloud("2023032011500"),
            PathBuf::from("/raw/ECO2CLD.001_SDS_CloudMask_doy2023400011500_aid0001.tif"),
        ];

        let report = matcher.match_files(&lst_files, &cloud_files).unwrap();
        assert_eq!(report.pairs.len(), 1);
        assert_eq!(report.unparseable, 2);
        assert_eq!(report.unmatched_lst, 0);
        assert_eq!(report.unmatched_cloud_masks, 0);
        assert_eq!(report.unmatched_total(), 2);
    }

    #[test]
    fn test_empty_inputs_give_empty_report() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        let report = matcher.match_files(&[], &[cloud("2023032011500")]).unwrap();
        assert!(report.pairs.is_empty());
        assert_eq!(report.unmatched_cloud_masks, 1);
    }

    #[test]
    fn test_timestamp_code_round_trip() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        for code in ["2023032011500", "2020366235959", "2019001000000"] {
            let t = matcher.parse_timestamp_code(code).unwrap();
            assert_eq!(format_timestamp_code(&t), code);
            let reparsed = matcher.timestamp_from_path(&lst(&format_timestamp_code(&t))).unwrap();
            assert_eq!(reparsed, t);
        }
    }

    #[test]
    fn test_masked_file_name() {
        let matcher = DateKeyedFileMatcher::new().unwrap();
        let t = matcher.parse_timestamp_code("2023032011500").unwrap();
        assert_eq!(masked_file_name(&t), "2023.02.01.01.15.00_LST.tif");
    }
}
