//! Stable output names: `<PREFIX>_<YYYY_MM_DD>_<SEQ>.csv`.
//!
//! Names depend only on prefix, run date and sequence, so validation tooling can
//! find the latest file with a substring match on the prefix.

use chrono::NaiveDate;

const DATE_FORMAT: &str = "%Y_%m_%d";

/// Name of the `sequence`-th data file of `prefix` on `run_date`.
pub fn data_file_name(prefix: &str, run_date: NaiveDate, sequence: u32) -> String {
    format!(
        "{}_{}_{:04}.csv",
        prefix,
        run_date.format(DATE_FORMAT),
        sequence
    )
}

/// Name prefix shared by all control files of `prefix` on `run_date`.
pub fn control_name_prefix(prefix: &str, run_date: NaiveDate) -> String {
    format!("{}_CONTROL_{}_", prefix, run_date.format(DATE_FORMAT))
}

/// Name of the `sequence`-th control file of `prefix` on `run_date`.
pub fn control_file_name(prefix: &str, run_date: NaiveDate, sequence: u32) -> String {
    format!("{}{:04}.csv", control_name_prefix(prefix, run_date), sequence)
}

/// Hex blake3 digest of file content.
pub fn content_hash(bytes: &[u8]) -> String {
    blake3::hash(bytes).to_hex().to_string()
}
