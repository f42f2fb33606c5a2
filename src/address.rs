//! Remote archive layout.
//!
//! `{base}/{HOURLY|DAILY}/{year}/{month:02}[/{day:02}]/MERGE_{prefix}_{stamp}.{ext}`

use crate::time_unit::{BatchKey, Granularity, TimeUnit};

pub const DEFAULT_PREFIX: &str = "CPTEC";
pub const DEFAULT_EXTENSION: &str = "grib2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAddressResolver {
    base: String,
    prefix: String,
    extension: String,
}

impl FetchAddressResolver {
    pub fn new(base: &str, prefix: &str, extension: &str) -> Self {
        FetchAddressResolver {
            base: base.trim_end_matches('/').to_string(),
            prefix: prefix.to_string(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Directory holding every unit of a batch.
    pub fn directory(&self, granularity: Granularity, key: &BatchKey) -> String {
        match key {
            BatchKey::Day { year, month, day } => format!(
                "{}/{}/{year}/{month:02}/{day:02}",
                self.base,
                granularity.as_str()
            ),
            BatchKey::Month { year, month } => {
                format!("{}/{}/{year}/{month:02}", self.base, granularity.as_str())
            }
        }
    }

    pub fn file_name(&self, unit: &TimeUnit) -> String {
        format!("MERGE_{}_{}.{}", self.prefix, unit.stamp(), self.extension)
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://ftp.cptec.inpe.br/modelos/tempo/MERGE/GPM/";

    #[test]
    fn should_resolve_hourly_addresses() {
        let resolver = FetchAddressResolver::new(BASE, DEFAULT_PREFIX, DEFAULT_EXTENSION);
        let unit = TimeUnit::parse_setting(Granularity::Hourly, "2024-01-05h03").unwrap();

        assert_eq!(
            resolver.directory(Granularity::Hourly, &unit.batch_key()),
            "http://ftp.cptec.inpe.br/modelos/tempo/MERGE/GPM/HOURLY/2024/01/05"
        );
        assert_eq!(resolver.file_name(&unit), "MERGE_CPTEC_2024010503.grib2");
    }

    #[test]
    fn should_resolve_daily_addresses() {
        let resolver = FetchAddressResolver::new(BASE, DEFAULT_PREFIX, ".grib2");
        let unit = TimeUnit::parse_setting(Granularity::Daily, "2023-09-30").unwrap();

        assert_eq!(
            resolver.directory(Granularity::Daily, &unit.batch_key()),
            "http://ftp.cptec.inpe.br/modelos/tempo/MERGE/GPM/DAILY/2023/09"
        );
        assert_eq!(resolver.file_name(&unit), "MERGE_CPTEC_20230930.grib2");
    }

    #[test]
    fn should_be_deterministic() {
        let a = FetchAddressResolver::new(BASE, "CPTEC", "grib2");
        let b = FetchAddressResolver::new(BASE, "CPTEC", "grib2");
        let unit = TimeUnit::parse_setting(Granularity::Hourly, "2024-12-31h23").unwrap();

        assert_eq!(a.file_name(&unit), b.file_name(&unit));
        assert_eq!(
            a.directory(Granularity::Hourly, &unit.batch_key()),
            b.directory(Granularity::Hourly, &unit.batch_key())
        );
    }
}
