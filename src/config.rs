//! Run configuration, read from flags or the environment.

use std::{path::PathBuf, time::Duration};

use clap::{builder::FalseyValueParser, Args};

use crate::{
    address::{FetchAddressResolver, DEFAULT_EXTENSION, DEFAULT_PREFIX},
    aggregate::AggregationSettings,
    error::{Result, SyncError},
    refresh::RefreshTarget,
    time_unit::{Granularity, TimeUnit},
    window::WindowRequest,
};

pub const DEFAULT_ARCHIVE_URL: &str = "http://ftp.cptec.inpe.br/modelos/tempo/MERGE/GPM";

#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Operating mode: HOURLY or DAILY
    #[arg(long, env = "GRANULARITY", value_enum, ignore_case = true)]
    pub granularity: Granularity,

    /// First unit of an explicit period (YYYY-MM-DDhHH or YYYY-MM-DD)
    #[arg(long, env = "SYNC_FROM")]
    pub sync_from: Option<String>,

    /// Last unit of an explicit period
    #[arg(long, env = "SYNC_TO")]
    pub sync_to: Option<String>,

    /// Number of days before now to synchronise, walked in units of the granularity
    #[arg(long, env = "SYNC_DAYS")]
    pub sync_days: Option<u32>,

    /// Aggregation worker count
    #[arg(long, env = "PROCESSES", default_value_t = 2)]
    pub workers: usize,

    /// Value marking cells without measurement
    #[arg(long, env = "NO_DATA", default_value_t = -9999.0, allow_negative_numbers = true)]
    pub no_data: f64,

    #[arg(long, env = "ARCHIVE_BASE_URL", default_value = DEFAULT_ARCHIVE_URL)]
    pub archive_url: String,

    #[arg(long, env = "FILE_PREFIX", default_value = DEFAULT_PREFIX)]
    pub file_prefix: String,

    #[arg(long, env = "FILE_EXTENSION", default_value = DEFAULT_EXTENSION)]
    pub file_extension: String,

    /// Abort when an item of the period is missing on the archive
    #[arg(long, env = "STRICT_FETCH", value_parser = FalseyValueParser::new())]
    pub strict_fetch: bool,

    /// HTTP timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 120)]
    pub request_timeout: u64,

    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Database holding the sub-basin contours, defaults to DATABASE_URL
    #[arg(long, env = "SHAPES_DATABASE_URL")]
    pub shapes_database_url: Option<String>,

    #[arg(long, env = "POSTGRES_RASTER_TABLE")]
    pub raster_table: Option<String>,

    #[arg(long, env = "POSTGRES_BASIN_DATA_TABLE")]
    pub basin_table: Option<String>,

    /// Model whose contours are used (ETA40 selects the eta contours)
    #[arg(long, env = "MODEL", default_value = "ETA40")]
    pub shape_model: String,

    /// GeoJSON FeatureCollection to read basins from instead of the database
    #[arg(long, env = "BASINS_FILE")]
    pub basins_file: Option<PathBuf>,

    #[arg(long, env = "SKIP_WRITE_RASTER", value_parser = FalseyValueParser::new())]
    pub skip_write_raster: bool,

    #[arg(long, env = "SKIP_WRITE_BASIN", value_parser = FalseyValueParser::new())]
    pub skip_write_basin: bool,

    /// Ask the reporting API to refresh after a run that fetched data
    #[arg(long, env = "DOWNSTREAM_REFRESH", value_parser = FalseyValueParser::new())]
    pub refresh: bool,

    #[arg(long, env = "REFRESH_API_URL")]
    pub refresh_url: Option<String>,

    #[arg(long, env = "REFRESH_WORKSPACE")]
    pub refresh_workspace: Option<String>,

    #[arg(long, env = "REFRESH_DATASET")]
    pub refresh_dataset: Option<String>,

    /// Also write the basin series to a parquet file
    #[arg(long, env = "EXPORT_PARQUET", value_parser = FalseyValueParser::new())]
    pub export_parquet: bool,

    /// Directory of the parquet export, defaults to the home directory
    #[arg(long, env = "EXPORT_DIR")]
    pub export_dir: Option<PathBuf>,

    /// Parent of the per-run work area, defaults to the system temp directory
    #[arg(long, env = "WORK_DIR")]
    pub work_dir: Option<PathBuf>,
}

/// Validated, immutable configuration of one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub granularity: Granularity,
    pub window: WindowRequest,
    pub aggregation: AggregationSettings,
    pub archive_url: String,
    pub file_prefix: String,
    pub file_extension: String,
    pub strict_fetch: bool,
    pub request_timeout: Duration,
    pub database_url: Option<String>,
    pub shapes_database_url: Option<String>,
    pub raster_table: Option<String>,
    pub basin_table: Option<String>,
    pub contour_column: String,
    pub basins_file: Option<PathBuf>,
    pub skip_write_raster: bool,
    pub skip_write_basin: bool,
    pub refresh: Option<RefreshTarget>,
    pub export_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
}

/// Where the series stores live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreTargets {
    pub database_url: String,
    pub raster_table: String,
    pub basin_table: String,
}

impl Settings {
    pub fn from_args(args: &SyncArgs) -> Result<Self> {
        let granularity = args.granularity;
        let boundary = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| !v.trim().is_empty())
                .map(|v| TimeUnit::parse_setting(granularity, v))
                .transpose()
        };

        if args.workers == 0 {
            return Err(SyncError::config("PROCESSES must be at least 1"));
        }
        for table in [&args.raster_table, &args.basin_table].into_iter().flatten() {
            validate_identifier(table)?;
        }

        let refresh = if args.refresh {
            Some(RefreshTarget {
                api_url: required(&args.refresh_url, "REFRESH_API_URL")?,
                workspace: required(&args.refresh_workspace, "REFRESH_WORKSPACE")?,
                dataset: required(&args.refresh_dataset, "REFRESH_DATASET")?,
            })
        } else {
            None
        };

        let export_dir = if args.export_parquet {
            let dir = match &args.export_dir {
                Some(dir) => dir.clone(),
                None => dirs::home_dir().ok_or_else(|| {
                    SyncError::config("EXPORT_DIR must be set when there is no home directory")
                })?,
            };
            Some(dir)
        } else {
            None
        };

        Ok(Settings {
            granularity,
            window: WindowRequest {
                from: boundary(&args.sync_from)?,
                to: boundary(&args.sync_to)?,
                trailing: args.sync_days,
            },
            aggregation: AggregationSettings {
                workers: args.workers,
                no_data: args.no_data,
            },
            archive_url: args.archive_url.clone(),
            file_prefix: args.file_prefix.clone(),
            file_extension: args.file_extension.clone(),
            strict_fetch: args.strict_fetch,
            request_timeout: Duration::from_secs(args.request_timeout),
            database_url: args.database_url.clone(),
            shapes_database_url: args.shapes_database_url.clone(),
            raster_table: args.raster_table.clone(),
            basin_table: args.basin_table.clone(),
            contour_column: contour_column(&args.shape_model).to_string(),
            basins_file: args.basins_file.clone(),
            skip_write_raster: args.skip_write_raster,
            skip_write_basin: args.skip_write_basin,
            refresh,
            export_dir,
            work_dir: args.work_dir.clone(),
        })
    }

    pub fn resolver(&self) -> FetchAddressResolver {
        FetchAddressResolver::new(&self.archive_url, &self.file_prefix, &self.file_extension)
    }

    /// Database and tables a full sync run needs.
    pub fn store_targets(&self) -> Result<StoreTargets> {
        Ok(StoreTargets {
            database_url: required(&self.database_url, "DATABASE_URL")?,
            raster_table: required(&self.raster_table, "POSTGRES_RASTER_TABLE")?,
            basin_table: required(&self.basin_table, "POSTGRES_BASIN_DATA_TABLE")?,
        })
    }

    /// Shapes database, falling back to the series database.
    pub fn shapes_database_url(&self) -> Result<String> {
        match &self.shapes_database_url {
            Some(url) => Ok(url.clone()),
            None => required(&self.database_url, "SHAPES_DATABASE_URL or DATABASE_URL"),
        }
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
        .ok_or_else(|| SyncError::config(format!("{name} parameter must be informed")))
}

/// `contorno_eta` for the ETA40 model, `contorno_gfs` otherwise.
pub fn contour_column(model: &str) -> &'static str {
    if model.trim().eq_ignore_ascii_case("ETA40") {
        "contorno_eta"
    } else {
        "contorno_gfs"
    }
}

/// Accepts `name` or `schema.name`, each part `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|part| valid_part(part)) {
        Ok(())
    } else {
        Err(SyncError::config(format!(
            "`{name}` is not a valid table name"
        )))
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Commands};

    fn parse(args: &[&str]) -> SyncArgs {
        let mut argv = vec!["merge-sync", "sync"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Sync(args) => args,
            Commands::Plan(_) => unreachable!(),
        }
    }

    #[test]
    fn should_parse_hourly_period() {
        let args = parse(&[
            "--granularity",
            "hourly",
            "--sync-from",
            "2024-01-01h00",
            "--sync-to",
            "2024-01-01h02",
            "--raster-table",
            "public.merge_horario",
        ]);

        let settings = Settings::from_args(&args).unwrap();

        assert_eq!(settings.granularity, Granularity::Hourly);
        assert_eq!(settings.window.from.unwrap().to_string(), "2024-01-01 00:00");
        assert_eq!(settings.window.to.unwrap().to_string(), "2024-01-01 02:00");
        assert_eq!(settings.window.trailing, None);
    }

    #[test]
    fn should_reject_boundary_in_wrong_format() {
        let args = parse(&["--granularity", "DAILY", "--sync-from", "2024-01-01h00"]);

        assert!(matches!(
            Settings::from_args(&args),
            Err(SyncError::Configuration(_))
        ));
    }

    #[test]
    fn should_reject_zero_workers() {
        let args = parse(&["--granularity", "DAILY", "--workers", "0"]);

        assert!(Settings::from_args(&args).is_err());
    }

    #[test]
    fn should_require_refresh_target_when_enabled() {
        let args = parse(&["--granularity", "DAILY", "--refresh", "--refresh-url", "http://api"]);

        let error = Settings::from_args(&args).unwrap_err();
        assert!(error.to_string().contains("REFRESH_WORKSPACE"));
    }

    #[test]
    fn should_accept_negative_no_data() {
        let args = parse(&["--granularity", "DAILY", "--no-data", "-999"]);

        assert_eq!(Settings::from_args(&args).unwrap().aggregation.no_data, -999.0);
    }

    #[test]
    fn should_validate_table_names() {
        assert!(validate_identifier("merge_horario").is_ok());
        assert!(validate_identifier("public._merge2").is_ok());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("2merge").is_err());
        assert!(validate_identifier("merge; DROP TABLE x").is_err());
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn should_pick_contour_column_for_model() {
        assert_eq!(contour_column("ETA40"), "contorno_eta");
        assert_eq!(contour_column("eta40"), "contorno_eta");
        assert_eq!(contour_column("GEFS"), "contorno_gfs");
    }
}
