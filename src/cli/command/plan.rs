use anyhow::{Context, Result};
use chrono::Local;

use crate::{
    address::FetchAddressResolver,
    cli::create_spinner,
    config::{Settings, SyncArgs},
    db::{postgres::PgSeriesStore, SeriesStore},
    window::{SyncWindow, WindowPlanner, WindowPolicy},
};

/// Prints the window a sync run would cover without fetching anything.
pub async fn plan(args: &SyncArgs) -> Result<()> {
    let settings = Settings::from_args(args)?;
    let planner = WindowPlanner::new(settings.granularity);
    let policy = planner.policy(&settings.window)?;

    let cursor = match policy {
        WindowPolicy::CursorFallback => {
            let targets = settings.store_targets()?;
            let store = PgSeriesStore::connect(
                &targets.database_url,
                settings.granularity,
                &targets.raster_table,
                &targets.basin_table,
            )?;

            let bar = create_spinner("Reading sync cursor...".to_string());
            let cursor = store
                .last_synced(settings.granularity)
                .await
                .context("cannot read sync cursor")?;
            bar.finish_and_clear();
            cursor
        }
        _ => None,
    };

    let window = planner.window(policy, cursor, Local::now().naive_local())?;
    for line in describe(&window, &settings.resolver()) {
        println!("{line}");
    }

    Ok(())
}

fn describe(window: &SyncWindow, resolver: &FetchAddressResolver) -> Vec<String> {
    if window.is_empty() {
        return vec![format!(
            "Nothing to synchronise: {} is after {}",
            window.start, window.end
        )];
    }

    let mut lines = vec![format!(
        "{} unit(s) from {} back to {}",
        window.len(),
        window.end,
        window.start
    )];
    for batch in window.batches() {
        lines.push(format!(
            "{} {}",
            batch.key,
            resolver.directory(batch.granularity(), &batch.key)
        ));
        for unit in &batch.units {
            lines.push(format!("  {}", resolver.file_name(unit)));
        }
    }

    lines
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::time_unit::{Granularity, TimeUnit};

    fn day(value: &str) -> TimeUnit {
        TimeUnit::parse_setting(Granularity::Daily, value).unwrap()
    }

    #[test]
    fn should_describe_batches_and_files() {
        let resolver = FetchAddressResolver::new("http://archive", "CPTEC", "grib2");
        let window = SyncWindow {
            start: day("2024-01-31"),
            end: day("2024-02-01"),
        };

        assert_eq!(
            describe(&window, &resolver),
            vec![
                "2 unit(s) from 2024-02-01 back to 2024-01-31",
                "(2024, 2) http://archive/DAILY/2024/02",
                "  MERGE_CPTEC_20240201.grib2",
                "(2024, 1) http://archive/DAILY/2024/01",
                "  MERGE_CPTEC_20240131.grib2",
            ]
        );
    }

    #[test]
    fn should_describe_empty_window() {
        let resolver = FetchAddressResolver::new("http://archive", "CPTEC", "grib2");
        let window = SyncWindow {
            start: day("2024-02-02"),
            end: day("2024-02-01"),
        };

        assert_eq!(describe(&window, &resolver).len(), 1);
    }
}
