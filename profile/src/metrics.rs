use crate::Profile;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;

/// Covered/total statement counts for one package.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsItem {
    pub covered: i64,
    pub total: i64,
    pub cover_rate: f64,
}

/// One coverage sample for a service: aggregate plus per-package breakdown.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsData {
    pub name: String,
    pub covered: i64,
    pub total: i64,
    pub cover_rate: f64,
    pub pkg_data: HashMap<String, MetricsItem>,
    pub ts: i64,
}

/// Covered percentage, 0 when nothing was measured.
pub fn percent(covered: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    100.0 * covered as f64 / total as f64
}

/// Accumulates per-package and aggregate statement coverage over `profiles`.
///
/// The package of a file is its slash-separated parent directory. `name`
/// and `ts` are left for the caller to stamp.
pub fn metrics_data(profiles: &[Profile]) -> MetricsData {
    let mut pkg_data: HashMap<String, MetricsItem> = HashMap::new();
    let mut covered = 0i64;
    let mut total = 0i64;
    for profile in profiles {
        let mut file_covered = 0i64;
        let mut file_total = 0i64;
        for block in &profile.blocks {
            file_total += i64::from(block.num_stmt);
            if block.count > 0 {
                file_covered += i64::from(block.num_stmt);
            }
        }
        covered += file_covered;
        total += file_total;
        let item = pkg_data.entry(package_dir(&profile.file_name)).or_default();
        item.covered += file_covered;
        item.total += file_total;
    }

    for item in pkg_data.values_mut() {
        item.cover_rate = percent(item.covered, item.total);
    }

    MetricsData {
        covered,
        total,
        cover_rate: percent(covered, total),
        pkg_data,
        ..MetricsData::default()
    }
}

fn package_dir(file_name: &str) -> String {
    match file_name.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => file_name[..idx].to_string(),
        None => ".".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_profiles;
    use pretty_assertions::assert_eq;

    #[test]
    fn accumulates_totals_and_packages() {
        let profiles = parse_profiles(
            "mode: count\n\
             svc/api/a.go:1.1,1.2 4 2\n\
             svc/api/a.go:2.1,2.2 2 0\n\
             svc/db/b.go:1.1,1.2 3 1\n\
             svc/db/b.go:2.1,2.2 1 0\n",
        )
        .unwrap();
        let md = metrics_data(&profiles);
        assert_eq!(md.total, 10);
        assert_eq!(md.covered, 7);
        assert_eq!(md.cover_rate, 70.0);
        assert_eq!(md.pkg_data["svc/api"].total, 6);
        assert_eq!(md.pkg_data["svc/api"].covered, 4);
        assert_eq!(md.pkg_data["svc/db"].total, 4);
        assert_eq!(md.pkg_data["svc/db"].covered, 3);
        assert_eq!(md.pkg_data["svc/db"].cover_rate, 75.0);
    }

    #[test]
    fn sampler_scenario_three_of_five_blocks_covered() {
        let profiles = parse_profiles(
            "mode: count\n\
             app/x.go:1.1,1.2 2 1\n\
             app/x.go:2.1,2.2 2 4\n\
             app/x.go:3.1,3.2 2 9\n\
             app/x.go:4.1,4.2 2 0\n\
             app/x.go:5.1,5.2 2 0\n",
        )
        .unwrap();
        let md = metrics_data(&profiles);
        assert_eq!(md.total, 10);
        assert_eq!(md.covered, 6);
        assert_eq!(md.cover_rate, 60.0);
    }

    #[test]
    fn empty_profile_rates_zero_not_nan() {
        let md = metrics_data(&[]);
        assert_eq!(md.total, 0);
        assert_eq!(md.cover_rate, 0.0);
    }

    #[test]
    fn package_of_bare_file_is_dot() {
        let profiles = parse_profiles("mode: set\ntop.go:1.1,1.2 1 1\n").unwrap();
        let md = metrics_data(&profiles);
        assert!(md.pkg_data.contains_key("."));
    }
}
