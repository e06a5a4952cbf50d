//! Core data model for baseline computation
//!
//! ## Table of Contents
//! - **Series**: `Vec<Option<f64>>`, `None` is the only missing marker
//! - **Metric**: Tracked mortality metrics
//! - **SeriesResolution**: Time resolution of a label sequence
//! - **BaselineMethod**: Baseline model requested from the backend
//! - **BaselineWindow**: Inclusive reference window into the labels
//! - **MetricSeries**: The seven parallel arrays (plus z-score) of one metric
//! - **DatasetEntry / Dataset**: Per (age-group, country) units

use crate::error::{BaselineError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// A time-aligned series; `None` marks a missing position
pub type Series = Vec<Option<f64>>;

/// Normalize a raw float: NaN and infinities become missing
#[inline]
pub fn normalize(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Normalize a slice of raw floats into a [`Series`]
pub fn normalize_series(values: &[f64]) -> Series {
    values.iter().copied().map(normalize).collect()
}

/// Count present values in `series[window]`
pub fn count_present(series: &[Option<f64>], window: BaselineWindow) -> usize {
    series
        .get(window.start..=window.end)
        .map(|slice| slice.iter().filter(|v| v.is_some()).count())
        .unwrap_or(0)
}

/// Round to a fixed number of decimals
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// A single element of a series on the wire: number, `"NA"`-style text or null
#[derive(Deserialize)]
#[serde(untagged)]
enum WireValue {
    Number(f64),
    Text(String),
    Null,
}

impl WireValue {
    fn into_value(self) -> Option<f64> {
        match self {
            WireValue::Number(v) => normalize(v),
            // "NA", "NaN", "" and friends; numeric strings are accepted as numbers
            WireValue::Text(s) => s.trim().parse::<f64>().ok().and_then(normalize),
            WireValue::Null => None,
        }
    }
}

/// Deserialize a series accepting numbers, nulls and `"NA"` sentinels
pub(crate) fn deserialize_series<'de, D>(deserializer: D) -> std::result::Result<Series, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<WireValue> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(WireValue::into_value).collect())
}

/// Like [`deserialize_series`] for an optional array
pub(crate) fn deserialize_opt_series<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Series>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<WireValue>> = Option::deserialize(deserializer)?;
    Ok(raw.map(|values| values.into_iter().map(WireValue::into_value).collect()))
}

/// Tracked mortality metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Raw death counts
    Deaths,
    /// Crude mortality rate
    Cmr,
    /// Age-standardized mortality rate, WHO standard population
    AsmrWho,
    /// Age-standardized mortality rate, European standard population
    AsmrEsp,
    /// Age-standardized mortality rate, US standard population
    AsmrUsa,
    /// Age-standardized mortality rate, country-specific standard population
    AsmrCountry,
    /// Life expectancy
    Le,
}

impl Metric {
    /// All tracked metrics
    pub const ALL: [Metric; 7] = [
        Metric::Deaths,
        Metric::Cmr,
        Metric::AsmrWho,
        Metric::AsmrEsp,
        Metric::AsmrUsa,
        Metric::AsmrCountry,
        Metric::Le,
    ];

    /// Wire name of the metric
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Deaths => "deaths",
            Metric::Cmr => "cmr",
            Metric::AsmrWho => "asmr_who",
            Metric::AsmrEsp => "asmr_esp",
            Metric::AsmrUsa => "asmr_usa",
            Metric::AsmrCountry => "asmr_country",
            Metric::Le => "le",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = BaselineError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| BaselineError::invalid_input(format!("unknown metric '{}'", s)))
    }
}

/// Resolution family, which decides seasonality and window limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolutionFamily {
    /// Weekly and weekly moving averages
    Weekly,
    /// Calendar months
    Monthly,
    /// Calendar quarters
    Quarterly,
    /// Yearly, flu season and mid-year
    Yearly,
}

/// Time resolution of a label sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeriesResolution {
    /// ISO weeks (`2020 W01`)
    #[serde(rename = "weekly")]
    Weekly,
    /// 13-week simple moving average
    #[serde(rename = "weekly_13w_sma")]
    Weekly13wSma,
    /// 26-week simple moving average
    #[serde(rename = "weekly_26w_sma")]
    Weekly26wSma,
    /// 52-week simple moving average
    #[serde(rename = "weekly_52w_sma")]
    Weekly52wSma,
    /// 104-week simple moving average
    #[serde(rename = "weekly_104w_sma")]
    Weekly104wSma,
    /// Months (`2020 Jan`)
    #[serde(rename = "monthly")]
    Monthly,
    /// Quarters (`2020 Q1`)
    #[serde(rename = "quarterly")]
    Quarterly,
    /// Calendar years (`2020`)
    #[serde(rename = "yearly")]
    Yearly,
    /// Flu seasons (`2019/20`)
    #[serde(rename = "fluseason")]
    Fluseason,
    /// Mid-year to mid-year (`2019/20`)
    #[serde(rename = "midyear")]
    Midyear,
}

impl SeriesResolution {
    /// Family this resolution belongs to
    pub fn family(&self) -> ResolutionFamily {
        match self {
            SeriesResolution::Weekly
            | SeriesResolution::Weekly13wSma
            | SeriesResolution::Weekly26wSma
            | SeriesResolution::Weekly52wSma
            | SeriesResolution::Weekly104wSma => ResolutionFamily::Weekly,
            SeriesResolution::Monthly => ResolutionFamily::Monthly,
            SeriesResolution::Quarterly => ResolutionFamily::Quarterly,
            SeriesResolution::Yearly | SeriesResolution::Fluseason | SeriesResolution::Midyear => {
                ResolutionFamily::Yearly
            }
        }
    }

    /// Wire name of the resolution
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesResolution::Weekly => "weekly",
            SeriesResolution::Weekly13wSma => "weekly_13w_sma",
            SeriesResolution::Weekly26wSma => "weekly_26w_sma",
            SeriesResolution::Weekly52wSma => "weekly_52w_sma",
            SeriesResolution::Weekly104wSma => "weekly_104w_sma",
            SeriesResolution::Monthly => "monthly",
            SeriesResolution::Quarterly => "quarterly",
            SeriesResolution::Yearly => "yearly",
            SeriesResolution::Fluseason => "fluseason",
            SeriesResolution::Midyear => "midyear",
        }
    }
}

impl fmt::Display for SeriesResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Baseline model requested from the forecasting backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineMethod {
    /// No baseline; the calculator does nothing
    Auto,
    /// Last in-window observation held constant
    Naive,
    /// Mean of the window
    Mean,
    /// Median of the window
    Median,
    /// Linear regression with trend
    LinReg,
    /// Exponential smoothing
    Exp,
}

impl BaselineMethod {
    /// Wire name sent as `m`
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineMethod::Auto => "auto",
            BaselineMethod::Naive => "naive",
            BaselineMethod::Mean => "mean",
            BaselineMethod::Median => "median",
            BaselineMethod::LinReg => "lin_reg",
            BaselineMethod::Exp => "exp",
        }
    }

    /// Whether the backend fits a trend term
    pub fn has_trend(&self) -> bool {
        matches!(self, BaselineMethod::LinReg)
    }
}

impl fmt::Display for BaselineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive, 0-indexed reference window into the label sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineWindow {
    /// First position of the window
    pub start: usize,
    /// Last position of the window
    pub end: usize,
}

impl BaselineWindow {
    /// Create a window from unsigned positions
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Create a window from signed positions; negative positions yield `None`
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        let start = usize::try_from(start).ok()?;
        let end = usize::try_from(end).ok()?;
        Some(Self { start, end })
    }

    /// Number of labels covered (0 when `start > end`)
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// Whether the window covers no labels
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shrink the window to at most `max_len` labels, keeping `start`
    pub fn clamp_to(self, max_len: usize) -> Self {
        if max_len == 0 || self.len() <= max_len {
            return self;
        }
        Self {
            start: self.start,
            end: self.start + max_len - 1,
        }
    }

    /// 1-indexed `(bs, be)` bounds as the backend expects them
    pub fn backend_bounds(&self) -> (usize, usize) {
        (self.start + 1, self.end + 1)
    }
}

impl fmt::Display for BaselineWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Deserialize)]
struct RawMetricSeries {
    #[serde(deserialize_with = "deserialize_series")]
    primary: Series,
    #[serde(default, deserialize_with = "deserialize_series")]
    baseline: Series,
    #[serde(default, deserialize_with = "deserialize_series")]
    baseline_lower: Series,
    #[serde(default, deserialize_with = "deserialize_series")]
    baseline_upper: Series,
    #[serde(default, deserialize_with = "deserialize_series")]
    excess: Series,
    #[serde(default, deserialize_with = "deserialize_series")]
    excess_lower: Series,
    #[serde(default, deserialize_with = "deserialize_series")]
    excess_upper: Series,
    #[serde(default, deserialize_with = "deserialize_series")]
    zscore: Series,
}

fn pad_missing(mut series: Series, len: usize) -> Series {
    if series.is_empty() {
        series.resize(len, None);
    }
    series
}

impl From<RawMetricSeries> for MetricSeries {
    fn from(raw: RawMetricSeries) -> Self {
        let len = raw.primary.len();
        Self {
            baseline: pad_missing(raw.baseline, len),
            baseline_lower: pad_missing(raw.baseline_lower, len),
            baseline_upper: pad_missing(raw.baseline_upper, len),
            excess: pad_missing(raw.excess, len),
            excess_lower: pad_missing(raw.excess_lower, len),
            excess_upper: pad_missing(raw.excess_upper, len),
            zscore: pad_missing(raw.zscore, len),
            primary: raw.primary,
        }
    }
}

/// All arrays tracked for one metric of one entry.
///
/// Every array has the label-sequence length; derived arrays that are
/// omitted on input are filled with missing values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMetricSeries")]
pub struct MetricSeries {
    /// Observed values
    pub primary: Series,
    /// Expected values
    pub baseline: Series,
    /// Lower prediction interval bound
    pub baseline_lower: Series,
    /// Upper prediction interval bound
    pub baseline_upper: Series,
    /// Observed minus baseline
    pub excess: Series,
    /// Observed minus lower bound
    pub excess_lower: Series,
    /// Observed minus upper bound
    pub excess_upper: Series,
    /// Z-score reported by the backend, when available
    pub zscore: Series,
}

impl MetricSeries {
    /// Create from observed values; derived arrays start out missing
    pub fn new(primary: Series) -> Self {
        let len = primary.len();
        Self {
            primary,
            baseline: vec![None; len],
            baseline_lower: vec![None; len],
            baseline_upper: vec![None; len],
            excess: vec![None; len],
            excess_lower: vec![None; len],
            excess_upper: vec![None; len],
            zscore: vec![None; len],
        }
    }

    /// Create from raw floats, normalizing NaN to missing
    pub fn from_raw(values: &[f64]) -> Self {
        Self::new(normalize_series(values))
    }

    /// Length of the observed series
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// Whether the series is empty
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Check every array against the label-sequence length
    pub fn validate(&self, expected: usize) -> Result<()> {
        let arrays: [(&str, &Series); 8] = [
            ("primary", &self.primary),
            ("baseline", &self.baseline),
            ("baseline_lower", &self.baseline_lower),
            ("baseline_upper", &self.baseline_upper),
            ("excess", &self.excess),
            ("excess_lower", &self.excess_lower),
            ("excess_upper", &self.excess_upper),
            ("zscore", &self.zscore),
        ];
        for (name, array) in arrays {
            if array.len() != expected {
                return Err(BaselineError::invalid_input(format!(
                    "{} has length {}, expected {}",
                    name,
                    array.len(),
                    expected
                )));
            }
        }
        Ok(())
    }
}

/// One (age-group, country) time series unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    /// Age group key (`all`, `0-14`, `85+`, ...)
    pub age_group: String,
    /// ISO 3166 alpha-3 country code (or region code)
    pub iso3c: String,
    /// Per-metric arrays
    #[serde(default)]
    pub metrics: BTreeMap<Metric, MetricSeries>,
}

impl DatasetEntry {
    /// Create an empty entry
    pub fn new(age_group: impl Into<String>, iso3c: impl Into<String>) -> Self {
        Self {
            age_group: age_group.into(),
            iso3c: iso3c.into(),
            metrics: BTreeMap::new(),
        }
    }

    /// Add a metric from raw floats
    pub fn with_metric(mut self, metric: Metric, values: &[f64]) -> Self {
        self.metrics.insert(metric, MetricSeries::from_raw(values));
        self
    }

    /// Add a metric from an already-normalized series
    pub fn with_series(mut self, metric: Metric, series: MetricSeries) -> Self {
        self.metrics.insert(metric, series);
        self
    }

    /// Get the arrays of a metric
    pub fn metric(&self, metric: Metric) -> Option<&MetricSeries> {
        self.metrics.get(&metric)
    }

    /// Get the arrays of a metric mutably
    pub fn metric_mut(&mut self, metric: Metric) -> Option<&mut MetricSeries> {
        self.metrics.get_mut(&metric)
    }

    /// Check every metric against the label-sequence length
    pub fn validate(&self, label_count: usize) -> Result<()> {
        for (metric, series) in &self.metrics {
            series.validate(label_count).map_err(|e| {
                BaselineError::invalid_input(format!(
                    "{}/{} {}: {}",
                    self.age_group, self.iso3c, metric, e
                ))
            })?;
        }
        Ok(())
    }
}

/// Entries keyed by age group, then country
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    entries: BTreeMap<String, BTreeMap<String, DatasetEntry>>,
}

impl Dataset {
    /// Create an empty dataset
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, replacing any entry with the same keys
    pub fn insert(&mut self, entry: DatasetEntry) {
        self.entries
            .entry(entry.age_group.clone())
            .or_default()
            .insert(entry.iso3c.clone(), entry);
    }

    /// Look up an entry
    pub fn get(&self, age_group: &str, iso3c: &str) -> Option<&DatasetEntry> {
        self.entries.get(age_group)?.get(iso3c)
    }

    /// Look up an entry mutably
    pub fn get_mut(&mut self, age_group: &str, iso3c: &str) -> Option<&mut DatasetEntry> {
        self.entries.get_mut(age_group)?.get_mut(iso3c)
    }

    /// Iterate over all entries
    pub fn entries(&self) -> impl Iterator<Item = &DatasetEntry> {
        self.entries.values().flat_map(|countries| countries.values())
    }

    /// Iterate over all entries mutably
    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut DatasetEntry> {
        self.entries
            .values_mut()
            .flat_map(|countries| countries.values_mut())
    }

    /// Total number of entries
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Whether the dataset has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check key consistency and array lengths of every entry
    pub fn validate(&self, label_count: usize) -> Result<()> {
        for (age_group, countries) in &self.entries {
            for (iso3c, entry) in countries {
                if &entry.age_group != age_group || &entry.iso3c != iso3c {
                    return Err(BaselineError::invalid_input(format!(
                        "entry {}/{} stored under {}/{}",
                        entry.age_group, entry.iso3c, age_group, iso3c
                    )));
                }
                entry.validate(label_count)?;
            }
        }
        Ok(())
    }
}

/// Reject label sequences with duplicates
pub fn validate_labels(labels: &[String]) -> Result<()> {
    let mut seen = HashSet::with_capacity(labels.len());
    for label in labels {
        if !seen.insert(label.as_str()) {
            return Err(BaselineError::invalid_input(format!(
                "duplicate label '{}'",
                label
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_nan_to_missing() {
        let series = normalize_series(&[1.0, f64::NAN, f64::INFINITY, 4.0]);
        assert_eq!(series, vec![Some(1.0), None, None, Some(4.0)]);
    }

    #[test]
    fn test_window_clamp_weekly() {
        // 21 years of weekly labels clamped to a 10-year maximum
        let window = BaselineWindow::new(0, 21 * 52 - 1);
        let clamped = window.clamp_to(520);
        assert_eq!(clamped.start, 0);
        assert_eq!(clamped.end, 519);
        assert_eq!(clamped.len(), 520);
    }

    #[test]
    fn test_window_clamp_noop_when_small() {
        let window = BaselineWindow::new(10, 20);
        assert_eq!(window.clamp_to(520), window);
    }

    #[test]
    fn test_window_try_new_rejects_negative() {
        assert!(BaselineWindow::try_new(-1, 5).is_none());
        assert!(BaselineWindow::try_new(0, -3).is_none());
        assert_eq!(BaselineWindow::try_new(2, 4), Some(BaselineWindow::new(2, 4)));
    }

    #[test]
    fn test_backend_bounds_are_one_indexed() {
        assert_eq!(BaselineWindow::new(0, 2).backend_bounds(), (1, 3));
    }

    #[test]
    fn test_count_present() {
        let series = vec![Some(1.0), None, Some(3.0), Some(4.0)];
        assert_eq!(count_present(&series, BaselineWindow::new(0, 2)), 2);
        assert_eq!(count_present(&series, BaselineWindow::new(0, 9)), 0);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(0.1 + 0.2, 3), 0.3);
    }

    #[test]
    fn test_metric_series_deserialize_fills_derived() {
        let json = r#"{"primary": [1, null, "NA", 4.5]}"#;
        let series: MetricSeries = serde_json::from_str(json).unwrap();
        assert_eq!(series.primary, vec![Some(1.0), None, None, Some(4.5)]);
        assert_eq!(series.baseline, vec![None; 4]);
        assert!(series.validate(4).is_ok());
    }

    #[test]
    fn test_dataset_roundtrip_keys() {
        let mut dataset = Dataset::new();
        dataset.insert(DatasetEntry::new("all", "USA").with_metric(Metric::Deaths, &[1.0, 2.0]));
        dataset.insert(DatasetEntry::new("85+", "USA").with_metric(Metric::Deaths, &[3.0, 4.0]));

        let json = serde_json::to_string(&dataset).unwrap();
        let parsed: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert!(parsed.get("85+", "USA").is_some());
        assert!(parsed.validate(2).is_ok());
    }

    #[test]
    fn test_entry_validate_length_mismatch() {
        let entry = DatasetEntry::new("all", "SWE").with_metric(Metric::Cmr, &[1.0, 2.0, 3.0]);
        assert!(entry.validate(3).is_ok());
        assert!(matches!(entry.validate(4), Err(BaselineError::InvalidInput(_))));
    }

    #[test]
    fn test_validate_labels_duplicates() {
        let labels: Vec<String> = vec!["2020".into(), "2021".into(), "2020".into()];
        assert!(validate_labels(&labels).is_err());
        assert!(validate_labels(&labels[..2]).is_ok());
    }

    #[test]
    fn test_resolution_family_and_serde() {
        let res: SeriesResolution = serde_json::from_str("\"weekly_52w_sma\"").unwrap();
        assert_eq!(res.family(), ResolutionFamily::Weekly);
        assert_eq!(SeriesResolution::Fluseason.family(), ResolutionFamily::Yearly);
        assert_eq!("asmr_who".parse::<Metric>().unwrap(), Metric::AsmrWho);
    }
}
