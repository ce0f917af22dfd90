//! Canned climate figures: headline statistics, synthetic monthly
//! history and the built-in alert feed.

use chrono::{Datelike, Months, NaiveDate};
use serde::Serialize;

use crate::models::{AlertSeverity, AlertType, NewClimateAlert, StatType};
use crate::emissions::round_to;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimateSnapshot {
    pub global_co2: f64,
    pub global_temp_anomaly: f64,
    pub arctic_ice_extent: f64,
    pub sea_level_rise: f64,
}

pub fn fetch_climate_statistics() -> ClimateSnapshot {
    ClimateSnapshot {
        global_co2: 420.5,
        global_temp_anomaly: 1.2,
        arctic_ice_extent: 4.2,
        sea_level_rise: 3.4,
    }
}

impl ClimateSnapshot {
    /// The daily statistics rows this snapshot feeds: (type, value, unit).
    pub fn statistics(&self) -> [(StatType, f64, &'static str); 4] {
        [
            (StatType::GlobalCo2, self.global_co2, "ppm"),
            (StatType::GlobalTemp, self.global_temp_anomaly, "°C"),
            (StatType::ArcticIceExtent, self.arctic_ice_extent, "M km²"),
            (StatType::SeaLevelRise, self.sea_level_rise, "mm/year"),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoricalPoint {
    pub date: String,
    pub value: f64,
    pub unit: &'static str,
}

pub const MAX_HISTORY_MONTHS: u32 = 60;

/// Synthetic monthly series starting January 2024. `months` is clamped to
/// 1..=60.
pub fn historical_trends(data_type: &str, months: u32) -> Vec<HistoricalPoint> {
    let months = months.clamp(1, MAX_HISTORY_MONTHS);
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default();
    (0..months)
        .map(|i| {
            let n = i as f64;
            let (value, unit) = match data_type {
                "co2" => (415.0 + n * 0.5 + (i % 3) as f64 * 0.2, "ppm"),
                "temperature" => (0.8 + n * 0.05 + (i % 4) as f64 * 0.1, "°C"),
                _ => (100.0 + n * 2.0 + (i % 5) as f64, "mm"),
            };
            let date = start
                .checked_add_months(Months::new(i))
                .unwrap_or(start);
            HistoricalPoint {
                date: format!("{:04}-{:02}-01", date.year(), date.month()),
                value: round_to(value, 2),
                unit,
            }
        })
        .collect()
}

/// Alert conditions currently in effect. The external id is stable so a
/// condition is stored once per day.
pub fn builtin_alerts() -> Vec<NewClimateAlert> {
    vec![NewClimateAlert {
        title: "High Air Quality Alert".into(),
        description: "Air quality index has reached unhealthy levels in your area. Consider limiting outdoor activities.".into(),
        alert_type: AlertType::AirQuality,
        severity: AlertSeverity::High,
        location: "Major Cities".into(),
        source: "EcoSphere Monitoring".into(),
        external_id: "air-quality-major-cities".into(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_values() {
        let s = fetch_climate_statistics();
        assert_eq!(s.global_co2, 420.5);
        assert_eq!(s.statistics()[3], (StatType::SeaLevelRise, 3.4, "mm/year"));
    }

    #[test]
    fn test_co2_series() {
        let series = historical_trends("co2", 4);
        let values: Vec<f64> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![415.0, 415.7, 416.4, 416.5]);
        assert_eq!(series[0].date, "2024-01-01");
        assert_eq!(series[0].unit, "ppm");
    }

    #[test]
    fn test_temperature_and_other_series() {
        let t = historical_trends("temperature", 2);
        assert_eq!(t[1].value, 0.95);
        assert_eq!(t[1].unit, "°C");
        let o = historical_trends("rainfall", 6);
        assert_eq!(o[5].value, 110.0);
        assert_eq!(o[5].unit, "mm");
    }

    #[test]
    fn test_months_are_clamped_and_dates_roll_over() {
        assert_eq!(historical_trends("co2", 0).len(), 1);
        let long = historical_trends("co2", 500);
        assert_eq!(long.len(), 60);
        assert_eq!(long[12].date, "2025-01-01");
        assert_eq!(long[59].date, "2028-12-01");
    }

    #[test]
    fn test_builtin_alert() {
        let alerts = builtin_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].alert_type, AlertType::AirQuality);
        assert_eq!(alerts[0].severity, AlertSeverity::High);
    }
}
