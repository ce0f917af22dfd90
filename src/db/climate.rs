use anyhow::{Context, Result};
use rusqlite::{OptionalExtension, Row, params};

use super::{EcoDb, collect, parse_enum};
use crate::emissions::round_to;
use crate::models::*;

const DATA_COLUMNS: &str = "id, data_type, value, unit, location, latitude, longitude, date, \
     source, created_at";

const ALERT_COLUMNS: &str = "id, title, description, alert_type, severity, location, latitude, \
     longitude, start_date, end_date, is_active, source, external_id, created_at";

const STAT_COLUMNS: &str = "id, stat_type, value, unit, period, date, previous_value, \
     change_percentage, created_at";

fn row_to_data(row: &Row<'_>) -> rusqlite::Result<ClimateData> {
    Ok(ClimateData {
        id: row.get(0)?,
        data_type: parse_enum(1, row.get(1)?)?,
        value: row.get(2)?,
        unit: row.get(3)?,
        location: row.get(4)?,
        latitude: row.get(5)?,
        longitude: row.get(6)?,
        date: row.get(7)?,
        source: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_alert(row: &Row<'_>) -> rusqlite::Result<ClimateAlert> {
    Ok(ClimateAlert {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        alert_type: parse_enum(3, row.get(3)?)?,
        severity: parse_enum(4, row.get(4)?)?,
        location: row.get(5)?,
        latitude: row.get(6)?,
        longitude: row.get(7)?,
        start_date: row.get(8)?,
        end_date: row.get(9)?,
        is_active: row.get(10)?,
        source: row.get(11)?,
        external_id: row.get(12)?,
        created_at: row.get(13)?,
    })
}

fn row_to_stat(row: &Row<'_>) -> rusqlite::Result<ClimateStatistic> {
    Ok(ClimateStatistic {
        id: row.get(0)?,
        stat_type: parse_enum(1, row.get(1)?)?,
        value: row.get(2)?,
        unit: row.get(3)?,
        period: row.get(4)?,
        date: row.get(5)?,
        previous_value: row.get(6)?,
        change_percentage: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl EcoDb {
    // ── Data points ───────────────────────────────────────────────────

    /// Insert or overwrite the reading for (data_type, date).
    pub fn upsert_climate_data(
        &self,
        data_type: ClimateDataType,
        value: f64,
        unit: &str,
        date: &str,
        source: &str,
    ) -> Result<ClimateData> {
        self.conn
            .execute(
                "INSERT INTO climate_data (data_type, value, unit, date, source)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(data_type, date) DO UPDATE SET
                    value = excluded.value, unit = excluded.unit, source = excluded.source",
                params![data_type.as_str(), value, unit, date, source],
            )
            .context("Failed to upsert climate data")?;
        self.conn
            .query_row(
                &format!("SELECT {DATA_COLUMNS} FROM climate_data WHERE data_type = ?1 AND date = ?2"),
                params![data_type.as_str(), date],
                row_to_data,
            )
            .context("Climate data not found after upsert")
    }

    pub fn list_climate_data(
        &self,
        data_type: Option<ClimateDataType>,
        limit: i64,
    ) -> Result<Vec<ClimateData>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {DATA_COLUMNS} FROM climate_data
                 WHERE ?1 IS NULL OR data_type = ?1
                 ORDER BY date DESC, id DESC LIMIT ?2"
            ))
            .context("Failed to prepare list_climate_data")?;
        let rows = stmt
            .query_map(params![data_type.map(|t| t.as_str()), limit], row_to_data)
            .context("Failed to query climate data")?;
        collect(rows, "climate data")
    }

    /// Latest value plus min/max/average per data type present.
    pub fn climate_stats(&self) -> Result<Vec<ClimateTypeStats>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT d.data_type,
                    (SELECT l.value FROM climate_data l WHERE l.data_type = d.data_type
                        ORDER BY l.date DESC, l.id DESC LIMIT 1),
                    (SELECT l.unit FROM climate_data l WHERE l.data_type = d.data_type
                        ORDER BY l.date DESC, l.id DESC LIMIT 1),
                    MIN(d.value), MAX(d.value), AVG(d.value), COUNT(*)
                 FROM climate_data d
                 GROUP BY d.data_type ORDER BY d.data_type",
            )
            .context("Failed to prepare climate_stats")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ClimateTypeStats {
                    data_type: parse_enum(0, row.get(0)?)?,
                    latest_value: row.get(1)?,
                    unit: row.get(2)?,
                    min: row.get(3)?,
                    max: row.get(4)?,
                    average: round_to(row.get(5)?, 3),
                    count: row.get(6)?,
                })
            })
            .context("Failed to query climate stats")?;
        collect(rows, "climate stats")
    }

    /// Change between the first and last reading dated on or after `since`.
    pub fn climate_trend(
        &self,
        data_type: ClimateDataType,
        since: &str,
        period_days: i64,
    ) -> Result<ClimateTrend> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT value FROM climate_data WHERE data_type = ?1 AND date >= ?2
                 ORDER BY date, id",
            )
            .context("Failed to prepare climate_trend")?;
        let rows = stmt
            .query_map(params![data_type.as_str(), since], |row| row.get::<_, f64>(0))
            .context("Failed to query climate trend")?;
        let values = collect(rows, "climate trend")?;
        let change = match (values.first(), values.last()) {
            (Some(first), Some(last)) if values.len() >= 2 => round_to(last - first, 3),
            _ => 0.0,
        };
        Ok(ClimateTrend {
            data_type,
            current: values.last().copied(),
            change,
            data_points: values.len() as i64,
            period_days,
        })
    }

    pub fn delete_climate_data_before(&self, date: &str) -> Result<usize> {
        self.conn
            .execute("DELETE FROM climate_data WHERE date < ?1", params![date])
            .context("Failed to clean up climate data")
    }

    // ── Alerts ────────────────────────────────────────────────────────

    /// Create the alert unless one with the same external id already
    /// started on `date`. Returns the alert only when it is new.
    pub fn create_alert_if_new(&self, alert: &NewClimateAlert, date: &str) -> Result<Option<ClimateAlert>> {
        let existing: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM climate_alerts
                 WHERE external_id = ?1 AND substr(start_date, 1, 10) = ?2",
                params![alert.external_id, date],
                |row| row.get(0),
            )
            .context("Failed to check existing alert")?;
        if existing > 0 {
            return Ok(None);
        }
        self.conn
            .execute(
                "INSERT INTO climate_alerts
                    (title, description, alert_type, severity, location, source, external_id,
                     start_date)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8 || substr(datetime('now'), 11))",
                params![
                    alert.title,
                    alert.description,
                    alert.alert_type.as_str(),
                    alert.severity.as_str(),
                    alert.location,
                    alert.source,
                    alert.external_id,
                    date,
                ],
            )
            .context("Failed to insert climate alert")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                &format!("SELECT {ALERT_COLUMNS} FROM climate_alerts WHERE id = ?1"),
                params![id],
                row_to_alert,
            )
            .optional()
            .context("Failed to read climate alert")
    }

    /// Active alerts, most severe first.
    pub fn list_active_alerts(&self) -> Result<Vec<ClimateAlert>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ALERT_COLUMNS} FROM climate_alerts WHERE is_active = 1
                 ORDER BY CASE severity
                    WHEN 'CRITICAL' THEN 0 WHEN 'HIGH' THEN 1
                    WHEN 'MEDIUM' THEN 2 ELSE 3 END,
                 start_date DESC, id DESC"
            ))
            .context("Failed to prepare list_active_alerts")?;
        let rows = stmt
            .query_map([], row_to_alert)
            .context("Failed to query climate alerts")?;
        collect(rows, "climate alert")
    }

    // ── Statistics ────────────────────────────────────────────────────

    /// Store a statistic for (type, period, date), deriving the change from
    /// the most recent earlier reading of the same type and period.
    pub fn upsert_climate_statistic(
        &self,
        stat_type: StatType,
        value: f64,
        unit: &str,
        period: &str,
        date: &str,
    ) -> Result<ClimateStatistic> {
        let previous: Option<f64> = self
            .conn
            .query_row(
                "SELECT value FROM climate_statistics
                 WHERE stat_type = ?1 AND period = ?2 AND date < ?3
                 ORDER BY date DESC LIMIT 1",
                params![stat_type.as_str(), period, date],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query previous statistic")?;
        let change = previous
            .filter(|p| *p != 0.0)
            .map(|p| round_to((value - p) / p * 100.0, 2));
        self.conn
            .execute(
                "INSERT INTO climate_statistics
                    (stat_type, value, unit, period, date, previous_value, change_percentage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(stat_type, period, date) DO UPDATE SET
                    value = excluded.value,
                    unit = excluded.unit,
                    previous_value = excluded.previous_value,
                    change_percentage = excluded.change_percentage",
                params![stat_type.as_str(), value, unit, period, date, previous, change],
            )
            .context("Failed to upsert climate statistic")?;
        self.conn
            .query_row(
                &format!(
                    "SELECT {STAT_COLUMNS} FROM climate_statistics
                     WHERE stat_type = ?1 AND period = ?2 AND date = ?3"
                ),
                params![stat_type.as_str(), period, date],
                row_to_stat,
            )
            .context("Climate statistic not found after upsert")
    }

    pub fn list_climate_statistics(&self, stat_type: Option<StatType>) -> Result<Vec<ClimateStatistic>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {STAT_COLUMNS} FROM climate_statistics
                 WHERE ?1 IS NULL OR stat_type = ?1
                 ORDER BY date DESC, id DESC"
            ))
            .context("Failed to prepare list_climate_statistics")?;
        let rows = stmt
            .query_map(params![stat_type.map(|t| t.as_str())], row_to_stat)
            .context("Failed to query climate statistics")?;
        collect(rows, "climate statistic")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(external_id: &str) -> NewClimateAlert {
        NewClimateAlert {
            title: "High Air Quality Alert".into(),
            description: "Poor air quality".into(),
            alert_type: AlertType::AirQuality,
            severity: AlertSeverity::High,
            location: "Major Cities".into(),
            source: "EcoSphere Monitor".into(),
            external_id: external_id.into(),
        }
    }

    #[test]
    fn test_data_upsert_is_unique_per_day() {
        let db = EcoDb::new_in_memory().unwrap();
        db.upsert_climate_data(ClimateDataType::Co2Levels, 415.0, "ppm", "2024-01-01", "NOAA").unwrap();
        let again = db
            .upsert_climate_data(ClimateDataType::Co2Levels, 416.0, "ppm", "2024-01-01", "NOAA")
            .unwrap();
        assert_eq!(again.value, 416.0);
        assert_eq!(db.list_climate_data(None, 100).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_and_trend() {
        let db = EcoDb::new_in_memory().unwrap();
        for (i, v) in [415.0, 416.0, 418.0].iter().enumerate() {
            let date = format!("2024-0{}-01", i + 1);
            db.upsert_climate_data(ClimateDataType::Co2Levels, *v, "ppm", &date, "NOAA").unwrap();
        }
        db.upsert_climate_data(ClimateDataType::SeaLevel, 100.0, "mm", "2024-01-01", "NASA").unwrap();

        let stats = db.climate_stats().unwrap();
        let co2 = stats.iter().find(|s| s.data_type == ClimateDataType::Co2Levels).unwrap();
        assert_eq!(co2.latest_value, 418.0);
        assert_eq!(co2.min, 415.0);
        assert_eq!(co2.max, 418.0);
        assert_eq!(co2.count, 3);

        let trend = db.climate_trend(ClimateDataType::Co2Levels, "2024-02-01", 60).unwrap();
        assert_eq!(trend.data_points, 2);
        assert_eq!(trend.change, 2.0);
        assert_eq!(trend.current, Some(418.0));

        let flat = db.climate_trend(ClimateDataType::SeaLevel, "2024-01-01", 30).unwrap();
        assert_eq!(flat.change, 0.0);

        assert_eq!(db.delete_climate_data_before("2024-02-15").unwrap(), 3);
    }

    #[test]
    fn test_alerts_dedupe_per_day_and_sort() {
        let db = EcoDb::new_in_memory().unwrap();
        assert!(db.create_alert_if_new(&alert("aq"), "2024-06-01").unwrap().is_some());
        assert!(db.create_alert_if_new(&alert("aq"), "2024-06-01").unwrap().is_none());
        assert!(db.create_alert_if_new(&alert("aq"), "2024-06-02").unwrap().is_some());
        let mut critical = alert("storm");
        critical.severity = AlertSeverity::Critical;
        db.create_alert_if_new(&critical, "2024-05-01").unwrap();
        let active = db.list_active_alerts().unwrap();
        assert_eq!(active.len(), 3);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_statistic_tracks_previous_value() {
        let db = EcoDb::new_in_memory().unwrap();
        let first = db
            .upsert_climate_statistic(StatType::GlobalCo2, 400.0, "ppm", "daily", "2024-06-01")
            .unwrap();
        assert_eq!(first.previous_value, None);
        let second = db
            .upsert_climate_statistic(StatType::GlobalCo2, 410.0, "ppm", "daily", "2024-06-02")
            .unwrap();
        assert_eq!(second.previous_value, Some(400.0));
        assert_eq!(second.change_percentage, Some(2.5));
        assert_eq!(db.list_climate_statistics(Some(StatType::GlobalCo2)).unwrap().len(), 2);
        assert!(db.list_climate_statistics(Some(StatType::GlobalTemp)).unwrap().is_empty());
    }
}
