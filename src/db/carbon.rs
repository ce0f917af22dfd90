use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::{OptionalExtension, Row, params};

use super::{EcoDb, collect, parse_enum};
use crate::emissions;
use crate::errors::EcoError;
use crate::models::*;

/// Yearly per-capita reference figures, kg CO2.
pub const NATIONAL_AVERAGE_KG: f64 = 4000.0;
pub const GLOBAL_AVERAGE_KG: f64 = 5000.0;

const ENTRY_COLUMNS: &str = "id, user_id, category, subcategory, value, unit, co2_calculated, \
     date, notes, created_at, updated_at";

const GOAL_COLUMNS: &str = "id, user_id, title, description, target_reduction, \
     current_reduction, start_date, end_date, is_active, created_at";

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<CarbonEntry> {
    Ok(CarbonEntry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: parse_enum(2, row.get(2)?)?,
        subcategory: parse_enum(3, row.get(3)?)?,
        value: row.get(4)?,
        unit: row.get(5)?,
        co2_calculated: row.get(6)?,
        date: row.get(7)?,
        notes: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_goal(row: &Row<'_>) -> rusqlite::Result<CarbonGoal> {
    let target: f64 = row.get(4)?;
    let current: f64 = row.get(5)?;
    Ok(CarbonGoal {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        target_reduction: target,
        current_reduction: current,
        start_date: row.get(6)?,
        end_date: row.get(7)?,
        is_active: row.get(8)?,
        progress_percentage: progress_percentage(current, target),
        created_at: row.get(9)?,
    })
}

impl EcoDb {
    // ── Carbon entries ────────────────────────────────────────────────

    pub fn create_carbon_entry(&self, user_id: i64, entry: &NewCarbonEntry) -> Result<CarbonEntry> {
        let co2 = emissions::calculate_co2(entry.subcategory, entry.value);
        self.conn
            .execute(
                "INSERT INTO carbon_entries
                    (user_id, category, subcategory, value, unit, co2_calculated, date, notes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    user_id,
                    entry.category.as_str(),
                    entry.subcategory.as_str(),
                    entry.value,
                    entry.unit,
                    co2,
                    entry.date,
                    entry.notes,
                ],
            )
            .context("Failed to insert carbon entry")?;
        let id = self.conn.last_insert_rowid();
        self.get_carbon_entry(user_id, id)?
            .context("Carbon entry not found after insert")
    }

    pub fn get_carbon_entry(&self, user_id: i64, id: i64) -> Result<Option<CarbonEntry>> {
        self.conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM carbon_entries WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                row_to_entry,
            )
            .optional()
            .context("Failed to query carbon entry")
    }

    /// The user's entries, newest first, narrowed by the optional filter.
    pub fn list_carbon_entries(
        &self,
        user_id: i64,
        filter: &CarbonEntryFilter,
    ) -> Result<Vec<CarbonEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM carbon_entries
                 WHERE user_id = ?1
                   AND (?2 IS NULL OR date >= ?2)
                   AND (?3 IS NULL OR date <= ?3)
                   AND (?4 IS NULL OR category = ?4)
                 ORDER BY date DESC, created_at DESC, id DESC"
            ))
            .context("Failed to prepare list_carbon_entries")?;
        let rows = stmt
            .query_map(
                params![
                    user_id,
                    filter.start_date,
                    filter.end_date,
                    filter.category.map(|c| c.as_str()),
                ],
                row_to_entry,
            )
            .context("Failed to query carbon entries")?;
        collect(rows, "carbon entry")
    }

    pub fn update_carbon_entry(
        &self,
        user_id: i64,
        id: i64,
        entry: &NewCarbonEntry,
    ) -> Result<CarbonEntry> {
        let co2 = emissions::calculate_co2(entry.subcategory, entry.value);
        let changed = self
            .conn
            .execute(
                "UPDATE carbon_entries SET
                    category = ?3, subcategory = ?4, value = ?5, unit = ?6,
                    co2_calculated = ?7, date = ?8, notes = ?9, updated_at = datetime('now')
                 WHERE id = ?1 AND user_id = ?2",
                params![
                    id,
                    user_id,
                    entry.category.as_str(),
                    entry.subcategory.as_str(),
                    entry.value,
                    entry.unit,
                    co2,
                    entry.date,
                    entry.notes,
                ],
            )
            .context("Failed to update carbon entry")?;
        if changed == 0 {
            return Err(EcoError::not_found("Carbon entry", id).into());
        }
        self.get_carbon_entry(user_id, id)?
            .context("Carbon entry not found after update")
    }

    pub fn delete_carbon_entry(&self, user_id: i64, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM carbon_entries WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete carbon entry")?;
        Ok(changed > 0)
    }

    /// (entry count, total kg CO2) over all of the user's entries.
    pub fn carbon_totals(&self, user_id: i64) -> Result<(i64, f64)> {
        self.conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(co2_calculated), 0)
                 FROM carbon_entries WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to compute carbon totals")
    }

    /// Sum and count of entries created since `since` (a timestamp).
    pub fn carbon_created_since(&self, user_id: i64, since: &str) -> Result<(i64, f64)> {
        self.conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(co2_calculated), 0)
                 FROM carbon_entries WHERE user_id = ?1 AND created_at >= ?2",
                params![user_id, since],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to compute recent carbon totals")
    }

    fn carbon_sum_for_prefix(&self, user_id: i64, prefix: &str, category: Option<&str>) -> Result<f64> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(co2_calculated), 0) FROM carbon_entries
                 WHERE user_id = ?1 AND substr(date, 1, length(?2)) = ?2
                   AND (?3 IS NULL OR category = ?3)",
                params![user_id, prefix, category],
                |row| row.get(0),
            )
            .context("Failed to sum carbon entries")
    }

    pub fn carbon_summary(
        &self,
        user_id: i64,
        year: i32,
        month: u32,
        today: NaiveDate,
    ) -> Result<CarbonSummary> {
        let year_prefix = format!("{:04}", year);
        let month_prefix = format!("{:04}-{:02}", year, month);
        let monthly_total = self.carbon_sum_for_prefix(user_id, &month_prefix, None)?;
        let yearly_total = self.carbon_sum_for_prefix(user_id, &year_prefix, None)?;
        let (total_entries, _) = self.carbon_totals(user_id)?;

        let thirty_days_ago = (today - Duration::days(30)).format("%Y-%m-%d").to_string();
        let average_daily: f64 = self
            .conn
            .query_row(
                "SELECT COALESCE(AVG(co2_calculated), 0) FROM carbon_entries
                 WHERE user_id = ?1 AND date >= ?2",
                params![user_id, thirty_days_ago],
                |row| row.get(0),
            )
            .context("Failed to average recent carbon entries")?;

        let mut category_breakdown = BTreeMap::new();
        for category in CarbonCategory::ALL {
            let total =
                self.carbon_sum_for_prefix(user_id, &year_prefix, Some(category.as_str()))?;
            category_breakdown.insert(category.as_str().to_string(), total);
        }

        Ok(CarbonSummary {
            monthly_total: emissions::round_to(monthly_total, 3),
            yearly_total: emissions::round_to(yearly_total, 3),
            total_entries,
            average_daily: emissions::round_to(average_daily, 3),
            category_breakdown,
        })
    }

    pub fn carbon_comparison(&self, user_id: i64, today: NaiveDate) -> Result<CarbonComparison> {
        let year = today.year();
        let user_average: f64 = self
            .conn
            .query_row(
                "SELECT COALESCE(AVG(co2_calculated), 0) FROM carbon_entries
                 WHERE user_id = ?1 AND substr(date, 1, 4) = ?2",
                params![user_id, format!("{:04}", year)],
                |row| row.get(0),
            )
            .context("Failed to average carbon entries")?;

        let mut comparison_data = Vec::with_capacity(12);
        for month in 1..=12u32 {
            let total =
                self.carbon_sum_for_prefix(user_id, &format!("{:04}-{:02}", year, month), None)?;
            comparison_data.push(MonthComparison {
                month,
                user: emissions::round_to(total, 3),
                national: NATIONAL_AVERAGE_KG / 12.0,
                global: GLOBAL_AVERAGE_KG / 12.0,
            });
        }

        let reduction = (NATIONAL_AVERAGE_KG - user_average) / NATIONAL_AVERAGE_KG * 100.0;
        Ok(CarbonComparison {
            user_average: emissions::round_to(user_average, 3),
            national_average: NATIONAL_AVERAGE_KG,
            global_average: GLOBAL_AVERAGE_KG,
            reduction_percentage: emissions::round_to(reduction.max(0.0), 2),
            comparison_data,
        })
    }

    // ── Carbon goals ──────────────────────────────────────────────────

    pub fn create_carbon_goal(&self, user_id: i64, goal: &NewCarbonGoal) -> Result<CarbonGoal> {
        self.conn
            .execute(
                "INSERT INTO carbon_goals
                    (user_id, title, description, target_reduction, start_date, end_date, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    user_id,
                    goal.title,
                    goal.description,
                    goal.target_reduction,
                    goal.start_date,
                    goal.end_date,
                    goal.is_active,
                ],
            )
            .context("Failed to insert carbon goal")?;
        let id = self.conn.last_insert_rowid();
        self.get_carbon_goal(user_id, id)?
            .context("Carbon goal not found after insert")
    }

    pub fn get_carbon_goal(&self, user_id: i64, id: i64) -> Result<Option<CarbonGoal>> {
        self.conn
            .query_row(
                &format!("SELECT {GOAL_COLUMNS} FROM carbon_goals WHERE id = ?1 AND user_id = ?2"),
                params![id, user_id],
                row_to_goal,
            )
            .optional()
            .context("Failed to query carbon goal")
    }

    pub fn list_carbon_goals(&self, user_id: i64) -> Result<Vec<CarbonGoal>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {GOAL_COLUMNS} FROM carbon_goals WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC"
            ))
            .context("Failed to prepare list_carbon_goals")?;
        let rows = stmt
            .query_map(params![user_id], row_to_goal)
            .context("Failed to query carbon goals")?;
        collect(rows, "carbon goal")
    }

    pub fn update_carbon_goal(&self, user_id: i64, id: i64, goal: &NewCarbonGoal) -> Result<CarbonGoal> {
        let changed = self
            .conn
            .execute(
                "UPDATE carbon_goals SET
                    title = ?3, description = ?4, target_reduction = ?5,
                    start_date = ?6, end_date = ?7, is_active = ?8
                 WHERE id = ?1 AND user_id = ?2",
                params![
                    id,
                    user_id,
                    goal.title,
                    goal.description,
                    goal.target_reduction,
                    goal.start_date,
                    goal.end_date,
                    goal.is_active,
                ],
            )
            .context("Failed to update carbon goal")?;
        if changed == 0 {
            return Err(EcoError::not_found("Carbon goal", id).into());
        }
        self.get_carbon_goal(user_id, id)?
            .context("Carbon goal not found after update")
    }

    pub fn delete_carbon_goal(&self, user_id: i64, id: i64) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "DELETE FROM carbon_goals WHERE id = ?1 AND user_id = ?2",
                params![id, user_id],
            )
            .context("Failed to delete carbon goal")?;
        Ok(changed > 0)
    }
}
