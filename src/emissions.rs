//! Emission factors for the tracked activity subcategories.

use crate::models::Subcategory;

/// kg CO2e emitted per unit of activity, together with the unit itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissionFactor {
    pub kg_per_unit: f64,
    pub unit: &'static str,
}

pub fn factor_for(subcategory: Subcategory) -> EmissionFactor {
    let (kg_per_unit, unit) = match subcategory {
        Subcategory::Electricity => (0.4, "kWh"),
        Subcategory::Water => (0.0003, "liters"),
        Subcategory::NaturalGas => (0.2, "cubic meters"),
        Subcategory::Waste => (0.5, "kg"),
        Subcategory::Car => (0.2, "km"),
        Subcategory::Motorcycle => (0.1, "km"),
        Subcategory::PublicTransit => (0.05, "km"),
        Subcategory::Flight => (0.285, "km"),
    };
    EmissionFactor { kg_per_unit, unit }
}

/// CO2 for `value` units of the given activity, rounded to grams.
pub fn calculate_co2(subcategory: Subcategory, value: f64) -> f64 {
    round_to(value * factor_for(subcategory).kg_per_unit, 3)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
