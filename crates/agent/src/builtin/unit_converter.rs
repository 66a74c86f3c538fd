use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{number_arg, number_value, string_arg};
use crate::tools::{Tool, ToolErrorKind, ToolOutcome};

const TEMPERATURE_UNITS: &[&str] = &["celsius", "fahrenheit", "kelvin"];
/// Meters per unit.
const LENGTH_FACTORS: &[(&str, f64)] =
    &[("meter", 1.0), ("kilometer", 1000.0), ("mile", 1609.34), ("foot", 0.3048), ("inch", 0.0254)];
/// Kilograms per unit.
const WEIGHT_FACTORS: &[(&str, f64)] =
    &[("kilogram", 1.0), ("gram", 0.001), ("pound", 0.453592), ("ounce", 0.0283495)];

pub struct UnitConverter;

impl UnitConverter {
    pub fn convert(value: f64, from_unit: &str, to_unit: &str) -> Option<f64> {
        if TEMPERATURE_UNITS.contains(&from_unit) && TEMPERATURE_UNITS.contains(&to_unit) {
            return Some(convert_temperature(value, from_unit, to_unit));
        }
        convert_scaled(LENGTH_FACTORS, value, from_unit, to_unit)
            .or_else(|| convert_scaled(WEIGHT_FACTORS, value, from_unit, to_unit))
    }

    fn evaluate(arguments: &Map<String, Value>) -> Result<ToolOutcome, ToolOutcome> {
        let value = number_arg(arguments, "value")?;
        let from_unit = string_arg(arguments, "from_unit")?.trim().to_ascii_lowercase();
        let to_unit = string_arg(arguments, "to_unit")?.trim().to_ascii_lowercase();

        let Some(result) = Self::convert(value, &from_unit, &to_unit) else {
            return Ok(ToolOutcome::error(
                ToolErrorKind::UnsupportedConversion,
                format!(
                    "Unsupported conversion from {from_unit} to {to_unit}. Supported: temperature \
                     (celsius/fahrenheit/kelvin), length (meter/kilometer/mile/foot/inch), \
                     weight (kilogram/gram/pound/ounce)"
                ),
            ));
        };

        Ok(ToolOutcome::success(json!({
            "value": number_value(value),
            "from_unit": from_unit,
            "to_unit": to_unit,
            "result": number_value(round4(result)),
        })))
    }
}

fn convert_temperature(value: f64, from_unit: &str, to_unit: &str) -> f64 {
    let celsius = match from_unit {
        "fahrenheit" => (value - 32.0) * 5.0 / 9.0,
        "kelvin" => value - 273.15,
        _ => value,
    };
    match to_unit {
        "fahrenheit" => celsius * 9.0 / 5.0 + 32.0,
        "kelvin" => celsius + 273.15,
        _ => celsius,
    }
}

fn convert_scaled(factors: &[(&str, f64)], value: f64, from_unit: &str, to_unit: &str) -> Option<f64> {
    let factor = |unit: &str| factors.iter().find(|(name, _)| *name == unit).map(|(_, f)| *f);
    Some(value * factor(from_unit)? / factor(to_unit)?)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[async_trait]
impl Tool for UnitConverter {
    fn name(&self) -> &'static str {
        "unit_converter"
    }

    fn description(&self) -> &'static str {
        "Convert between units of measurement. Temperature: celsius, fahrenheit, kelvin. \
         Length: meter, kilometer, mile, foot, inch. Weight: kilogram, gram, pound, ounce."
    }

    fn short_description(&self) -> &'static str {
        "Convert between different units of measurement."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "value": {"type": "number", "description": "Value to convert"},
                "from_unit": {"type": "string", "description": "Source unit, e.g. celsius"},
                "to_unit": {"type": "string", "description": "Target unit, e.g. fahrenheit"}
            },
            "required": ["value", "from_unit", "to_unit"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolOutcome {
        Self::evaluate(arguments).unwrap_or_else(|error| error)
    }
}
