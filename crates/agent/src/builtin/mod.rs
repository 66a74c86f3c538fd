//! Reference tool implementations shipped with the binary.

use std::path::PathBuf;

use serde_json::{Map, Number, Value};

use crate::tools::{ToolErrorKind, ToolOutcome, ToolRegistry};

pub mod calculator;
pub mod datetime;
pub mod file_operations;
pub mod unit_converter;

pub use calculator::Calculator;
pub use datetime::{CurrentTime, DateCalculator};
pub use file_operations::FileOperations;
pub use unit_converter::UnitConverter;

pub fn default_registry(workspace_dir: impl Into<PathBuf>) -> ToolRegistry {
    let mut registry = ToolRegistry::default();
    registry.register(Calculator);
    registry.register(UnitConverter);
    registry.register(CurrentTime);
    registry.register(DateCalculator);
    registry.register(FileOperations::new(workspace_dir));
    registry
}

fn number_arg(arguments: &Map<String, Value>, key: &str) -> Result<f64, ToolOutcome> {
    let value = arguments.get(key).ok_or_else(|| missing(key))?;
    match value {
        Value::Number(number) => number.as_f64().ok_or_else(|| invalid(key, "a finite number")),
        Value::String(text) => text.trim().parse::<f64>().map_err(|_| invalid(key, "a number")),
        _ => Err(invalid(key, "a number")),
    }
}

fn string_arg<'a>(arguments: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolOutcome> {
    arguments
        .get(key)
        .ok_or_else(|| missing(key))?
        .as_str()
        .ok_or_else(|| invalid(key, "a string"))
}

fn missing(key: &str) -> ToolOutcome {
    ToolOutcome::error(ToolErrorKind::InvalidArguments, format!("Missing required argument '{key}'"))
}

fn invalid(key: &str, expected: &str) -> ToolOutcome {
    ToolOutcome::error(ToolErrorKind::InvalidArguments, format!("Argument '{key}' must be {expected}"))
}

/// Integral results render as integers so `10 + 5` reads as `15`, not `15.0`.
fn number_value(value: f64) -> Value {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::Number(Number::from(value as i64))
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{default_registry, number_value};

    #[test]
    fn integral_numbers_render_without_fraction() {
        assert_eq!(number_value(15.0), json!(15));
        assert_eq!(number_value(2.5), json!(2.5));
        assert_eq!(number_value(f64::NAN), json!(null));
    }

    #[test]
    fn default_registry_exposes_builtin_catalog() {
        let catalog = default_registry("workspace").catalog();
        let names = catalog.specs().iter().map(|spec| spec.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["calculator", "unit_converter", "get_current_time", "date_calculator", "file_operations"]);
    }
}
