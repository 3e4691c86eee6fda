// src/method/units.rs - Numbers with optional units in method files
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum UnitError {
    #[error("'{0}' is not a number")]
    InvalidNumber(String),
    #[error("unknown {quantity} unit '{unit}'")]
    UnknownUnit { quantity: &'static str, unit: String },
}

/// Physical quantity of a method column, with its base unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    /// Millimetres.
    Length,
    /// Volts.
    Voltage,
    /// Seconds.
    Time,
}

impl Quantity {
    fn name(self) -> &'static str {
        match self {
            Quantity::Length => "length",
            Quantity::Voltage => "voltage",
            Quantity::Time => "time",
        }
    }

    /// Multiplier to the base unit, `None` for an unknown unit.
    fn factor(self, unit: &str) -> Option<f64> {
        let unit = unit.to_ascii_lowercase();
        match (self, unit.as_str()) {
            (_, "") => Some(1.0),
            (Quantity::Length, "mm") => Some(1.0),
            (Quantity::Length, "cm") => Some(10.0),
            (Quantity::Voltage, "v") => Some(1.0),
            (Quantity::Voltage, "kv") => Some(1000.0),
            (Quantity::Time, "s") => Some(1.0),
            (Quantity::Time, "min") => Some(60.0),
            _ => None,
        }
    }
}

/// Parse `"12"`, `"1.2 cm"` or `"1.2cm"` into the base unit of `quantity`.
pub fn parse_quantity(field: &str, quantity: Quantity) -> Result<f64, UnitError> {
    let field = field.trim();
    let split = field
        .find(|c: char| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
        .unwrap_or(field.len());
    let (number, unit) = field.split_at(split);
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| UnitError::InvalidNumber(field.to_string()))?;
    let factor = quantity
        .factor(unit.trim())
        .ok_or_else(|| UnitError::UnknownUnit {
            quantity: quantity.name(),
            unit: unit.trim().to_string(),
        })?;
    Ok(value * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_numbers_use_base_unit() {
        assert_eq!(parse_quantity("12.5", Quantity::Length), Ok(12.5));
        assert_eq!(parse_quantity(" -3 ", Quantity::Voltage), Ok(-3.0));
        assert_eq!(parse_quantity("1e3", Quantity::Time), Ok(1000.0));
    }

    #[test]
    fn test_unit_multipliers() {
        assert_eq!(parse_quantity("1.5 cm", Quantity::Length), Ok(15.0));
        assert_eq!(parse_quantity("2 mm", Quantity::Length), Ok(2.0));
        assert_eq!(parse_quantity("15 kV", Quantity::Voltage), Ok(15_000.0));
        assert_eq!(parse_quantity("300V", Quantity::Voltage), Ok(300.0));
        assert_eq!(parse_quantity("2 min", Quantity::Time), Ok(120.0));
        assert_eq!(parse_quantity("45 s", Quantity::Time), Ok(45.0));
    }

    #[test]
    fn test_rejects_unknown_units_and_text() {
        assert!(matches!(
            parse_quantity("3 kV", Quantity::Length),
            Err(UnitError::UnknownUnit { quantity: "length", .. })
        ));
        assert!(matches!(
            parse_quantity("Outlet", Quantity::Length),
            Err(UnitError::InvalidNumber(_))
        ));
        assert!(parse_quantity("", Quantity::Time).is_err());
    }
}
