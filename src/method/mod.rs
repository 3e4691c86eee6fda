// src/method/mod.rs - Automation methods: tab-delimited step lists
//
// Columns, in order:
//
//   locations  outlet-height  inlet-height  pressure  vacuum  voltage  duration  [special]
//
// `locations` is a comma-separated list of well names. Heights, voltage and duration take
// a bare number in mm, V or s, or a number followed by a unit (cm, kV, min).
pub mod units;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::config::ConfigError;
use units::{Quantity, parse_quantity};

/// Fixed vocabulary of the special-command column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialCommand {
    AutoCell,
    Gate,
    Collect,
    ManualCell,
    Sample,
}

impl SpecialCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialCommand::AutoCell => "auto_cell",
            SpecialCommand::Gate => "gate",
            SpecialCommand::Collect => "collect",
            SpecialCommand::ManualCell => "manual_cell",
            SpecialCommand::Sample => "sample",
        }
    }
}

impl fmt::Display for SpecialCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecialCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto_cell" => Ok(SpecialCommand::AutoCell),
            "gate" => Ok(SpecialCommand::Gate),
            "collect" => Ok(SpecialCommand::Collect),
            "manual_cell" => Ok(SpecialCommand::ManualCell),
            "sample" => Ok(SpecialCommand::Sample),
            other => Err(format!("unknown special command '{}'", other)),
        }
    }
}

/// One row of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// 1-based line in the source file.
    pub line: usize,
    pub locations: Vec<String>,
    /// `None` leaves the outlet where it is (mm).
    pub outlet_height: Option<f64>,
    /// `None` keeps the current inlet height for the transfer (mm).
    pub inlet_height: Option<f64>,
    pub pressure: bool,
    pub vacuum: bool,
    /// Volts.
    pub voltage: f64,
    /// Seconds.
    pub duration: f64,
    pub special: Option<SpecialCommand>,
}

impl Step {
    /// Well visited on repetition `rep`; multi-location steps cycle through their list.
    pub fn location_for(&self, rep: usize) -> Option<&str> {
        if self.locations.is_empty() {
            return None;
        }
        Some(self.locations[rep % self.locations.len()].as_str())
    }

    pub fn label(&self) -> String {
        if self.locations.is_empty() {
            format!("line {}", self.line)
        } else {
            format!("line {} ({})", self.line, self.locations.join(","))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: String,
    pub steps: Vec<Step>,
}

impl Method {
    /// Load a method file; the method is named after the file stem.
    pub fn load(path: impl AsRef<Path>) -> Result<Method, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Failed to read method '{}': {}", path.display(), e);
            ConfigError::Io(e)
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let method = Method::parse(&name, &text)?;
        tracing::info!("Loaded method '{}' with {} steps", method.name, method.steps.len());
        Ok(method)
    }

    pub fn parse(name: &str, text: &str) -> Result<Method, ConfigError> {
        let mut steps = Vec::new();
        let mut first_row = true;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let columns: Vec<&str> = line.split('\t').collect();
            let is_first = std::mem::replace(&mut first_row, false);
            if is_first && is_header(&columns) {
                tracing::debug!("{}: skipping header row", name);
                continue;
            }
            steps.push(parse_step(name, line_no, &columns)?);
        }

        Ok(Method {
            name: name.to_string(),
            steps,
        })
    }
}

fn is_header(columns: &[&str]) -> bool {
    columns
        .get(1)
        .map(|field| !field.trim().is_empty() && parse_quantity(field, Quantity::Length).is_err())
        .unwrap_or(false)
}

fn parse_step(origin: &str, line: usize, columns: &[&str]) -> Result<Step, ConfigError> {
    if columns.len() != 7 && columns.len() != 8 {
        return Err(ConfigError::malformed(
            origin,
            line,
            format!("expected 7 or 8 tab-separated columns, found {}", columns.len()),
        ));
    }
    let malformed = |column: &str, e: String| ConfigError::malformed(origin, line, format!("{}: {}", column, e));

    let optional = |field: &str, quantity: Quantity, column: &str| -> Result<Option<f64>, ConfigError> {
        if field.trim().is_empty() {
            return Ok(None);
        }
        parse_quantity(field, quantity)
            .map(Some)
            .map_err(|e| malformed(column, e.to_string()))
    };

    let locations = columns[0]
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    let special = match columns.get(7).map(|f| f.trim()) {
        None | Some("") => None,
        Some(tag) => Some(tag.parse::<SpecialCommand>().map_err(|e| malformed("special", e))?),
    };

    Ok(Step {
        line,
        locations,
        outlet_height: optional(columns[1], Quantity::Length, "outlet height")?,
        inlet_height: optional(columns[2], Quantity::Length, "inlet height")?,
        pressure: parse_bool(columns[3]).map_err(|e| malformed("pressure", e))?,
        vacuum: parse_bool(columns[4]).map_err(|e| malformed("vacuum", e))?,
        voltage: optional(columns[5], Quantity::Voltage, "voltage")?.unwrap_or(0.0),
        duration: optional(columns[6], Quantity::Time, "duration")?.unwrap_or(0.0),
        special,
    })
}

fn parse_bool(field: &str) -> Result<bool, String> {
    match field.trim().to_ascii_lowercase().as_str() {
        "" | "false" | "0" | "no" | "off" => Ok(false),
        "true" | "1" | "yes" | "on" => Ok(true),
        other => Err(format!("'{}' is not a boolean", other)),
    }
}
