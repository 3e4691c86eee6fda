// src/template/parser.rs - Template description files
//
// A description has three sections. Fields are separated by whitespace; a comma joins
// the numbers of one field, with or without spaces around it.
//
//   [dimensions]
//   0 0 120 80                          lower-x lower-y upper-x upper-y
//   [wells]
//   buffer  circle     4      10,10     name kind size x,y
//   [ledges]
//   wall    rectangle  20,100 50,50  10 name kind size x,y height
//
// `#` starts a comment. Circles take a radius, rectangles `width,height`.

use std::path::Path;

use crate::config::ConfigError;
use crate::template::{Bounds, Shape, Template};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Dimensions,
    Wells,
    Ledges,
}

impl Template {
    /// Read and parse a template description file.
    pub fn load(path: impl AsRef<Path>) -> Result<Template, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!("Failed to read template '{}': {}", path.display(), e);
            ConfigError::Io(e)
        })?;
        let template = Template::parse(&path.display().to_string(), &text)?;
        tracing::info!(
            "Loaded template '{}': {} wells, {} ledges",
            path.display(),
            template.wells().count(),
            template.ledges().count()
        );
        Ok(template)
    }

    /// Parse a description. `origin` names the source in error messages.
    ///
    /// Nothing is returned unless the whole description is valid.
    pub fn parse(origin: &str, text: &str) -> Result<Template, ConfigError> {
        let mut section = None;
        let mut seen = [false; 3];
        let mut bounds = None;
        let mut template = Template::default();

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') {
                let name = line
                    .strip_prefix('[')
                    .and_then(|l| l.strip_suffix(']'))
                    .map(|l| l.trim().to_ascii_lowercase())
                    .ok_or_else(|| ConfigError::malformed(origin, line_no, "unterminated section header"))?;
                let next = match name.as_str() {
                    "dimensions" => Section::Dimensions,
                    "wells" => Section::Wells,
                    "ledges" => Section::Ledges,
                    other => {
                        return Err(ConfigError::malformed(
                            origin,
                            line_no,
                            format!("unknown section '{}'", other),
                        ));
                    }
                };
                seen[next as usize] = true;
                section = Some(next);
                continue;
            }

            let fields = tokenize(line);
            match section {
                None => {
                    return Err(ConfigError::malformed(origin, line_no, "entry before any section"));
                }
                Some(Section::Dimensions) => {
                    if bounds.is_some() {
                        return Err(ConfigError::malformed(origin, line_no, "dimensions given twice"));
                    }
                    let values = numbers(&fields.join(","), origin, line_no)?;
                    if values.len() != 4 {
                        return Err(ConfigError::malformed(
                            origin,
                            line_no,
                            format!("dimensions need 4 values, found {}", values.len()),
                        ));
                    }
                    bounds = Some(Bounds::new(values[0], values[1], values[2], values[3]));
                }
                Some(Section::Wells) => {
                    if fields.len() != 4 {
                        return Err(ConfigError::malformed(
                            origin,
                            line_no,
                            format!("well needs 4 fields (name kind size x,y), found {}", fields.len()),
                        ));
                    }
                    let shape = shape(&fields[1], &fields[2], &fields[3], origin, line_no)?;
                    template.insert_well(&fields[0], shape);
                }
                Some(Section::Ledges) => {
                    if fields.len() != 5 {
                        return Err(ConfigError::malformed(
                            origin,
                            line_no,
                            format!(
                                "ledge needs 5 fields (name kind size x,y height), found {}",
                                fields.len()
                            ),
                        ));
                    }
                    let shape = shape(&fields[1], &fields[2], &fields[3], origin, line_no)?;
                    let height = number(&fields[4], origin, line_no)?;
                    template
                        .insert_ledge(&fields[0], shape, height)
                        .map_err(|e| ConfigError::malformed(origin, line_no, e.to_string()))?;
                }
            }
        }

        let last_line = text.lines().count();
        for (section, name) in [
            (Section::Dimensions, "dimensions"),
            (Section::Wells, "wells"),
            (Section::Ledges, "ledges"),
        ] {
            if !seen[section as usize] {
                return Err(ConfigError::malformed(
                    origin,
                    last_line,
                    format!("missing [{}] section", name),
                ));
            }
        }
        template.bounds = bounds
            .ok_or_else(|| ConfigError::malformed(origin, last_line, "[dimensions] section is empty"))?;
        Ok(template)
    }
}

/// Split on whitespace, then glue tokens back together around commas so that
/// `20, 100` and `20 ,100` both read as the single field `20,100`.
fn tokenize(line: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    let mut joining = false;
    for token in line.split_whitespace() {
        match fields.last_mut() {
            Some(last) if joining || token.starts_with(',') => last.push_str(token),
            _ => fields.push(token.to_string()),
        }
        joining = token.ends_with(',');
    }
    fields
}

fn number(field: &str, origin: &str, line: usize) -> Result<f64, ConfigError> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| ConfigError::malformed(origin, line, format!("'{}' is not a number", field)))
}

fn numbers(field: &str, origin: &str, line: usize) -> Result<Vec<f64>, ConfigError> {
    field
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| number(part, origin, line))
        .collect()
}

fn shape(kind: &str, size: &str, xy: &str, origin: &str, line: usize) -> Result<Shape, ConfigError> {
    let center = numbers(xy, origin, line)?;
    let [x, y] = center[..] else {
        return Err(ConfigError::malformed(
            origin,
            line,
            format!("position '{}' must be x,y", xy),
        ));
    };
    let size = numbers(size, origin, line)?;
    match (kind.to_ascii_lowercase().as_str(), &size[..]) {
        ("circle", [radius]) => Ok(Shape::circle(x, y, *radius)),
        ("rectangle", [width, height]) => Ok(Shape::rectangle(x, y, *width, *height)),
        ("circle", _) => Err(ConfigError::malformed(origin, line, "circle size is a single radius")),
        ("rectangle", _) => Err(ConfigError::malformed(
            origin,
            line,
            "rectangle size is width,height",
        )),
        (other, _) => Err(ConfigError::malformed(
            origin,
            line,
            format!("unknown shape '{}'", other),
        )),
    }
}
