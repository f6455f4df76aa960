//! Minimal line-oriented datacard reader.
//!
//! Recovers the structure the writer emits: header counts, `shapes` lines,
//! observation, the process columns and the systematic rows. Everything
//! after the systematics (rateParam, autoMCStats, ...) is kept verbatim.

use std::path::Path;

use cf_core::{Error, Result};

/// One `shapes` line.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapesLine {
    /// Process (or `data_obs`, or `*`)
    pub process: String,
    /// Channel
    pub channel: String,
    /// Histogram file
    pub file: String,
    /// Nominal histogram name
    pub nominal: String,
    /// Systematic template, if given
    pub systematic: Option<String>,
}

/// One process column of the rate table.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessColumn {
    /// Channel (bin) label
    pub bin: String,
    /// Process name
    pub name: String,
    /// Process id
    pub id: i32,
    /// Rate, `-1` when taken from the shape
    pub rate: f64,
}

/// One systematic row.
#[derive(Debug, Clone, PartialEq)]
pub struct SystematicRow {
    /// Nuisance name
    pub name: String,
    /// Row type (`shape`, `lnN`, ...)
    pub kind: String,
    /// One cell per process column
    pub cells: Vec<String>,
}

/// Parsed datacard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDatacard {
    /// `imax`
    pub imax: Option<String>,
    /// `jmax`
    pub jmax: Option<String>,
    /// `kmax`
    pub kmax: Option<String>,
    /// `shapes` lines
    pub shapes: Vec<ShapesLine>,
    /// Bins of the observation block
    pub bins: Vec<String>,
    /// Observation per bin
    pub observation: Vec<String>,
    /// Process columns
    pub processes: Vec<ProcessColumn>,
    /// Systematic rows
    pub systematics: Vec<SystematicRow>,
    /// Remaining directives, tokens joined by single spaces
    pub directives: Vec<String>,
}

const ROW_KINDS: &[&str] = &["shape", "shapeN", "shape?", "lnN", "lnU", "gmN", "param"];

impl ParsedDatacard {
    /// Read and parse a card file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Parse card text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut card = ParsedDatacard::default();
        let mut bin_rows: Vec<Vec<String>> = Vec::new();
        let mut process_rows: Vec<Vec<String>> = Vec::new();
        let mut rate_row: Option<Vec<String>> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with("---") {
                continue;
            }
            let tokens: Vec<String> = line.split_whitespace().map(String::from).collect();
            let rest = || tokens[1..].to_vec();
            match tokens[0].as_str() {
                "imax" => card.imax = tokens.get(1).cloned(),
                "jmax" => card.jmax = tokens.get(1).cloned(),
                "kmax" => card.kmax = tokens.get(1).cloned(),
                "shapes" => {
                    if tokens.len() < 5 {
                        return Err(Error::Parse(format!(
                            "line {}: shapes line needs at least 4 fields",
                            lineno + 1
                        )));
                    }
                    card.shapes.push(ShapesLine {
                        process: tokens[1].clone(),
                        channel: tokens[2].clone(),
                        file: tokens[3].clone(),
                        nominal: tokens[4].clone(),
                        systematic: tokens.get(5).cloned(),
                    });
                }
                "bin" => bin_rows.push(rest()),
                "observation" => card.observation = rest(),
                "process" => process_rows.push(rest()),
                "rate" => rate_row = Some(rest()),
                _ if tokens.len() >= 2 && ROW_KINDS.contains(&tokens[1].as_str()) => {
                    card.systematics.push(SystematicRow {
                        name: tokens[0].clone(),
                        kind: tokens[1].clone(),
                        cells: tokens[2..].to_vec(),
                    });
                }
                _ => card.directives.push(tokens.join(" ")),
            }
        }

        // First `bin` row belongs to the observation block, the second to the table.
        let mut bin_rows = bin_rows.into_iter();
        card.bins = bin_rows.next().unwrap_or_default();
        let column_bins = bin_rows.next().unwrap_or_default();

        if process_rows.len() != 2 {
            return Err(Error::Parse(format!(
                "expected two 'process' rows, found {}",
                process_rows.len()
            )));
        }
        // Either order is legal: the row that parses as integers holds the ids.
        let (names, ids) = if process_rows[1].iter().all(|t| t.parse::<i32>().is_ok()) {
            (&process_rows[0], &process_rows[1])
        } else {
            (&process_rows[1], &process_rows[0])
        };
        let rates = rate_row.ok_or_else(|| Error::Parse("missing 'rate' row".into()))?;

        let n = names.len();
        if ids.len() != n || rates.len() != n || column_bins.len() != n {
            return Err(Error::Parse(format!(
                "column count mismatch: bin={} process={} id={} rate={}",
                column_bins.len(),
                n,
                ids.len(),
                rates.len()
            )));
        }
        for i in 0..n {
            card.processes.push(ProcessColumn {
                bin: column_bins[i].clone(),
                name: names[i].clone(),
                id: ids[i]
                    .parse()
                    .map_err(|_| Error::Parse(format!("bad process id '{}'", ids[i])))?,
                rate: rates[i]
                    .parse()
                    .map_err(|_| Error::Parse(format!("bad rate '{}'", rates[i])))?,
            });
        }
        for syst in &card.systematics {
            if syst.kind != "param" && syst.cells.len() != n {
                return Err(Error::Parse(format!(
                    "systematic '{}' has {} cells for {} processes",
                    syst.name,
                    syst.cells.len(),
                    n
                )));
            }
        }
        Ok(card)
    }

    /// Directives whose second token is `rateParam`.
    pub fn rate_params(&self) -> impl Iterator<Item = &str> {
        self.directives
            .iter()
            .filter(|d| d.split_whitespace().nth(1) == Some("rateParam"))
            .map(String::as_str)
    }
}
