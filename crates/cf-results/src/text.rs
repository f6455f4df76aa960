//! Flat-text fit logs.
//!
//! The fit tool prints one line per POI:
//!
//! ```text
//!    r_TTWplus :    +1.051   -0.212/+0.236 (68%)
//! ```
//!
//! Correlations never appear in the text output.

use std::path::Path;

use cf_core::{Error, FitResult, PoiEstimate, Result};

/// Which POI lines a text parse must find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoiSelection {
    /// Accept every POI line; at least one is required
    Auto,
    /// Exactly these POIs, each on one line
    Named(Vec<String>),
}

impl PoiSelection {
    /// Selection for an explicit POI list.
    pub fn named<I, S>(pois: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PoiSelection::Named(pois.into_iter().map(Into::into).collect())
    }

    /// `"auto"` or a comma-separated list.
    pub fn parse(s: &str) -> Self {
        if s.trim() == "auto" {
            PoiSelection::Auto
        } else {
            Self::named(s.split(',').map(str::trim).filter(|p| !p.is_empty()))
        }
    }

    fn accepts(&self, poi: &str) -> bool {
        match self {
            PoiSelection::Auto => true,
            PoiSelection::Named(list) => list.iter().any(|p| p == poi),
        }
    }
}

/// Parse one `<poi> : <central> -<down>/+<up> (68%)` line.
pub fn parse_poi_line(line: &str) -> Option<(String, PoiEstimate)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.len() < 5 || tokens[1] != ":" || tokens[4] != "(68%)" {
        return None;
    }
    let central: f64 = tokens[2].parse().ok()?;
    let (down, up) = tokens[3].split_once('/')?;
    if !down.starts_with('-') || !up.starts_with('+') {
        return None;
    }
    let down: f64 = down.parse().ok()?;
    let up: f64 = up.parse().ok()?;
    Some((tokens[0].to_string(), PoiEstimate::new(central, down, up)))
}

/// Collect POI estimates from a fit log.
///
/// With [`PoiSelection::Named`], the number of matching lines must equal the
/// number of requested POIs. `origin` names the log in errors.
pub fn parse_fit_log(text: &str, origin: &str, selection: &PoiSelection) -> Result<FitResult> {
    let mut result = FitResult::new();
    let mut found = 0usize;
    for (poi, estimate) in text.lines().filter_map(parse_poi_line) {
        if selection.accepts(&poi) {
            found += 1;
            result.insert(poi, estimate);
        }
    }

    let expected = match selection {
        PoiSelection::Auto if found >= 1 => return Ok(result),
        PoiSelection::Auto => 1,
        PoiSelection::Named(list) => list.len(),
    };
    if found != expected || result.len() != expected {
        return Err(Error::ParseCountMismatch { path: origin.to_string(), expected, found });
    }
    Ok(result)
}

/// [`parse_fit_log`] on a file.
pub fn read_fit_log(path: &Path, selection: &PoiSelection) -> Result<FitResult> {
    let text = std::fs::read_to_string(path)?;
    parse_fit_log(&text, &path.display().to_string(), selection)
}

fn value_after(text: &str, origin: &str, marker: &str) -> Result<f64> {
    let value = text
        .lines()
        .rev()
        .find_map(|l| l.trim().strip_prefix(marker))
        .ok_or_else(|| Error::Parse(format!("{origin}: no '{marker}' line")))?;
    let token = value.split_whitespace().next().unwrap_or_default();
    token.parse().map_err(|_| Error::Parse(format!("{origin}: bad value '{token}' after '{marker}'")))
}

/// Discovery significance from a `Significance: <z>` line (last one wins).
pub fn parse_significance(text: &str, origin: &str) -> Result<f64> {
    value_after(text, origin, "Significance:")
}

/// Goodness-of-fit statistic from a `Best fit test statistic: <t>` line.
pub fn parse_gof_statistic(text: &str, origin: &str) -> Result<f64> {
    value_after(text, origin, "Best fit test statistic:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LOG: &str = "\
 <<< Combine >>>
>>> method used is MultiDimFit

 --- MultiDimFit ---
best fit parameter values and profile-likelihood uncertainties:
   r_TTWplus :    +1.051   -0.212/+0.236 (68%)
  r_TTWminus :    +0.930   -0.301/+0.344 (68%)
Done in 0.42 min (cpu), 0.43 min (real)
";

    #[test]
    fn test_line() {
        let (poi, e) = parse_poi_line("   r :    +1.000   -0.412/+0.482 (68%)").unwrap();
        assert_eq!(poi, "r");
        assert_relative_eq!(e.central, 1.0);
        assert_relative_eq!(e.err_down, 0.412);
        assert_relative_eq!(e.err_up, 0.482);
        assert!(parse_poi_line("r : 1.0 0.4 (68%)").is_none());
        assert!(parse_poi_line("Done in 0.42 min (cpu)").is_none());
    }

    #[test]
    fn test_named_selection() {
        let sel = PoiSelection::named(["r_TTWplus", "r_TTWminus"]);
        let result = parse_fit_log(LOG, "log.txt", &sel).unwrap();
        assert_eq!(result.poi_names, vec!["r_TTWplus", "r_TTWminus"]);
        assert!(result.correlation.is_none());
        assert_relative_eq!(result.get("r_TTWminus").unwrap().err_up, 0.344);
    }

    #[test]
    fn test_count_mismatch() {
        let sel = PoiSelection::named(["r_TTWplus", "r_TTWminus", "r_TTZ"]);
        match parse_fit_log(LOG, "log.txt", &sel) {
            Err(Error::ParseCountMismatch { path, expected, found }) => {
                assert_eq!(path, "log.txt");
                assert_eq!((expected, found), (3, 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_auto_selection() {
        assert_eq!(parse_fit_log(LOG, "log.txt", &PoiSelection::Auto).unwrap().len(), 2);
        let err = parse_fit_log("nothing here", "empty.txt", &PoiSelection::Auto).unwrap_err();
        assert!(err.is_parse());
        assert_eq!(PoiSelection::parse("auto"), PoiSelection::Auto);
        assert_eq!(PoiSelection::parse("r_a, r_b"), PoiSelection::named(["r_a", "r_b"]));
    }

    #[test]
    fn test_significance_and_gof() {
        let sig = " -- Significance -- \nSignificance: 3.217\nDone in 0.01 min\n";
        assert_relative_eq!(parse_significance(sig, "s").unwrap(), 3.217);
        assert!(parse_significance("Significance: n/a", "s").is_err());

        let gof = "--- GoodnessOfFit ---\nBest fit test statistic: 41.5\n";
        assert_relative_eq!(parse_gof_statistic(gof, "g").unwrap(), 41.5);
        assert!(parse_gof_statistic(sig, "g").is_err());
    }
}
