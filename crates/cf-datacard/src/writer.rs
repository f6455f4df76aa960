//! ModelCollection → datacard text.
//!
//! The consumer tokenizes on whitespace but matches rows and columns by
//! position, so every table is written column-major aligned: each cell is
//! left-justified and padded to the widest cell of its column plus two
//! spaces.

use std::path::{Path, PathBuf};

use cf_core::{Error, Histogram, HistogramSink, HistogramSource, Result};

use crate::model::{ModelCollection, format_number};

const SEPARATOR_WIDTH: usize = 80;
const COLUMN_GAP: usize = 2;

/// Writer knobs.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Write nominal yields in the `rate` row; `false` writes `-1` (taken from the shapes).
    pub write_rates: bool,
    /// Threshold of the trailing `autoMCStats` directive.
    pub auto_mc_stats_threshold: f64,
    /// Card file name prefix, followed by the channel name and `.txt`.
    pub card_prefix: String,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self { write_rates: true, auto_mc_stats_threshold: 10.0, card_prefix: "datacard_".into() }
    }
}

/// Serializes finalized [`ModelCollection`]s.
pub struct DatacardWriter<'a> {
    options: WriterOptions,
    histograms: Option<(&'a dyn HistogramSource, &'a dyn HistogramSink)>,
}

impl<'a> DatacardWriter<'a> {
    /// Writer that references the collection's own histogram file.
    pub fn new(options: WriterOptions) -> Self {
        Self { options, histograms: None }
    }

    /// Also copy the referenced histograms from `source` into a channel-local
    /// file written by `sink`, and point the `shapes` lines at that file.
    pub fn with_histograms(
        mut self,
        source: &'a dyn HistogramSource,
        sink: &'a dyn HistogramSink,
    ) -> Self {
        self.histograms = Some((source, sink));
        self
    }

    /// Options in use.
    pub fn options(&self) -> &WriterOptions {
        &self.options
    }

    /// Path the card for `channel` is written to inside `output_dir`.
    pub fn card_path(&self, output_dir: &Path, channel: &str) -> PathBuf {
        output_dir.join(format!("{}{}.txt", self.options.card_prefix, channel))
    }

    /// Write the datacard (and optionally the reduced histogram file).
    pub fn write(&self, collection: &ModelCollection, output_dir: &Path) -> Result<PathBuf> {
        check_writable(collection)?;
        std::fs::create_dir_all(output_dir)?;

        let shapes_file = match self.histograms {
            Some((source, sink)) => {
                let hists = referenced_histograms(collection, source)?;
                sink.write(output_dir, collection.channel(), &hists)?;
                sink.file_name(collection.channel())
            }
            None => collection.histogram_file().display().to_string(),
        };

        let text = self.render(collection, &shapes_file)?;
        let path = self.card_path(output_dir, collection.channel());
        std::fs::write(&path, text)?;
        log::info!("wrote datacard {}", path.display());
        Ok(path)
    }

    /// Render the card text, with `shapes` lines pointing at `shapes_file`.
    pub fn render(&self, collection: &ModelCollection, shapes_file: &str) -> Result<String> {
        check_writable(collection)?;
        let channel = collection.channel();
        let processes = collection.processes();
        let separator = "-".repeat(SEPARATOR_WIDTH);

        let mut out: Vec<String> = vec![
            "imax 1".to_string(),
            format!("jmax {}", processes.len() - 1),
            "kmax *".to_string(),
            separator.clone(),
        ];

        let mut shapes: Vec<Vec<String>> = processes
            .iter()
            .map(|p| {
                vec![
                    "shapes".to_string(),
                    p.name.clone(),
                    channel.to_string(),
                    shapes_file.to_string(),
                    p.histogram.clone(),
                    format!("{}_$SYSTEMATIC", p.histogram),
                ]
            })
            .collect();
        shapes.push(vec![
            "shapes".to_string(),
            "data_obs".to_string(),
            channel.to_string(),
            shapes_file.to_string(),
            collection.data_histogram().to_string(),
        ]);
        out.extend(align_columns(&shapes));
        out.push(separator.clone());

        let observation = collection.data_yield().map(format_number).unwrap_or_else(|| "-1".into());
        out.extend(align_columns(&[
            vec!["bin".to_string(), channel.to_string()],
            vec!["observation".to_string(), observation],
        ]));
        out.push(separator.clone());

        let mut table: Vec<Vec<String>> = vec![
            row("bin", processes.iter().map(|_| channel.to_string())),
            row("process", processes.iter().map(|p| p.name.clone())),
            row("process", processes.iter().map(|p| p.id.to_string())),
            row(
                "rate",
                processes.iter().map(|p| {
                    if self.options.write_rates { format_number(p.nominal_yield) } else { "-1".into() }
                }),
            ),
        ];
        let n_header_rows = table.len();
        for (systematics, tag) in
            [(collection.shape_systematics(), "shape"), (collection.norm_systematics(), "lnN")]
        {
            for syst in systematics {
                // Completeness is guaranteed by finalize(); a gap here would shift columns.
                let cells = processes
                    .iter()
                    .map(|p| {
                        p.impact(syst).map(|i| i.cell()).ok_or_else(|| {
                            Error::IncompleteImpactMatrix {
                                process: p.name.clone(),
                                systematic: syst.clone(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                table.push(row(&format!("{syst} {tag}"), cells));
            }
        }
        let aligned = align_columns(&table);
        out.extend(aligned[..n_header_rows].iter().cloned());
        if aligned.len() > n_header_rows {
            out.push(separator.clone());
            out.extend(aligned[n_header_rows..].iter().cloned());
        }
        out.push(separator);

        for rp in collection.rate_params() {
            out.push(format!(
                "{} rateParam {} {} {} [{},{}]",
                rp.parameter_name(),
                channel,
                rp.process,
                format_number(rp.prior),
                format_number(rp.range.0),
                format_number(rp.range.1)
            ));
        }
        if let Some(pair) = collection.ratio_pair() {
            let name = pair.parameter_name();
            for process in [&pair.numerator, &pair.denominator] {
                out.push(format!("{name} rateParam {channel} {process} 1 [0,3]"));
            }
        }
        out.push(format!(
            "{} autoMCStats {}",
            channel,
            format_number(self.options.auto_mc_stats_threshold)
        ));

        let mut text = out.join("\n");
        text.push('\n');
        Ok(text)
    }
}

fn row(label: &str, cells: impl IntoIterator<Item = String>) -> Vec<String> {
    std::iter::once(label.to_string()).chain(cells).collect()
}

fn check_writable(collection: &ModelCollection) -> Result<()> {
    if !collection.is_finalized() {
        return Err(Error::NotFinalized(collection.channel().to_string()));
    }
    collection.check_ratio_pair()
}

/// Histograms a card for `collection` needs: data, each nominal, and the
/// Up/Down pair of every shape impact.
fn referenced_histograms(
    collection: &ModelCollection,
    source: &dyn HistogramSource,
) -> Result<Vec<Histogram>> {
    let mut names = vec![collection.data_histogram().to_string()];
    for p in collection.processes() {
        names.push(p.histogram.clone());
        for syst in collection.shape_systematics() {
            if p.impact(syst).is_some_and(|i| i.kind().is_some()) {
                names.push(p.variation_histogram(syst, "Up"));
                names.push(p.variation_histogram(syst, "Down"));
            }
        }
    }
    names
        .iter()
        .map(|name| {
            source.histogram(name)?.ok_or_else(|| Error::MissingHistogram {
                name: name.clone(),
                source_name: source.describe(),
            })
        })
        .collect()
}

/// Pad every cell to its column width + gap. Rows may be ragged.
pub fn align_columns(rows: &[Vec<String>]) -> Vec<String> {
    let n_cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..n_cols)
        .map(|j| rows.iter().filter_map(|r| r.get(j)).map(String::len).max().unwrap_or(0))
        .collect();
    rows.iter()
        .map(|r| {
            r.iter()
                .enumerate()
                .map(|(j, cell)| format!("{:<w$}", cell, w = widths[j] + COLUMN_GAP))
                .collect::<String>()
        })
        .collect()
}
