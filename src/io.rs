//! On-disk formats.
//!
//! * Activation tables and correlation tables: plain CSV with a header row,
//!   comma separated, no quoting (pandas `to_csv` output of numeric frames).
//! * Results: JSON via `serde_json`.
//! * Recorded activations: safetensors (F32 / I32), written by [`StWriter`].
use anyhow::{bail, Context, Result};
use ndarray::{Array2, ArrayD, IxDyn};
use std::collections::HashMap;
use std::path::Path;

use crate::results::ResultsRecord;
use crate::table::{ActivationTable, LabeledMatrix};

// ── CSV ───────────────────────────────────────────────────────────────────────

fn split_csv_line(line: &str) -> Vec<&str> {
    line.split(',').map(|c| c.trim().trim_matches('"')).collect()
}

enum Role {
    Subject,
    Label,
    Tick,
    Feature,
    Skip,
}

fn column_role(name: &str) -> Role {
    match name.to_lowercase().as_str() {
        "subject" => Role::Subject,
        "y" => Role::Label,
        "tr" | "timepoint" => Role::Tick,
        "" => Role::Skip,
        n if n.starts_with("unnamed") => Role::Skip,
        _ => Role::Feature,
    }
}

impl ActivationTable {
    /// Load an activation table from CSV.
    ///
    /// Recognised columns: `Subject` (optional), `y` (label), `tr` or
    /// `timepoint` (tick, may be stored as float).  An empty or `Unnamed: 0`
    /// header marks an index column and is skipped.  Every other column is a
    /// numeric feature.
    pub fn load_csv(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading activation table {}", path.display()))?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().context("activation table has no header")?;
        let roles: Vec<Role> = split_csv_line(header).into_iter().map(column_role).collect();
        let feature_names: Vec<String> = split_csv_line(header)
            .into_iter()
            .zip(&roles)
            .filter(|(_, r)| matches!(r, Role::Feature))
            .map(|(n, _)| n.to_string())
            .collect();
        if !roles.iter().any(|r| matches!(r, Role::Label)) {
            bail!("{}: missing label column 'y'", path.display());
        }
        if !roles.iter().any(|r| matches!(r, Role::Tick)) {
            bail!("{}: missing tick column 'tr' / 'timepoint'", path.display());
        }

        let (mut subjects, mut labels, mut ticks, mut values) = (vec![], vec![], vec![], vec![]);
        for (line_no, line) in lines.enumerate() {
            let cells = split_csv_line(line);
            if cells.len() != roles.len() {
                bail!(
                    "{}: row {} has {} cells, header has {}",
                    path.display(), line_no + 2, cells.len(), roles.len()
                );
            }
            let mut subject = String::new();
            for (cell, role) in cells.iter().zip(&roles) {
                match role {
                    Role::Subject => subject = cell.to_string(),
                    Role::Label => labels.push(cell.to_string()),
                    Role::Tick => {
                        let t: f64 = cell
                            .parse()
                            .with_context(|| format!("row {}: bad tick '{cell}'", line_no + 2))?;
                        ticks.push(t as i64);
                    }
                    Role::Feature => values.push(
                        cell.parse::<f64>()
                            .with_context(|| format!("row {}: bad value '{cell}'", line_no + 2))?,
                    ),
                    Role::Skip => {}
                }
            }
            subjects.push(subject);
        }

        let features = Array2::from_shape_vec((ticks.len(), feature_names.len()), values)?;
        Ok(ActivationTable::with_subjects(subjects, labels, ticks, features, feature_names)?)
    }
}

impl LabeledMatrix {
    /// Write as CSV with row labels in the first column.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        use std::fmt::Write as _;
        let mut out = String::new();
        writeln!(out, ",{}", self.col_labels.join(","))?;
        for (label, row) in self.row_labels.iter().zip(self.data.rows()) {
            out.push_str(label);
            for v in row {
                write!(out, ",{v}")?;
            }
            out.push('\n');
        }
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))
    }

    /// Read a table written by [`LabeledMatrix::write_csv`] (or pandas with
    /// `index_col=0`).
    pub fn read_csv(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let header = lines.next().context("labeled matrix has no header")?;
        let col_labels: Vec<String> = split_csv_line(header)[1..].iter().map(|s| s.to_string()).collect();
        let mut row_labels = Vec::new();
        let mut values = Vec::new();
        for line in lines {
            let cells = split_csv_line(line);
            if cells.len() != col_labels.len() + 1 {
                bail!("{}: row '{}' has {} values, expected {}",
                    path.display(), cells[0], cells.len() - 1, col_labels.len());
            }
            row_labels.push(cells[0].to_string());
            for c in &cells[1..] {
                values.push(c.parse::<f64>().with_context(|| format!("bad value '{c}'"))?);
            }
        }
        let data = Array2::from_shape_vec((row_labels.len(), col_labels.len()), values)?;
        Ok(LabeledMatrix::new(row_labels, col_labels, data)?)
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Persist a results record as pretty-printed JSON.
pub fn save_results(record: &ResultsRecord, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let f = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(f), record)?;
    Ok(())
}

pub fn load_results(path: &Path) -> Result<ResultsRecord> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&bytes).context("parsing results record")
}

// ── Safetensors ───────────────────────────────────────────────────────────────

/// Element type of a stored tensor; activations are F32, labels and lengths I32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dtype {
    F32,
    I32,
}

impl Dtype {
    fn tag(self) -> &'static str {
        match self {
            Dtype::F32 => "F32",
            Dtype::I32 => "I32",
        }
    }
}

struct Tensor {
    name: String,
    dtype: Dtype,
    shape: Vec<usize>,
    bytes: Vec<u8>,
}

/// Minimal safetensors writer for recorded activations.
///
/// Tensors are laid out in insertion order; the JSON header is padded with
/// spaces to a multiple of 8 bytes so the data block stays aligned.
///
/// ```rust,no_run
/// use cliprest::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f32("logits", &[0.1f32, 0.9], &[1, 1, 2]);
/// w.write(Path::new("/tmp/acts.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    tensors: Vec<Tensor>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: &str, dtype: Dtype, shape: &[usize], bytes: Vec<u8>) {
        self.tensors.push(Tensor { name: name.to_string(), dtype, shape: shape.to_vec(), bytes });
    }

    pub fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        self.push(name, Dtype::F32, shape, data.iter().flat_map(|v| v.to_le_bytes()).collect());
    }

    /// Any-dimensional `f32` array, written in logical (row-major) order.
    pub fn add_array<D: ndarray::Dimension>(&mut self, name: &str, arr: &ndarray::Array<f32, D>) {
        let data: Vec<f32> = arr.iter().copied().collect();
        self.add_f32(name, &data, arr.shape());
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        self.push(name, Dtype::I32, shape, data.iter().flat_map(|v| v.to_le_bytes()).collect());
    }

    /// JSON header with each tensor's byte range in the data block, padded to 8 bytes.
    fn header(&self) -> Result<Vec<u8>> {
        let mut entries = serde_json::Map::new();
        entries.insert("__metadata__".into(), serde_json::json!({ "format": "cliprest" }));
        let mut start = 0usize;
        for t in &self.tensors {
            let end = start + t.bytes.len();
            entries.insert(
                t.name.clone(),
                serde_json::json!({ "dtype": t.dtype.tag(), "shape": t.shape, "data_offsets": [start, end] }),
            );
            start = end;
        }
        let mut header = serde_json::to_vec(&entries).context("encoding safetensors header")?;
        header.resize(header.len().next_multiple_of(8), b' ');
        Ok(header)
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let header = self.header()?;
        let data_len: usize = self.tensors.iter().map(|t| t.bytes.len()).sum();
        let mut out = Vec::with_capacity(8 + header.len() + data_len);
        out.extend_from_slice(&(header.len() as u64).to_le_bytes());
        out.extend_from_slice(&header);
        for t in &self.tensors {
            out.extend_from_slice(&t.bytes);
        }
        std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))
    }
}

/// Read every F32 tensor from a safetensors file.
pub fn load_f32_tensors(path: &Path) -> Result<HashMap<String, ArrayD<f32>>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() < 8 {
        bail!("safetensors file too small");
    }
    let n = u64::from_le_bytes(bytes[..8].try_into()?) as usize;
    let header: HashMap<String, serde_json::Value> = serde_json::from_slice(
        bytes.get(8..8 + n).context("truncated safetensors header")?,
    )
    .context("failed to parse safetensors header")?;
    let data_start = 8 + n;

    let mut out = HashMap::new();
    for (key, entry) in &header {
        if key == "__metadata__" || entry["dtype"].as_str() != Some("F32") {
            continue;
        }
        let offsets = entry["data_offsets"].as_array().context("missing data_offsets")?;
        let s = offsets.first().and_then(|v| v.as_u64()).context("bad offset")? as usize;
        let e = offsets.get(1).and_then(|v| v.as_u64()).context("bad offset")? as usize;
        let raw = bytes
            .get(data_start + s..data_start + e)
            .with_context(|| format!("tensor '{key}' out of bounds"))?;
        let shape: Vec<usize> = entry["shape"]
            .as_array()
            .context("missing shape")?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize).context("bad shape"))
            .collect::<Result<_>>()?;
        let floats: Vec<f32> = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        out.insert(key.clone(), ArrayD::from_shape_vec(IxDyn(&shape), floats)?);
    }
    Ok(out)
}
