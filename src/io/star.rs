//! STAR-format plaintext tables: the metadata interchange format of the
//! downstream refinement tools. Reading handles one `loop_` table; writing
//! emits a fixed column format per label with a header comment.

use anyhow::{bail, Context};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Render format of one output column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StarFormat {
    Str,
    Int,
    /// Fixed width and precision, e.g. `Fixed(8, 3)` renders `%8.3f`.
    Fixed(usize, usize),
}

/// One cell of a STAR table row.
#[derive(Debug, Clone, PartialEq)]
pub enum StarValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl StarValue {
    fn render(&self, format: StarFormat) -> String {
        match (self, format) {
            (StarValue::Str(s), _) => s.clone(),
            (StarValue::Int(v), _) => format!("{}", v),
            (StarValue::Float(v), StarFormat::Fixed(width, prec)) => {
                format!("{:>width$.prec$}", v, width = width, prec = prec)
            }
            (StarValue::Float(v), StarFormat::Int) => format!("{}", v.round() as i64),
            (StarValue::Float(v), StarFormat::Str) => format!("{}", v),
        }
    }
}

/// Reads the rows of the named table (`data_<name>`) as label -> string
/// maps. Comments and blank lines are skipped; the row list ends at the
/// next `data_` block or end of file.
pub fn read_table<P: AsRef<Path>>(
    path: P,
    table_name: &str,
) -> anyhow::Result<Vec<HashMap<String, String>>> {
    let file = File::open(&path)
        .with_context(|| format!("failed to open star file {:?}", path.as_ref()))?;
    let reader = BufReader::new(file);

    let wanted = format!("data_{}", table_name);
    let mut in_table = false;
    let mut in_loop = false;
    let mut labels: Vec<String> = Vec::new();
    let mut rows = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if trimmed.starts_with("data_") {
            if in_table {
                break;
            }
            in_table = trimmed == wanted;
            continue;
        }
        if !in_table {
            continue;
        }
        if trimmed == "loop_" {
            in_loop = true;
            labels.clear();
            continue;
        }
        if !in_loop {
            continue;
        }
        if let Some(label) = trimmed.strip_prefix('_') {
            let name = label.split_whitespace().next().unwrap_or("");
            labels.push(name.to_string());
            continue;
        }
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != labels.len() {
            bail!(
                "star file {:?}: row has {} fields but {} labels are declared",
                path.as_ref(),
                fields.len(),
                labels.len()
            );
        }
        let row = labels
            .iter()
            .cloned()
            .zip(fields.iter().map(|f| f.to_string()))
            .collect();
        rows.push(row);
    }

    if !in_table && rows.is_empty() {
        bail!(
            "star file {:?} contains no `{}` table",
            path.as_ref(),
            wanted
        );
    }
    Ok(rows)
}

/// Writes one `loop_` table. The destination directory is created when it
/// does not exist yet; other I/O failures propagate.
pub fn write_table<P: AsRef<Path>>(
    path: P,
    labels: &[(String, StarFormat)],
    rows: &[Vec<StarValue>],
    table_name: &str,
    comment: &str,
) -> anyhow::Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("could not create output directory {:?}", parent))?;
        }
    }
    let file = File::create(&path)
        .with_context(|| format!("failed to create star file {:?}", path.as_ref()))?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "# {}", comment)?;
    writeln!(writer)?;
    writeln!(writer, "data_{}", table_name)?;
    writeln!(writer)?;
    writeln!(writer, "loop_")?;
    for (i, (label, _)) in labels.iter().enumerate() {
        writeln!(writer, "_{} #{}", label, i + 1)?;
    }
    for row in rows {
        let rendered: Vec<String> = row
            .iter()
            .zip(labels.iter())
            .map(|(value, (_, format))| value.render(*format))
            .collect();
        writeln!(writer, "{}", rendered.join(" "))?;
    }
    writer.flush()?;
    Ok(())
}
