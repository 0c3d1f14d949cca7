use std::{
    collections::BTreeSet,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Column names assigned to every headerless input file, in file order.
pub const COLUMNS: [&str; 5] = [
    "sepal length",
    "sepal width",
    "petal length",
    "petal width",
    LABEL_COLUMN,
];

pub const LABEL_COLUMN: &str = "label";

/// The columns that make up the feature table. The label is always last.
pub const FEATURE_COLUMNS: [&str; 4] = [COLUMNS[0], COLUMNS[1], COLUMNS[2], COLUMNS[3]];

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to open {}: {source}", path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("malformed csv in {source_name}: {source}")]
    Csv {
        source_name: String,
        source: csv::Error,
    },
    #[error("{source_name} line {line}: expected {} columns, found {found}", COLUMNS.len())]
    ColumnCount {
        source_name: String,
        line: u64,
        found: usize,
    },
    #[error("{source_name} line {line}: column '{column}' is not a number: {value:?}")]
    InvalidNumber {
        source_name: String,
        line: u64,
        column: &'static str,
        value: String,
    },
    #[error("{source_name} line {line}: label {label:?} is not one of the known classes")]
    UnknownLabel {
        source_name: String,
        line: u64,
        label: String,
    },
}

/// Maps label strings to dense class codes.
///
/// Codes are ranks in the lexicographically sorted set of distinct labels, so
/// two encodings built from the same label set are always identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct LabelEncoding {
    classes: Vec<String>,
}

impl LabelEncoding {
    pub fn fit<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = labels
            .into_iter()
            .map(|label| label.as_ref().to_string())
            .collect();

        LabelEncoding {
            classes: distinct.into_iter().collect(),
        }
    }

    pub fn encode(&self, label: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|class| class.as_str().cmp(label))
            .ok()
    }

    pub fn decode(&self, code: usize) -> Option<&str> {
        self.classes.get(code).map(String::as_str)
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl From<Vec<String>> for LabelEncoding {
    fn from(classes: Vec<String>) -> Self {
        LabelEncoding::fit(classes)
    }
}

impl From<LabelEncoding> for Vec<String> {
    fn from(encoding: LabelEncoding) -> Self {
        encoding.classes
    }
}

/// A loaded split: the feature table, its class codes and the encoding that
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub features: Array2<f64>,
    pub targets: Vec<usize>,
    pub encoding: LabelEncoding,
}

impl Dataset {
    /// Loads a headerless five-column csv file, deriving the label encoding
    /// from the labels present in the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let file = open(path)?;
        Self::from_reader(file, &path.display().to_string())
    }

    /// Loads a headerless five-column csv file, coding labels with an
    /// encoding built elsewhere (typically the one stored with a model).
    pub fn load_with_encoding<P: AsRef<Path>>(
        path: P,
        encoding: &LabelEncoding,
    ) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let file = open(path)?;
        Self::from_reader_with_encoding(file, &path.display().to_string(), encoding)
    }

    pub fn from_reader<R: Read>(reader: R, source_name: &str) -> Result<Self, DatasetError> {
        let (features, labels) = read_rows(reader, source_name)?;
        let encoding = LabelEncoding::fit(labels.iter().map(|(_, label)| label));

        // Every label is in the encoding by construction:
        let targets = labels
            .iter()
            .filter_map(|(_, label)| encoding.encode(label))
            .collect();

        Ok(Dataset {
            features,
            targets,
            encoding,
        })
    }

    pub fn from_reader_with_encoding<R: Read>(
        reader: R,
        source_name: &str,
        encoding: &LabelEncoding,
    ) -> Result<Self, DatasetError> {
        let (features, labels) = read_rows(reader, source_name)?;

        let targets = labels
            .iter()
            .map(|(line, label)| {
                encoding
                    .encode(label)
                    .ok_or_else(|| DatasetError::UnknownLabel {
                        source_name: source_name.to_string(),
                        line: *line,
                        label: label.clone(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let own = LabelEncoding::fit(labels.iter().map(|(_, label)| label));
        if own.len() != encoding.len() {
            warn!(
                "{source_name}: contains {} of the {} known classes",
                own.len(),
                encoding.len()
            );
        }

        Ok(Dataset {
            features,
            targets,
            encoding: encoding.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }
}

fn open(path: &Path) -> Result<File, DatasetError> {
    File::open(path).map_err(|source| DatasetError::Open {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses every record into a feature row plus its raw label, keeping the
/// line number around for error reporting.
fn read_rows<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<(Array2<f64>, Vec<(u64, String)>), DatasetError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut labels = Vec::new();
    let mut record = StringRecord::new();
    loop {
        let more = reader
            .read_record(&mut record)
            .map_err(|source| DatasetError::Csv {
                source_name: source_name.to_string(),
                source,
            })?;
        if !more {
            break;
        }

        let line = record.position().map_or(0, |pos| pos.line());
        if record.len() != COLUMNS.len() {
            return Err(DatasetError::ColumnCount {
                source_name: source_name.to_string(),
                line,
                found: record.len(),
            });
        }

        let mut row = [0.0; FEATURE_COLUMNS.len()];
        for ((cell, value), column) in row.iter_mut().zip(record.iter()).zip(FEATURE_COLUMNS) {
            *cell = value
                .parse::<f64>()
                .map_err(|_| DatasetError::InvalidNumber {
                    source_name: source_name.to_string(),
                    line,
                    column,
                    value: value.to_string(),
                })?;
        }
        rows.push(row);

        labels.push((line, record[FEATURE_COLUMNS.len()].to_string()));
    }

    let features = Array2::from(rows);

    debug!("{source_name}: read {} rows", labels.len());
    Ok((features, labels))
}
