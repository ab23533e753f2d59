use serde::{de, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One row of input data. Field order is kept as ingested.
pub type Record = Map<String, Value>;

pub const DEFAULT_THRESHOLD: f64 = 70.0;
pub const DEFAULT_OUTPUT_FORMAT: &str = "xlsx";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SourceFile {
    /// Original file name, the extension selects the parser
    pub name: String,
    /// Base64 encoded file body
    pub content: String,
}

/// A similarity score in `[0, 100]`, kept at two decimal places.
///
/// Serialized as a string with exactly two decimals (`"87.50"`) and read back
/// from either a string or a number.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub struct Similarity(f64);

impl Similarity {
    pub fn new(score: f64) -> Self {
        Similarity((score * 100.0).round() / 100.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Similarity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

struct SimilarityVisitor;

impl<'de> de::Visitor<'de> for SimilarityVisitor {
    type Value = Similarity;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a similarity score as number or numeric string")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Similarity::new(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Similarity::new(v as f64))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Similarity::new(v as f64))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        v.trim()
            .parse::<f64>()
            .map(Similarity::new)
            .map_err(|_| de::Error::custom(format!("invalid similarity '{v}'")))
    }
}

impl<'de> Deserialize<'de> for Similarity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(SimilarityVisitor)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateEntry {
    pub record: Record,
    pub similarity: Similarity,
    #[serde(alias = "index")]
    pub source_index: usize,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub group_id: u64,
    pub original: Record,
    pub duplicates: Vec<DuplicateEntry>,
}

/// Snapshot produced by one detection call.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub total_records: usize,
    #[serde(default)]
    pub unique_records: usize,
    #[serde(default)]
    pub duplicate_count: usize,
    #[serde(default)]
    pub redundancy_percentage: String,
    pub duplicate_groups: Vec<DuplicateGroup>,
    #[serde(default, alias = "originalFormat")]
    pub source_format: String,
}

impl DetectionResult {
    pub fn new(total_records: usize, duplicate_groups: Vec<DuplicateGroup>, source_format: &str) -> Self {
        let duplicate_count: usize = duplicate_groups.iter().map(|g| g.duplicates.len()).sum();
        let redundancy = if total_records == 0 {
            0.0
        } else {
            duplicate_count as f64 / total_records as f64 * 100.0
        };
        DetectionResult {
            success: true,
            total_records,
            unique_records: total_records.saturating_sub(duplicate_count),
            duplicate_count,
            redundancy_percentage: format!("{:.1}", (redundancy * 10.0).round() / 10.0),
            duplicate_groups,
            source_format: source_format.to_string(),
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_output_format() -> String {
    DEFAULT_OUTPUT_FORMAT.to_string()
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectRequest {
    pub file: SourceFile,
    /// Raw threshold parameter, see `util::parse_threshold`
    #[serde(default)]
    pub threshold: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub data: DetectionResult,
    #[serde(default)]
    pub selected_groups: Option<Vec<u64>>,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoreRequest {
    pub data: DetectionResult,
    pub selected_groups: Vec<u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOriginalRequest {
    pub duplicate_groups: Vec<DuplicateGroup>,
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadMergedRequest {
    pub data: DetectionResult,
    #[serde(default)]
    pub selected_groups: Option<Vec<u64>>,
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
}

/// Invocation payload, dispatched on the `operation` field.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "operation", rename_all = "camelCase")]
pub enum Operation {
    Detect(DetectRequest),
    Merge(MergeRequest),
    Ignore(IgnoreRequest),
    DownloadOriginal(DownloadOriginalRequest),
    DownloadMerged(DownloadMergedRequest),
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeSummary {
    pub success: bool,
    pub file_name: String,
    pub merged_count: usize,
    pub original_count: usize,
    /// Base64 encoded rendered file
    pub content: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub success: bool,
    pub file_name: String,
    pub content: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IgnoreSummary {
    pub success: bool,
    pub message: String,
    pub remaining_groups: usize,
    pub ignored_count: usize,
    /// Active groups left after the ignored ones were removed
    pub duplicate_groups: Vec<DuplicateGroup>,
}
