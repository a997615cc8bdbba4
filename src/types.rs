use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// GRCh38 chromosome name: 1-22, X, Y or MT.
///
/// Ordering follows the natural karyotype order, which is also the order in
/// which chromosome-level partitions are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Chromosome(u8);

impl Chromosome {
    pub const X: Chromosome = Chromosome(23);
    pub const Y: Chromosome = Chromosome(24);
    pub const MT: Chromosome = Chromosome(25);

    pub fn autosome(number: u8) -> Option<Chromosome> {
        (1..=22).contains(&number).then_some(Chromosome(number))
    }
}

impl fmt::Display for Chromosome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            23 => f.write_str("X"),
            24 => f.write_str("Y"),
            25 => f.write_str("MT"),
            n => write!(f, "{}", n),
        }
    }
}

impl FromStr for Chromosome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let name = trimmed
            .strip_prefix("chr")
            .or_else(|| trimmed.strip_prefix("CHR"))
            .unwrap_or(trimmed);
        match name.to_ascii_uppercase().as_str() {
            "X" => Ok(Chromosome::X),
            "Y" => Ok(Chromosome::Y),
            "MT" | "M" => Ok(Chromosome::MT),
            other => other
                .parse::<u8>()
                .ok()
                .and_then(Chromosome::autosome)
                .ok_or_else(|| Error::InvalidInput(format!("unknown chromosome: {}", s))),
        }
    }
}

impl TryFrom<String> for Chromosome {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Chromosome> for String {
    fn from(value: Chromosome) -> Self {
        value.to_string()
    }
}

/// One variant/trait/study association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationRecord {
    pub chromosome: Chromosome,
    pub position: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsid: Option<String>,
    #[serde(rename = "ref", default)]
    pub ref_allele: String,
    #[serde(default)]
    pub alt: String,
    pub pvalue: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neg_log10_pvalue: Option<f64>,
    #[serde(default)]
    pub study_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trait_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gene_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tissue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qtl_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beta: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub se: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds_ratio: Option<f64>,
}

impl AssociationRecord {
    /// Minimal record; the remaining fields default to empty.
    pub fn new(chromosome: Chromosome, position: u64, pvalue: f64, study_id: &str) -> Self {
        Self {
            chromosome,
            position,
            variant_id: None,
            rsid: None,
            ref_allele: String::new(),
            alt: String::new(),
            pvalue,
            neg_log10_pvalue: None,
            study_id: study_id.to_string(),
            trait_id: None,
            gene_id: None,
            tissue_id: None,
            qtl_group: None,
            dataset_id: None,
            beta: None,
            se: None,
            maf: None,
            odds_ratio: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pvalue > 0.0 && self.pvalue <= 1.0) {
            return Err(Error::InvalidInput(format!(
                "p-value {} at {}:{} is outside (0, 1]",
                self.pvalue, self.chromosome, self.position
            )));
        }
        if self.study_id.is_empty() {
            return Err(Error::InvalidInput(format!(
                "record at {}:{} has no study id",
                self.chromosome, self.position
            )));
        }
        Ok(())
    }

    pub fn with_neg_log10_pvalue(mut self) -> Self {
        self.neg_log10_pvalue = Some(-self.pvalue.log10());
        self
    }
}

/// Inclusive interval with optional bounds; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Interval<T> {
    pub lower: Option<T>,
    pub upper: Option<T>,
}

pub type BpInterval = Interval<u64>;
pub type PvalueInterval = Interval<f64>;

impl<T: PartialOrd + Copy + fmt::Display> Interval<T> {
    pub fn new(lower: Option<T>, upper: Option<T>) -> Result<Self> {
        if let (Some(lo), Some(hi)) = (lower, upper) {
            if lo > hi {
                return Err(Error::InvalidRange(format!(
                    "lower limit {} is greater than upper limit {}",
                    lo, hi
                )));
            }
        }
        Ok(Self { lower, upper })
    }

    pub fn single(value: T) -> Self {
        Self {
            lower: Some(value),
            upper: Some(value),
        }
    }

    pub fn contains(&self, value: T) -> bool {
        self.lower.is_none_or(|lo| lo <= value) && self.upper.is_none_or(|hi| value <= hi)
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }
}

impl<T: fmt::Display> fmt::Display for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Some(lo) => write!(f, "{}", lo)?,
            None => f.write_str("*")?,
        }
        f.write_str(":")?;
        match &self.upper {
            Some(hi) => write!(f, "{}", hi),
            None => f.write_str("*"),
        }
    }
}

/// Result of one search call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub associations: Vec<AssociationRecord>,
    /// Records consumed from `start`; the next call resumes at `start + index_marker`.
    pub index_marker: u64,
    /// Whether the request was served through the paginated walker.
    pub paginated: bool,
    /// True when nothing can follow `start + index_marker`.
    pub exhausted: bool,
}
