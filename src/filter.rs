//! Secondary predicates over association records.
//!
//! A [`Predicate`] is a conjunction of equality and inclusive range tests.
//! Backends without pushdown evaluate it after reading through
//! [`keep_mask`]; backends with pushdown receive the same predicate compiled
//! once per query into a [`Condition`].

use crate::types::{AssociationRecord, BpInterval, Chromosome, PvalueInterval};
use crate::{Error, Result};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub chromosome: Option<Chromosome>,
    pub bp_interval: Option<BpInterval>,
    pub variant_id: Option<String>,
    pub rsid: Option<String>,
    pub pvalue_interval: Option<PvalueInterval>,
    pub trait_id: Option<String>,
    pub gene_id: Option<String>,
    pub study_id: Option<String>,
    pub tissue_id: Option<String>,
    pub qtl_group: Option<String>,
}

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.compile().is_none()
    }

    /// Evaluate against one record. The bp range is tested first so that
    /// block spill-over is trimmed before any other test.
    pub fn matches(&self, record: &AssociationRecord) -> bool {
        if let Some(bp) = &self.bp_interval {
            if !bp.contains(record.position) {
                return false;
            }
        }
        if let Some(chromosome) = self.chromosome {
            if record.chromosome != chromosome {
                return false;
            }
        }
        if let Some(p) = &self.pvalue_interval {
            if !p.contains(record.pvalue) {
                return false;
            }
        }
        eq_opt(&self.variant_id, &record.variant_id)
            && eq_opt(&self.rsid, &record.rsid)
            && eq_opt(&self.trait_id, &record.trait_id)
            && eq_opt(&self.gene_id, &record.gene_id)
            && self
                .study_id
                .as_ref()
                .is_none_or(|s| *s == record.study_id)
            && eq_opt(&self.tissue_id, &record.tissue_id)
            && eq_opt(&self.qtl_group, &record.qtl_group)
    }

    /// Compile into a backend condition, or `None` when nothing is constrained.
    pub fn compile(&self) -> Option<Condition> {
        let mut terms = Vec::new();

        if let Some(chromosome) = self.chromosome {
            terms.push(Term::eq(Field::Chromosome, Value::Text(chromosome.to_string())));
        }
        if let Some(bp) = &self.bp_interval {
            if let Some(lo) = bp.lower {
                terms.push(Term::new(Field::Position, Op::Ge, Value::Int(lo)));
            }
            if let Some(hi) = bp.upper {
                terms.push(Term::new(Field::Position, Op::Le, Value::Int(hi)));
            }
        }
        let text_terms = [
            (Field::VariantId, &self.variant_id),
            (Field::Rsid, &self.rsid),
        ];
        for (field, value) in text_terms {
            if let Some(v) = value {
                terms.push(Term::eq(field, Value::Text(v.clone())));
            }
        }
        if let Some(p) = &self.pvalue_interval {
            if let Some(lo) = p.lower {
                terms.push(Term::new(Field::Pvalue, Op::Ge, Value::Float(lo)));
            }
            if let Some(hi) = p.upper {
                terms.push(Term::new(Field::Pvalue, Op::Le, Value::Float(hi)));
            }
        }
        let text_terms = [
            (Field::TraitId, &self.trait_id),
            (Field::GeneId, &self.gene_id),
            (Field::StudyId, &self.study_id),
            (Field::TissueId, &self.tissue_id),
            (Field::QtlGroup, &self.qtl_group),
        ];
        for (field, value) in text_terms {
            if let Some(v) = value {
                terms.push(Term::eq(field, Value::Text(v.clone())));
            }
        }

        (!terms.is_empty()).then_some(Condition { terms })
    }
}

fn eq_opt(wanted: &Option<String>, actual: &Option<String>) -> bool {
    match wanted {
        None => true,
        Some(w) => actual.as_deref() == Some(w.as_str()),
    }
}

/// Keep-mask over a batch of records, one flag per record in order.
pub fn keep_mask(records: &[AssociationRecord], predicate: &Predicate) -> Vec<bool> {
    records.iter().map(|r| predicate.matches(r)).collect()
}

/// At most one of variant id, rsid or chromosome region may be requested.
#[derive(Debug, Clone, PartialEq)]
pub enum GenomicContext {
    Variant(String),
    Rsid(String),
    Region {
        chromosome: Chromosome,
        interval: BpInterval,
    },
}

impl GenomicContext {
    pub fn exclusive(
        variant_id: Option<&str>,
        rsid: Option<&str>,
        region: Option<(Chromosome, BpInterval)>,
    ) -> Result<Option<GenomicContext>> {
        let set = [variant_id.is_some(), rsid.is_some(), region.is_some()]
            .iter()
            .filter(|s| **s)
            .count();
        if set > 1 {
            return Err(Error::InvalidInput(
                "only one of variant id, rsid or chromosome region may be given".to_string(),
            ));
        }
        Ok(match (variant_id, rsid, region) {
            (Some(v), _, _) => Some(GenomicContext::Variant(v.to_string())),
            (_, Some(r), _) => Some(GenomicContext::Rsid(r.to_string())),
            (_, _, Some((chromosome, interval))) => Some(GenomicContext::Region {
                chromosome,
                interval,
            }),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Chromosome,
    Position,
    VariantId,
    Rsid,
    Pvalue,
    TraitId,
    GeneId,
    StudyId,
    TissueId,
    QtlGroup,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::Chromosome => "chromosome",
            Field::Position => "position",
            Field::VariantId => "variant_id",
            Field::Rsid => "rsid",
            Field::Pvalue => "pvalue",
            Field::TraitId => "trait_id",
            Field::GeneId => "gene_id",
            Field::StudyId => "study_id",
            Field::TissueId => "tissue_id",
            Field::QtlGroup => "qtl_group",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ge,
    Le,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(u64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub field: Field,
    pub op: Op,
    pub value: Value,
}

impl Term {
    fn new(field: Field, op: Op, value: Value) -> Self {
        Self { field, op, value }
    }

    fn eq(field: Field, value: Value) -> Self {
        Self::new(field, Op::Eq, value)
    }

    fn eval(&self, record: &AssociationRecord) -> bool {
        match (&self.value, self.field) {
            (Value::Int(v), Field::Position) => compare(self.op, record.position, *v),
            (Value::Float(v), Field::Pvalue) => compare(self.op, record.pvalue, *v),
            (Value::Text(v), field) => {
                let actual = match field {
                    Field::Chromosome => return record.chromosome.to_string() == *v,
                    Field::StudyId => Some(record.study_id.as_str()),
                    Field::VariantId => record.variant_id.as_deref(),
                    Field::Rsid => record.rsid.as_deref(),
                    Field::TraitId => record.trait_id.as_deref(),
                    Field::GeneId => record.gene_id.as_deref(),
                    Field::TissueId => record.tissue_id.as_deref(),
                    Field::QtlGroup => record.qtl_group.as_deref(),
                    Field::Position | Field::Pvalue => None,
                };
                self.op == Op::Eq && actual == Some(v.as_str())
            }
            _ => false,
        }
    }
}

fn compare<T: PartialOrd>(op: Op, actual: T, expected: T) -> bool {
    match op {
        Op::Eq => actual == expected,
        Op::Ge => actual >= expected,
        Op::Le => actual <= expected,
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            Op::Eq => "==",
            Op::Ge => ">=",
            Op::Le => "<=",
        };
        match &self.value {
            Value::Text(v) => write!(f, "{} {} '{}'", self.field.name(), op, v),
            Value::Int(v) => write!(f, "{} {} {}", self.field.name(), op, v),
            Value::Float(v) => write!(f, "{} {} {}", self.field.name(), op, v),
        }
    }
}

/// Conjunction of terms evaluated by a pushdown-capable backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    terms: Vec<Term>,
}

impl Condition {
    pub fn eval(&self, record: &AssociationRecord) -> bool {
        self.terms.iter().all(|t| t.eval(record))
    }

    /// Tightest position bounds implied by the condition, used for index pruning.
    pub fn position_bounds(&self) -> BpInterval {
        let mut bounds = BpInterval::default();
        for term in self.terms.iter().filter(|t| t.field == Field::Position) {
            if let Value::Int(v) = term.value {
                match term.op {
                    Op::Ge => bounds.lower = Some(bounds.lower.map_or(v, |lo| lo.max(v))),
                    Op::Le => bounds.upper = Some(bounds.upper.map_or(v, |hi| hi.min(v))),
                    Op::Eq => {
                        bounds.lower = Some(v);
                        bounds.upper = Some(v);
                    }
                }
            }
        }
        bounds
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(" & ")?;
            }
            write!(f, "{}", term)?;
        }
        Ok(())
    }
}
