//! Taxonomic filter applied to the final search.
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::defs::PipelineError;

pub type Taxid = u32;  // NCBI taxids fit in u32

pub const RESTRICT_INTENT: &str = "restrict";
pub const EXCLUDE_INTENT: &str = "exclude";

pub const BLAST_TAXIDS_FLAG: &str = "-taxids";
pub const BLAST_NEGATIVE_TAXIDS_FLAG: &str = "-negative_taxids";

lazy_static! {
    static ref TAXID_LIST: Regex = Regex::new(r"^[0-9]+(,[0-9]+)*$").unwrap();
}

/// At most one of restrict/exclude is ever populated; the enum makes the
/// other unreachable once one is built. Ids keep the order they were given in,
/// without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TaxonomicFilter {
    #[default]
    None,
    Restrict(Vec<Taxid>),
    Exclude(Vec<Taxid>),
}

impl TaxonomicFilter {
    /// Parses one free-text answer such as `restrict 620,561` or `exclude 9606`.
    /// An empty answer means the user opted out of filtering.
    pub fn build(raw_answer: &str) -> Result<Self, PipelineError> {
        let answer = raw_answer.trim();
        if answer.is_empty() {
            return Ok(TaxonomicFilter::None);
        }

        let invalid = |reason: &str| PipelineError::InvalidTaxonomicFilter {
            answer: answer.to_string(),
            reason: reason.to_string(),
        };

        let (intent, id_list) = answer
            .split_once(' ')
            .ok_or_else(|| invalid("expected '<restrict|exclude> <id>[,<id>...]'"))?;

        if intent != RESTRICT_INTENT && intent != EXCLUDE_INTENT {
            return Err(invalid("intent must be 'restrict' or 'exclude'"));
        }
        if !TAXID_LIST.is_match(id_list) {
            return Err(invalid("taxids must be comma-separated positive integers without spaces"));
        }

        let mut ids: Vec<Taxid> = Vec::new();
        for token in id_list.split(',') {
            let id: Taxid = token
                .parse()
                .map_err(|_| invalid(&format!("taxid {} out of range", token)))?;
            if id == 0 {
                return Err(invalid("taxid 0 is not a valid taxonomy id"));
            }
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        Ok(if intent == RESTRICT_INTENT {
            TaxonomicFilter::Restrict(ids)
        } else {
            TaxonomicFilter::Exclude(ids)
        })
    }

    /// Optional answer from the command line; absent means no filter.
    pub fn from_answer(raw_answer: Option<&str>) -> Result<Self, PipelineError> {
        match raw_answer {
            Some(answer) => Self::build(answer),
            None => Ok(TaxonomicFilter::None),
        }
    }

    /// The single search flag this filter maps to, if any.
    pub fn blast_flag(&self) -> Option<(&'static str, String)> {
        match self {
            TaxonomicFilter::None => None,
            TaxonomicFilter::Restrict(ids) => Some((BLAST_TAXIDS_FLAG, join_taxids(ids))),
            TaxonomicFilter::Exclude(ids) => Some((BLAST_NEGATIVE_TAXIDS_FLAG, join_taxids(ids))),
        }
    }
}

impl fmt::Display for TaxonomicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxonomicFilter::None => write!(f, "none"),
            TaxonomicFilter::Restrict(ids) => write!(f, "{} {}", RESTRICT_INTENT, join_taxids(ids)),
            TaxonomicFilter::Exclude(ids) => write!(f, "{} {}", EXCLUDE_INTENT, join_taxids(ids)),
        }
    }
}

fn join_taxids(ids: &[Taxid]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(",")
}
