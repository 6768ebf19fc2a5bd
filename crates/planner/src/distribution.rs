//! Data distribution properties of plan subtrees.
//!
//! A [`Distribution`] describes how rows produced by a stage are spread
//! across its parallel tasks. Exchange nodes carry the distribution the
//! consumer requires; at dispatch time it is lowered to a wire
//! [`ExchangeInfo`] once the consumer's parallelism is known.

use serde::{Deserialize, Serialize};

use crate::fragment::{DistributionInfo, DistributionMode, ExchangeInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Distribution {
    /// All rows on exactly one task.
    Single,
    /// Rows partitioned by a hash of the listed column positions. The key
    /// list is never empty; [`Distribution::hash`] enforces this.
    Hash { keys: Vec<usize> },
    /// Every task receives the full row set.
    Broadcast,
    /// Rows spread across tasks with no key, round-robin on the wire.
    Random,
    /// Wildcard used during plan-property negotiation only. Satisfied by any
    /// concrete distribution and never serialized.
    Any,
}

impl Distribution {
    /// Hash distribution over `keys`.
    ///
    /// Panics when `keys` is empty: a keyless hash distribution is a planner
    /// bug and must fail at construction, not at dispatch.
    pub fn hash(keys: Vec<usize>) -> Self {
        assert!(!keys.is_empty(), "hash distribution requires at least one key");
        Distribution::Hash { keys }
    }

    /// Whether this distribution satisfies `required`.
    ///
    /// `Any` on the required side accepts everything; on the provided side it
    /// satisfies only `Any`.
    pub fn satisfies(&self, required: &Distribution) -> bool {
        match required {
            Distribution::Any => true,
            _ => self == required,
        }
    }

    /// Lower to the wire form for a consumer with `output_count` tasks.
    ///
    /// Panics on [`Distribution::Any`]: the planner must have resolved every
    /// exchange to a concrete distribution before dispatch.
    pub fn to_exchange_info(&self, output_count: u32) -> ExchangeInfo {
        match self {
            // A singleton consumer reads exactly one partition no matter how
            // many producer tasks feed it, so `output_count` is ignored.
            Distribution::Single => ExchangeInfo {
                mode: DistributionMode::Single,
                output_count: 1,
                distribution: None,
            },
            Distribution::Hash { keys } => ExchangeInfo {
                mode: DistributionMode::Hash,
                output_count,
                distribution: Some(DistributionInfo {
                    keys: keys.clone(),
                }),
            },
            Distribution::Broadcast => ExchangeInfo {
                mode: DistributionMode::Broadcast,
                output_count,
                distribution: None,
            },
            Distribution::Random => ExchangeInfo {
                mode: DistributionMode::RoundRobin,
                output_count,
                distribution: None,
            },
            Distribution::Any => {
                panic!("`Any` distribution cannot be serialized; resolve it during planning")
            }
        }
    }
}
