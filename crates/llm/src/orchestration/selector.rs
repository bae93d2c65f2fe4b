use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{FailoverError, FailoverResult};
use crate::providers::{LlmRequest, TaskType};

/// Routing preferences, evaluated in order: large documents, bulk tasks,
/// critical tasks, then lowest failure count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionPolicy {
    /// Characters; payloads strictly above this use `large_document_preference`
    pub large_document_threshold: usize,
    pub large_document_preference: Vec<String>,
    /// Order for `TaskType::BulkProcessing`
    pub cost_preference: Vec<String>,
    /// Order for `TaskType::CriticalAnalysis`
    pub quality_preference: Vec<String>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            large_document_threshold: 50_000,
            large_document_preference: Vec::new(),
            cost_preference: Vec::new(),
            quality_preference: Vec::new(),
        }
    }
}

impl SelectionPolicy {
    /// Every provider name referenced by a preference list
    pub fn referenced_providers(&self) -> impl Iterator<Item = (&'static str, &str)> {
        let lists: [(&'static str, &Vec<String>); 3] = [
            ("selection.large_document_preference", &self.large_document_preference),
            ("selection.cost_preference", &self.cost_preference),
            ("selection.quality_preference", &self.quality_preference),
        ];
        lists
            .into_iter()
            .flat_map(|(field, names)| names.iter().map(move |name| (field, name.as_str())))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    LargeDocument,
    CostSensitive,
    QualitySensitive,
    LeastFailures,
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LargeDocument => "large_document",
            Self::CostSensitive => "cost_sensitive",
            Self::QualitySensitive => "quality_sensitive",
            Self::LeastFailures => "least_failures",
        })
    }
}

/// A provider that passed circuit admission for this round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate<'a> {
    pub name: &'a str,
    /// Registration index; also the tie-breaker
    pub index: usize,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Registration index of the chosen provider
    pub index: usize,
    pub reason: SelectionReason,
}

/// Picks one provider from the currently available candidates.
#[derive(Debug, Clone, Default)]
pub struct ProviderSelector {
    policy: SelectionPolicy,
}

impl ProviderSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    /// `candidates` must be in registration order.
    pub fn select(
        &self,
        request: &LlmRequest,
        candidates: &[Candidate<'_>],
    ) -> FailoverResult<Selection> {
        if candidates.is_empty() {
            return Err(FailoverError::NoAvailableProviders);
        }

        if request.routing_size() > self.policy.large_document_threshold {
            if let Some(index) = first_preferred(&self.policy.large_document_preference, candidates)
            {
                return Ok(Selection {
                    index,
                    reason: SelectionReason::LargeDocument,
                });
            }
        }

        let by_task = match request.task_type {
            Some(TaskType::BulkProcessing) => Some((
                &self.policy.cost_preference,
                SelectionReason::CostSensitive,
            )),
            Some(TaskType::CriticalAnalysis) => Some((
                &self.policy.quality_preference,
                SelectionReason::QualitySensitive,
            )),
            Some(TaskType::General) | None => None,
        };
        if let Some((preference, reason)) = by_task {
            if let Some(index) = first_preferred(preference, candidates) {
                return Ok(Selection { index, reason });
            }
        }

        // min_by_key keeps the first minimum, i.e. the earliest registration
        let best = candidates
            .iter()
            .min_by_key(|c| (c.consecutive_failures, c.index))
            .map(|c| c.index)
            .ok_or(FailoverError::NoAvailableProviders)?;
        Ok(Selection {
            index: best,
            reason: SelectionReason::LeastFailures,
        })
    }
}

fn first_preferred(preference: &[String], candidates: &[Candidate<'_>]) -> Option<usize> {
    preference.iter().find_map(|wanted| {
        candidates
            .iter()
            .find(|c| c.name == wanted.as_str())
            .map(|c| c.index)
    })
}
