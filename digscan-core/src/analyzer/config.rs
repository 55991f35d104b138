//! Analysis Configuration
//!
//! Every tunable of the analysis lives in [`AnalysisConfig`]: the allocator
//! table, runtime filtering, plausibility bounds for element sizes, walk
//! budgets, the similarity mode used when matching address computations, and
//! the name-based hint strategies. Configurations load from JSON; missing
//! fields take their defaults.

use crate::analyzer::error::DigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How an allocator communicates the size of its allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    /// Single total-size argument (`malloc`).
    Fixed,
    /// Separate count and element size arguments (`calloc`).
    ZeroInitializing,
    /// Pointer then total-size argument (`realloc`).
    Resizing,
    /// Object allocation with a total-size argument (`operator new`).
    ObjectConstructing,
}

impl AllocatorKind {
    /// Index of the argument holding the total size in bytes, if the allocator has one.
    #[inline]
    pub fn size_argument(self) -> Option<usize> {
        match self {
            AllocatorKind::Fixed | AllocatorKind::ObjectConstructing => Some(0),
            AllocatorKind::Resizing => Some(1),
            AllocatorKind::ZeroInitializing => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AllocatorKind::Fixed => "fixed",
            AllocatorKind::ZeroInitializing => "zero-initializing",
            AllocatorKind::Resizing => "resizing",
            AllocatorKind::ObjectConstructing => "object-constructing",
        }
    }
}

/// How strictly two address computations must agree to be treated as the same field access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMode {
    /// Same index count and equal constant indices; any two variable indices match.
    Lenient,
    /// Lenient rules plus equal source types and identical variable indices.
    Strict,
}

/// Name-based hint strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HintConfig {
    /// Run the hint strategies at all
    pub enabled: bool,
    /// Upper bound on the size of a function treated as an accessor
    pub accessor_max_instructions: usize,
    /// Callee name fragments that mark a neighborhood query
    pub neighborhood_keywords: Vec<String>,
    /// Callee name fragments that mark an iterator pair (begin/end)
    pub iterator_keywords: Vec<String>,
    /// Highest node id considered by the neighborhood guess
    pub low_node_limit: u32,
}

impl Default for HintConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accessor_max_instructions: 20,
            neighborhood_keywords: vec![
                "neighbor".to_string(),
                "neigh".to_string(),
                "adj".to_string(),
                "edges".to_string(),
            ],
            iterator_keywords: vec!["begin".to_string(), "end".to_string()],
            low_node_limit: 5,
        }
    }
}

/// Analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Allocator identifiers recognized as allocation sites
    pub allocators: BTreeMap<String, AllocatorKind>,
    /// Size of the parallel runtime's stack allocations, never reported
    pub runtime_stack_size: u64,
    /// Caller name prefixes belonging to compiler or parallel-runtime internals
    pub runtime_prefixes: Vec<String>,
    /// Fragments anywhere in a caller name that mark outlined runtime regions
    pub runtime_substrings: Vec<String>,
    /// Names matching a runtime prefix that are still user code
    pub user_function_exceptions: Vec<String>,
    /// Element sizes accepted from a `count * size` argument
    pub plausible_element_sizes: Vec<u64>,
    /// Largest constant index difference accepted as a byte stride
    pub max_index_stride: u64,
    /// Address computation matching mode
    pub similarity: SimilarityMode,
    /// Step budget of a single provenance walk
    pub max_walk_steps: usize,
    /// Recursion depth cap of a single provenance walk
    pub max_walk_depth: usize,
    /// Visit budget when tracing an index back to the load that produced it
    pub index_trace_limit: usize,
    /// Name-based hint strategies
    pub hints: HintConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let allocators = [
            ("malloc", AllocatorKind::Fixed),
            ("calloc", AllocatorKind::ZeroInitializing),
            ("realloc", AllocatorKind::Resizing),
            ("_Znwm", AllocatorKind::ObjectConstructing),
            ("_Znam", AllocatorKind::ObjectConstructing),
        ]
        .into_iter()
        .map(|(name, kind)| (name.to_string(), kind))
        .collect();

        Self {
            allocators,
            runtime_stack_size: 65536,
            runtime_prefixes: ["__kmpc_", "__kmp_", ".omp_", "omp_", "GOMP_", "__"]
                .into_iter()
                .map(String::from)
                .collect(),
            runtime_substrings: [".omp", "omp_outlined", "__kmpc", "GOMP"]
                .into_iter()
                .map(String::from)
                .collect(),
            user_function_exceptions: vec!["__main".to_string()],
            plausible_element_sizes: vec![1, 2, 4, 8, 12, 16, 24, 32],
            max_index_stride: 32,
            similarity: SimilarityMode::Lenient,
            max_walk_steps: 4096,
            max_walk_depth: 64,
            index_trace_limit: 10,
            hints: HintConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, DigError> {
        let config: AnalysisConfig = serde_json::from_str(json)
            .map_err(|e| DigError::config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, DigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject settings that would make the analysis meaningless.
    pub fn validate(&self) -> Result<(), DigError> {
        if self.allocators.is_empty() {
            return Err(DigError::config("no allocators configured"));
        }
        if self.plausible_element_sizes.contains(&0) {
            return Err(DigError::config("plausible element sizes must be positive"));
        }
        if self.max_walk_steps == 0 || self.max_walk_depth == 0 {
            return Err(DigError::config("provenance walk budgets must be positive"));
        }
        if self.index_trace_limit == 0 {
            return Err(DigError::config("index trace limit must be positive"));
        }
        Ok(())
    }

    #[inline]
    pub fn allocator_kind(&self, callee: &str) -> Option<AllocatorKind> {
        self.allocators.get(callee).copied()
    }

    /// True when `function` is compiler- or runtime-generated rather than user code.
    pub fn is_runtime_internal(&self, function: &str) -> bool {
        if self.user_function_exceptions.iter().any(|e| e == function) {
            return false;
        }
        self.runtime_prefixes.iter().any(|p| function.starts_with(p.as_str()))
            || self.runtime_substrings.iter().any(|s| function.contains(s.as_str()))
    }

    #[inline]
    pub fn is_plausible_element_size(&self, size: u64) -> bool {
        self.plausible_element_sizes.contains(&size)
    }

    pub fn with_similarity(mut self, similarity: SimilarityMode) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn without_hints(mut self) -> Self {
        self.hints.enabled = false;
        self
    }
}
