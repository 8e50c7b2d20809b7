//! Engine options read at compile and evaluation time.
//!
//! Options are plain data with serde defaults, so a host can load a partial JSON document and
//! inherit everything it does not mention:
//!
//! ```
//! use formula_olap::{EngineConfig, NativeAlertMode};
//!
//! let cfg = EngineConfig::from_json(r#"{ "resultLimit": 5000, "alertNativeUnsupported": "error" }"#)
//!     .unwrap();
//! assert_eq!(cfg.result_limit, 5000);
//! assert_eq!(cfg.alert_native_unsupported, NativeAlertMode::Error);
//! assert!(cfg.enable_native_crossjoin);
//! ```

use crate::error::{OlapError, OlapResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What to do when an operator that only has a native implementation cannot be delegated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NativeAlertMode {
    #[default]
    SilentFallback,
    WarnAndFallback,
    Error,
}

/// Calculated-measure shapes that do not disqualify native evaluation.
///
/// A calculated measure in the evaluation context is accepted by the native dispatcher only if
/// every node of its formula matches an enabled pattern. When the request filters empty rows, the
/// measure must additionally be empty exactly where a single stored measure is: a reference to it,
/// or `IIf` over branches that both follow it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SafeCalcPattern {
    /// A direct reference to a stored measure.
    StoredMeasure,
    /// A numeric, string, boolean or null literal.
    Literal,
    /// `IIf(cond, a, b)` and the comparisons/logical operators used in its condition.
    Conditional,
    /// `IsEmpty(x)`.
    IsEmpty,
    /// `+ - * /` and unary minus.
    Arithmetic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Native delegation is attempted only when the estimated operand cardinality exceeds this.
    pub native_min_threshold: usize,
    /// Maximum number of tuples in a set result; `0` means unlimited.
    pub result_limit: usize,
    pub alert_native_unsupported: NativeAlertMode,
    #[serde(rename = "enableNativeCrossJoin")]
    pub enable_native_crossjoin: bool,
    #[serde(rename = "enableNativeTopCount")]
    pub enable_native_topcount: bool,
    pub enable_native_filter: bool,
    pub native_safe_patterns: Vec<SafeCalcPattern>,
    /// Maximum nesting of calculated-member evaluation.
    pub max_eval_depth: usize,
    pub query_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            native_min_threshold: 100,
            result_limit: 0,
            alert_native_unsupported: NativeAlertMode::SilentFallback,
            enable_native_crossjoin: true,
            enable_native_topcount: true,
            enable_native_filter: true,
            native_safe_patterns: vec![
                SafeCalcPattern::StoredMeasure,
                SafeCalcPattern::Literal,
                SafeCalcPattern::Conditional,
                SafeCalcPattern::IsEmpty,
            ],
            max_eval_depth: 64,
            query_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> OlapResult<Self> {
        let cfg: EngineConfig =
            serde_json::from_str(json).map_err(|e| OlapError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> OlapResult<()> {
        if self.max_eval_depth == 0 {
            return Err(OlapError::Config("maxEvalDepth must be at least 1".into()));
        }
        Ok(())
    }

    /// Config with every native path switched off, for interpreted-only evaluation.
    pub fn interpreted_only() -> Self {
        Self {
            enable_native_crossjoin: false,
            enable_native_topcount: false,
            enable_native_filter: false,
            ..Self::default()
        }
    }

    pub fn allows_pattern(&self, pattern: SafeCalcPattern) -> bool {
        self.native_safe_patterns.contains(&pattern)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }

    /// Returns `true` when `count` tuples would break the configured result limit.
    pub fn exceeds_result_limit(&self, count: usize) -> bool {
        self.result_limit != 0 && count > self.result_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn parses_kebab_case_enums() {
        let cfg = EngineConfig::from_json(
            r#"{
                "alertNativeUnsupported": "warn-and-fallback",
                "nativeSafePatterns": ["stored-measure", "arithmetic"],
                "enableNativeCrossJoin": false
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.alert_native_unsupported, NativeAlertMode::WarnAndFallback);
        assert!(cfg.allows_pattern(SafeCalcPattern::Arithmetic));
        assert!(!cfg.allows_pattern(SafeCalcPattern::Conditional));
        assert!(!cfg.enable_native_crossjoin);
    }

    #[test]
    fn rejects_zero_depth() {
        let err = EngineConfig::from_json(r#"{ "maxEvalDepth": 0 }"#).unwrap_err();
        assert!(matches!(err, OlapError::Config(_)));
    }

    #[test]
    fn zero_result_limit_is_unlimited() {
        let cfg = EngineConfig::default();
        assert!(!cfg.exceeds_result_limit(usize::MAX));

        let cfg = EngineConfig {
            result_limit: 3,
            ..EngineConfig::default()
        };
        assert!(!cfg.exceeds_result_limit(3));
        assert!(cfg.exceeds_result_limit(4));
    }
}
