//! Native pushdown: computing set expressions with one backend request instead of tuple-by-tuple
//! interpretation.
//!
//! A [`NativeSite`] is built by the compiler for every `CrossJoin`, `TopCount` and `Filter` call.
//! Static analysis of the call happens once, at compile time. Each evaluation then runs
//! [`NativeSite::dispatch`], which
//!
//! 1. checks the operator is enabled and statically eligible,
//! 2. gates on the estimated operand cardinality (`nativeMinThreshold`),
//! 3. inspects the evaluation context (ragged hierarchies, calculated measures against the safe
//!    pattern whitelist, calculated members that are aggregates of stored members),
//! 4. resolves aggregate members in the context (the slicer) with loop detection,
//! 5. asks the schema for a native plan and executes it through a row sink that enforces the
//!    result limit, and
//! 6. merges calculated members of the operands into the native rows, still under the limit.
//!
//! Operators that only have a native implementation report `Unsupported` instead of
//! `NotEligible`; the configured alert mode decides whether that fails the query.

mod eligibility;
mod limit;

pub(crate) use eligibility::literal_count;
pub(crate) use limit::ResultLimiter;

use crate::calc::set::Cartesian;
use crate::config::NativeAlertMode;
use crate::error::{OlapError, OlapResult};
use crate::evaluator::{project_out, Evaluator};
use crate::model::{HierarchyId, Member, Tuple};
use crate::schema::{
    CompareOp, ContextConstraint, MemberSource, NativeOp, NativeRequest, SchemaReader,
};
use crate::syntax::Exp;
use eligibility::{ArgSource, OperandKind};
use std::sync::Arc;

/// Result of one native dispatch.
#[derive(Debug)]
pub(crate) enum NativeOutcome {
    /// The backend computed the set.
    Delegated(Vec<Tuple>),
    /// Native evaluation does not apply; evaluate in memory.
    NotEligible(String),
    /// A native-only operator could not be delegated and the alert mode allows falling back.
    Unsupported(String),
}

#[derive(Debug)]
enum Template {
    CrossJoin,
    /// `measure == None` ranks by the current measure.
    TopCount {
        count: usize,
        measure: Option<Member>,
        operand: OperandKind,
    },
    Filter {
        measure: Member,
        op: CompareOp,
        operand_value: f64,
        operand: OperandKind,
    },
}

#[derive(Debug)]
struct Plan {
    template: Template,
    sources: Vec<ArgSource>,
}

#[derive(Debug)]
pub(crate) struct NativeSite {
    key: Arc<str>,
    plan: Result<Plan, String>,
    required: bool,
}

impl NativeSite {
    pub(crate) fn crossjoin(exp: &Exp, args: &[Exp]) -> Self {
        let plan = eligibility::crossjoin_sources(args).map(|sources| Plan {
            template: Template::CrossJoin,
            sources,
        });
        Self::new(exp, plan, false)
    }

    /// `TopCount(set, count [, measure])`. Without a measure the operator is native-only.
    pub(crate) fn top_count(exp: &Exp, set: &Exp, count: &Exp, measure: Option<&Exp>) -> Self {
        let plan = (|| -> Result<Plan, String> {
            let (sources, operand) = eligibility::member_sources(set)?;
            no_calculated(&sources)?;
            let count = literal_count(count)?;
            let measure = measure.map(eligibility::stored_measure).transpose()?;
            Ok(Plan {
                template: Template::TopCount {
                    count,
                    measure,
                    operand,
                },
                sources,
            })
        })();
        Self::new(exp, plan, measure.is_none())
    }

    pub(crate) fn filter(exp: &Exp, set: &Exp, condition: &Exp) -> Self {
        let plan = (|| -> Result<Plan, String> {
            let (sources, operand) = eligibility::member_sources(set)?;
            no_calculated(&sources)?;
            let (measure, op, operand_value) = eligibility::measure_comparison(condition)?;
            Ok(Plan {
                template: Template::Filter {
                    measure,
                    op,
                    operand_value,
                    operand,
                },
                sources,
            })
        })();
        Self::new(exp, plan, false)
    }

    fn new(exp: &Exp, plan: Result<Plan, String>, required: bool) -> Self {
        Self {
            key: exp.to_string().into(),
            plan,
            required,
        }
    }

    /// Tries to compute the expression natively in the current context.
    ///
    /// `non_empty` applies to `CrossJoin` only; `TopCount` and `Filter` derive it from their
    /// operand.
    pub(crate) fn dispatch(
        &self,
        ev: &mut Evaluator<'_>,
        non_empty: bool,
    ) -> OlapResult<NativeOutcome> {
        match self.attempt(ev, non_empty)? {
            Ok(tuples) => {
                log::debug!(
                    "native evaluation of {} produced {} tuples",
                    self.key,
                    tuples.len()
                );
                Ok(NativeOutcome::Delegated(tuples))
            }
            Err(reason) if !self.required => {
                log::debug!("{} not eligible for native evaluation: {reason}", self.key);
                Ok(NativeOutcome::NotEligible(reason))
            }
            Err(reason) => match ev.config().alert_native_unsupported {
                NativeAlertMode::Error => Err(OlapError::NativeUnsupported {
                    expression: self.key.to_string(),
                    reason,
                }),
                NativeAlertMode::WarnAndFallback => {
                    log::warn!(
                        "native evaluation not supported for {}: {reason}; falling back",
                        self.key
                    );
                    Ok(NativeOutcome::Unsupported(reason))
                }
                NativeAlertMode::SilentFallback => Ok(NativeOutcome::Unsupported(reason)),
            },
        }
    }

    fn attempt(
        &self,
        ev: &mut Evaluator<'_>,
        non_empty: bool,
    ) -> OlapResult<Result<Vec<Tuple>, String>> {
        let config = ev.config();
        let plan = match &self.plan {
            Ok(plan) => plan,
            Err(reason) => return Ok(Err(reason.clone())),
        };
        let enabled = match plan.template {
            Template::CrossJoin => config.enable_native_crossjoin,
            Template::TopCount { .. } => config.enable_native_topcount,
            Template::Filter { .. } => config.enable_native_filter,
        };
        if !enabled {
            return Ok(Err("native evaluation is disabled for this operator".to_string()));
        }

        let schema = ev.schema();
        for source in &plan.sources {
            let Some(hierarchy) = schema.hierarchy(source.hierarchy) else {
                return Ok(Err(format!("unknown hierarchy {:?}", source.hierarchy)));
            };
            if hierarchy.is_measures() {
                return Ok(Err("measures cannot be a native operand".to_string()));
            }
            if hierarchy.is_ragged() {
                return Ok(Err(format!(
                    "hierarchy [{}] is ragged; its levels are not single predicates",
                    hierarchy.name()
                )));
            }
        }
        if plan.sources.iter().any(|s| s.stored.is_none()) {
            return Ok(Err("an operand has no stored members".to_string()));
        }

        // Native-only operators have nothing cheaper to fall back to.
        if !self.required {
            let estimate = estimate_cardinality(schema, &plan.sources)?;
            if estimate <= config.native_min_threshold {
                return Ok(Err(format!(
                    "estimated cardinality {estimate} does not exceed the threshold of {}",
                    config.native_min_threshold
                )));
            }
        }

        let (op, non_empty) = match &plan.template {
            Template::CrossJoin => (NativeOp::CrossJoin, non_empty),
            Template::TopCount {
                count,
                measure,
                operand,
            } => {
                let measure = match measure {
                    Some(measure) => measure.clone(),
                    None => match current_measure(ev) {
                        Some(measure) if measure.is_stored_measure() => measure,
                        _ => {
                            return Ok(Err(
                                "the current measure is not a stored measure".to_string()
                            ))
                        }
                    },
                };
                (
                    NativeOp::TopCount {
                        count: *count,
                        measure,
                    },
                    operand_non_empty(*operand, ev),
                )
            }
            Template::Filter {
                measure,
                op,
                operand_value,
                operand,
            } => (
                NativeOp::Filter {
                    measure: measure.clone(),
                    op: *op,
                    operand: *operand_value,
                },
                operand_non_empty(*operand, ev),
            ),
        };

        if !ev.enter_native(&self.key) {
            return Err(OlapError::EvaluationLoop {
                expression: self.key.to_string(),
            });
        }
        let constraint = context_constraint(ev, &plan.sources, non_empty);
        ev.leave_native(&self.key);
        let constraint = match constraint? {
            Ok(constraint) => constraint,
            Err(reason) => return Ok(Err(reason)),
        };

        let request = NativeRequest {
            op,
            args: plan.sources.iter().filter_map(|s| s.stored.clone()).collect(),
            constraint,
            non_empty,
        };
        let Some(handle) = schema.native_handle(&request) else {
            return Ok(Err("the backend has no native plan for this request".to_string()));
        };
        log::trace!("native plan for {}: {}", self.key, handle.plan());

        let execution = ev.execution();
        let mut limiter = ResultLimiter::new(config.result_limit);
        ev.backend().execute(&handle, &mut |tuple: Tuple| {
            execution.check()?;
            limiter.push(tuple)
        })?;

        if plan.sources.iter().any(|s| !s.calculated.is_empty()) {
            limiter = merge_calculated(ev, schema, &plan.sources, non_empty, limiter)?;
        }
        Ok(Ok(limiter.into_tuples()))
    }
}

fn no_calculated(sources: &[ArgSource]) -> Result<(), String> {
    if sources.iter().any(|s| !s.calculated.is_empty()) {
        return Err("calculated members cannot be ranked or filtered natively".to_string());
    }
    Ok(())
}

fn operand_non_empty(kind: OperandKind, ev: &Evaluator<'_>) -> bool {
    match kind {
        OperandKind::Simple => false,
        OperandKind::CrossJoin => ev.is_non_empty(),
        OperandKind::NonEmptyCrossJoin => true,
    }
}

pub(crate) fn measures_hierarchy(schema: &dyn SchemaReader) -> Option<HierarchyId> {
    schema
        .hierarchies()
        .iter()
        .find(|h| h.is_measures())
        .map(|h| h.id())
}

fn current_measure(ev: &Evaluator<'_>) -> Option<Member> {
    let hierarchy = measures_hierarchy(ev.schema())?;
    Some(ev.current_member(hierarchy).clone())
}

fn source_cardinality(schema: &dyn SchemaReader, source: &ArgSource) -> OlapResult<usize> {
    let stored = match &source.stored {
        Some(MemberSource::Level(level)) => schema.level_cardinality(level).unwrap_or(usize::MAX),
        Some(MemberSource::Children(member)) => schema.children(member)?.len(),
        Some(MemberSource::Members(members)) => members.len(),
        None => 0,
    };
    Ok(stored.saturating_add(source.calculated.len()))
}

fn estimate_cardinality(schema: &dyn SchemaReader, sources: &[ArgSource]) -> OlapResult<usize> {
    let mut estimate = 1usize;
    for source in sources {
        estimate = estimate.saturating_mul(source_cardinality(schema, source)?);
    }
    Ok(estimate)
}

/// Translates the evaluation context into relational constraints.
///
/// Calculated members on hierarchies the operands do not vary are accepted only when they are
/// aggregates over stored members of a single hierarchy; their sets are evaluated here, which is
/// where a self-referencing slicer would re-enter the same native expression. A calculated measure
/// in a non-empty request must also share its emptiness with a single stored measure.
fn context_constraint(
    ev: &mut Evaluator<'_>,
    sources: &[ArgSource],
    non_empty: bool,
) -> OlapResult<Result<ContextConstraint, String>> {
    let config = ev.config();
    let varied: Vec<HierarchyId> = sources.iter().map(|s| s.hierarchy).collect();
    let mut constraint = ContextConstraint::default();

    for member in ev.coordinate().to_vec() {
        if varied.contains(&member.hierarchy()) {
            continue;
        }
        if member.is_measure() {
            if member.is_stored_measure() {
                constraint.measures.push(member);
            } else {
                let measures = match eligibility::safe_measures(&member, config) {
                    Ok(measures) => measures,
                    Err(reason) => return Ok(Err(reason)),
                };
                if non_empty {
                    // Rows are filtered on stored data, so the cell must be empty exactly
                    // where one stored measure is.
                    match eligibility::emptiness_measure(&member) {
                        Ok(measure) => constraint.measures.push(measure),
                        Err(reason) => return Ok(Err(reason)),
                    }
                } else {
                    constraint.measures.extend(measures);
                }
            }
            continue;
        }
        if member.is_calculated() {
            let calc = ev.formula_calc(&member)?;
            let Some(set) = calc.aggregated_set() else {
                return Ok(Err(format!(
                    "calculated member {member} in the context is not an aggregate"
                )));
            };
            let tuples = {
                let mut scope = ev.scope();
                scope.widen_slicer(&varied);
                set.evaluate_list(&mut scope)?
            };
            if tuples.is_empty() {
                constraint.slicer.push(Vec::new());
                continue;
            }
            let projected = project_out(&tuples, &varied);
            if projected.is_empty() {
                continue;
            }
            if projected.iter().any(|t| t.arity() != 1) {
                return Ok(Err(format!(
                    "aggregate member {member} spans several hierarchies"
                )));
            }
            let members: Vec<Member> = projected
                .iter()
                .filter_map(|t| t.get(0).cloned())
                .collect();
            if members.iter().any(Member::is_calculated) {
                return Ok(Err(format!(
                    "aggregate member {member} aggregates calculated members"
                )));
            }
            constraint.slicer.push(members);
            continue;
        }
        if !member.is_all() {
            constraint.members.push(member);
        }
    }
    Ok(Ok(constraint))
}

/// Appends every combination that contains at least one calculated member. In non-empty mode
/// such combinations are kept only when their cell is not empty.
fn merge_calculated(
    ev: &mut Evaluator<'_>,
    schema: &dyn SchemaReader,
    sources: &[ArgSource],
    non_empty: bool,
    limiter: ResultLimiter,
) -> OlapResult<ResultLimiter> {
    let mut lists: Vec<Arc<[Tuple]>> = Vec::with_capacity(sources.len());
    let mut stored_product = 1usize;
    let mut full_product = 1usize;
    for source in sources {
        let mut members = match &source.stored {
            Some(stored) => stored.resolve(schema)?,
            None => Vec::new(),
        };
        stored_product = stored_product.saturating_mul(members.len());
        members.extend(source.calculated.iter().cloned());
        full_product = full_product.saturating_mul(members.len());
        lists.push(members.into_iter().map(Tuple::single).collect());
    }

    let mut limiter = ResultLimiter::resume(ev.config().result_limit, limiter.into_tuples())?;
    if !non_empty {
        limiter.ensure_room(full_product.saturating_sub(stored_product))?;
    }
    for tuple in Cartesian::new(lists) {
        if !tuple.members().iter().any(Member::is_calculated) {
            continue;
        }
        ev.check_cancel()?;
        if non_empty {
            let mut scope = ev.scope();
            scope.set_context_tuple(&tuple);
            if is_empty_cell(&mut scope)? {
                continue;
            }
        }
        limiter.push(tuple)?;
    }
    Ok(limiter)
}

/// `true` when the current cell has no value. Cell-level errors count as non-empty.
pub(crate) fn is_empty_cell(ev: &mut Evaluator<'_>) -> OlapResult<bool> {
    match ev.cell_value() {
        Ok(value) => Ok(value.is_null()),
        Err(err) if err.is_cell_error() => Ok(false),
        Err(err) => Err(err),
    }
}
