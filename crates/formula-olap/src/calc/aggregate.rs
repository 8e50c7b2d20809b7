//! Aggregate and statistical nodes.
//!
//! Every node switches non-empty mode off, then evaluates its set and the value expression once
//! per tuple; the caller's mode is restored afterwards. Null values are skipped, pairwise
//! statistics drop a pair when either side is null.

use super::{Calc, CalcRef, ResultStyle, SetOperand};
use crate::error::OlapResult;
use crate::evaluator::Evaluator;
use crate::model::{Aggregator, HierarchyId};
use crate::native::{is_empty_cell, measures_hierarchy};
use crate::stats::{self, Dispersion, KahanSum};
use crate::value::{Shape, Value};

/// Set styles an aggregate asks of its operand: it only needs one pass.
pub(crate) const ACCEPTS: &[ResultStyle] = ResultStyle::ITERATE;

fn for_each_tuple<'a>(
    set: &SetOperand,
    ev: &mut Evaluator<'a>,
    mut f: impl FnMut(&mut Evaluator<'a>) -> OlapResult<()>,
) -> OlapResult<()> {
    let mut scope = ev.scope();
    scope.set_non_empty(false);
    let tuples = set.evaluate_iter(&mut scope)?;
    for tuple in tuples {
        scope.check_cancel()?;
        let mut inner = scope.scope();
        inner.set_context_tuple(&tuple);
        f(&mut *inner)?;
    }
    Ok(())
}

/// The value expression, or the current cell when the function was called without one.
fn value_at(value: Option<&CalcRef>, ev: &mut Evaluator<'_>) -> OlapResult<Option<f64>> {
    match value {
        Some(calc) => calc.evaluate_number(ev),
        None => ev.cell_value()?.to_number(),
    }
}

/// Non-null values of `value` over `set`, plus the number of tuples visited.
fn collect(
    set: &SetOperand,
    value: Option<&CalcRef>,
    ev: &mut Evaluator<'_>,
) -> OlapResult<(Vec<f64>, usize)> {
    let mut values = Vec::new();
    let mut visited = 0usize;
    for_each_tuple(set, ev, |ev| {
        visited += 1;
        if let Some(v) = value_at(value, ev)? {
            values.push(v);
        }
        Ok(())
    })?;
    Ok((values, visited))
}

fn value_children<'c>(set: &'c SetOperand, value: &'c Option<CalcRef>) -> Vec<&'c CalcRef> {
    let mut children = vec![set.calc()];
    children.extend(value.as_ref());
    children
}

/// Without a value expression the node reads the current cell, which depends on everything.
fn value_depends(set: &SetOperand, value: &Option<CalcRef>, hierarchy: HierarchyId) -> bool {
    match value {
        Some(value) => set.calc().depends_on(hierarchy) || value.depends_on(hierarchy),
        None => true,
    }
}

macro_rules! value_node {
    () => {
        fn children(&self) -> Vec<&CalcRef> {
            value_children(&self.set, &self.value)
        }

        fn depends_on(&self, hierarchy: HierarchyId) -> bool {
            value_depends(&self.set, &self.value, hierarchy)
        }
    };
}

/// `Sum(set [, value])`
#[derive(Debug)]
pub(crate) struct SumCalc {
    set: SetOperand,
    value: Option<CalcRef>,
}

impl SumCalc {
    pub(crate) fn new(set: SetOperand, value: Option<CalcRef>) -> Self {
        Self { set, value }
    }
}

impl Calc for SumCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let (values, visited) = collect(&self.set, self.value.as_ref(), ev)?;
        if visited == 0 {
            return Ok(Value::Float(0.0));
        }
        if values.is_empty() {
            return Ok(Value::Null);
        }
        Ok(Value::Float(stats::sum(&values)))
    }

    value_node!();
}

/// `Avg(set [, value])`: mean of the non-null values.
#[derive(Debug)]
pub(crate) struct AvgCalc {
    set: SetOperand,
    value: Option<CalcRef>,
}

impl AvgCalc {
    pub(crate) fn new(set: SetOperand, value: Option<CalcRef>) -> Self {
        Self { set, value }
    }
}

impl Calc for AvgCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let (values, _) = collect(&self.set, self.value.as_ref(), ev)?;
        Ok(stats::mean(&values).into())
    }

    value_node!();
}

#[derive(Debug)]
pub(crate) struct MinMaxCalc {
    set: SetOperand,
    value: Option<CalcRef>,
    max: bool,
}

impl MinMaxCalc {
    pub(crate) fn min(set: SetOperand, value: Option<CalcRef>) -> Self {
        Self {
            set,
            value,
            max: false,
        }
    }

    pub(crate) fn max(set: SetOperand, value: Option<CalcRef>) -> Self {
        Self {
            set,
            value,
            max: true,
        }
    }
}

impl Calc for MinMaxCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let (values, _) = collect(&self.set, self.value.as_ref(), ev)?;
        let extremum = values.into_iter().reduce(|a, b| {
            if self.max {
                a.max(b)
            } else {
                a.min(b)
            }
        });
        Ok(extremum.into())
    }

    value_node!();
}

/// `Median(set [, value])` and `Percentile(set, value, percent)`.
#[derive(Debug)]
pub(crate) struct PercentileCalc {
    set: SetOperand,
    value: Option<CalcRef>,
    /// Percent in `0..=100`; `None` is the median.
    percent: Option<CalcRef>,
}

impl PercentileCalc {
    pub(crate) fn median(set: SetOperand, value: Option<CalcRef>) -> Self {
        Self {
            set,
            value,
            percent: None,
        }
    }

    pub(crate) fn percentile(set: SetOperand, value: CalcRef, percent: CalcRef) -> Self {
        Self {
            set,
            value: Some(value),
            percent: Some(percent),
        }
    }
}

impl Calc for PercentileCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let p = match &self.percent {
            Some(percent) => match percent.evaluate_number(ev)? {
                Some(percent) => percent / 100.0,
                None => return Ok(Value::Null),
            },
            None => 0.5,
        };
        let (mut values, _) = collect(&self.set, self.value.as_ref(), ev)?;
        Ok(stats::percentile(&mut values, p).into())
    }

    fn children(&self) -> Vec<&CalcRef> {
        let mut children = value_children(&self.set, &self.value);
        children.extend(self.percent.as_ref());
        children
    }

    fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        value_depends(&self.set, &self.value, hierarchy)
            || self
                .percent
                .as_ref()
                .is_some_and(|p| p.depends_on(hierarchy))
    }
}

/// `Var`, `VarP`, `Stdev`, `StdevP` and their aliases.
#[derive(Debug)]
pub(crate) struct VarianceCalc {
    set: SetOperand,
    value: Option<CalcRef>,
    kind: Dispersion,
    sqrt: bool,
}

impl VarianceCalc {
    pub(crate) fn new(
        set: SetOperand,
        value: Option<CalcRef>,
        kind: Dispersion,
        sqrt: bool,
    ) -> Self {
        Self {
            set,
            value,
            kind,
            sqrt,
        }
    }
}

impl Calc for VarianceCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let (values, _) = collect(&self.set, self.value.as_ref(), ev)?;
        let result = if self.sqrt {
            stats::stdev(&values, self.kind)
        } else {
            stats::variance(&values, self.kind)
        };
        Ok(result.into())
    }

    value_node!();
}

/// Non-null `(x, y)` pairs. Without an x expression, x is the 1-based position in the set.
fn collect_pairs(
    set: &SetOperand,
    y: Option<&CalcRef>,
    x: Option<&CalcRef>,
    ev: &mut Evaluator<'_>,
) -> OlapResult<(Vec<f64>, Vec<f64>)> {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut position = 0u32;
    for_each_tuple(set, ev, |ev| {
        position += 1;
        let yv = value_at(y, ev)?;
        let xv = match x {
            Some(x) => x.evaluate_number(ev)?,
            None => Some(f64::from(position)),
        };
        if let (Some(xv), Some(yv)) = (xv, yv) {
            xs.push(xv);
            ys.push(yv);
        }
        Ok(())
    })?;
    Ok((xs, ys))
}

#[derive(Debug)]
pub(crate) enum LinRegStat {
    Slope,
    Intercept,
    R2,
    Variance,
    /// Forecast at an x evaluated in the calling context.
    Point(CalcRef),
}

/// `LinRegSlope(set, y [, x])` and the rest of the `LinReg*` family.
#[derive(Debug)]
pub(crate) struct LinRegCalc {
    stat: LinRegStat,
    set: SetOperand,
    y: CalcRef,
    x: Option<CalcRef>,
}

impl LinRegCalc {
    pub(crate) fn new(stat: LinRegStat, set: SetOperand, y: CalcRef, x: Option<CalcRef>) -> Self {
        Self { stat, set, y, x }
    }
}

impl Calc for LinRegCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let at = match &self.stat {
            LinRegStat::Point(x) => match x.evaluate_number(ev)? {
                Some(x) => Some(x),
                None => return Ok(Value::Null),
            },
            _ => None,
        };
        let (xs, ys) = collect_pairs(&self.set, Some(&self.y), self.x.as_ref(), ev)?;
        let Some(fit) = stats::linear_regression(&xs, &ys) else {
            return Ok(Value::Null);
        };
        let result = match &self.stat {
            LinRegStat::Slope => Some(fit.slope),
            LinRegStat::Intercept => Some(fit.intercept),
            LinRegStat::R2 => fit.r2,
            LinRegStat::Variance => fit.variance,
            LinRegStat::Point(_) => at.map(|x| fit.point(x)),
        };
        Ok(result.into())
    }

    fn children(&self) -> Vec<&CalcRef> {
        let mut children = vec![self.set.calc(), &self.y];
        children.extend(self.x.as_ref());
        if let LinRegStat::Point(x) = &self.stat {
            children.push(x);
        }
        children
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PairStat {
    Covariance(Dispersion),
    Correlation,
}

/// `Covariance`, `CovarianceN` and `Correlation` over `(x, y)` pairs. A missing y is the current
/// cell value.
#[derive(Debug)]
pub(crate) struct PairwiseCalc {
    stat: PairStat,
    set: SetOperand,
    x: CalcRef,
    y: Option<CalcRef>,
}

impl PairwiseCalc {
    pub(crate) fn new(stat: PairStat, set: SetOperand, x: CalcRef, y: Option<CalcRef>) -> Self {
        Self { stat, set, x, y }
    }
}

impl Calc for PairwiseCalc {
    fn shape(&self) -> Shape {
        Shape::Float
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let (xs, ys) = collect_pairs(&self.set, self.y.as_ref(), Some(&self.x), ev)?;
        let result = match self.stat {
            PairStat::Covariance(kind) => stats::covariance(&xs, &ys, kind),
            PairStat::Correlation => stats::correlation(&xs, &ys),
        };
        Ok(result.into())
    }

    fn children(&self) -> Vec<&CalcRef> {
        let mut children = vec![self.set.calc(), &self.x];
        children.extend(self.y.as_ref());
        children
    }

    fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        self.y.is_none() || self.children().iter().any(|c| c.depends_on(hierarchy))
    }
}

/// `Count(set [, EXCLUDEEMPTY | INCLUDEEMPTY])`
#[derive(Debug)]
pub(crate) struct CountCalc {
    set: SetOperand,
    exclude_empty: bool,
}

impl CountCalc {
    pub(crate) fn new(set: SetOperand, exclude_empty: bool) -> Self {
        Self { set, exclude_empty }
    }
}

impl Calc for CountCalc {
    fn shape(&self) -> Shape {
        Shape::Integer
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        if !self.exclude_empty {
            let mut scope = ev.scope();
            scope.set_non_empty(false);
            let set = self.set.evaluate(&mut scope)?;
            let count = match set.len_hint() {
                Some(len) => len,
                None => set.into_iter_tuples().count(),
            };
            return Ok(Value::Integer(count as i64));
        }
        let mut count = 0i64;
        for_each_tuple(&self.set, ev, |ev| {
            if !is_empty_cell(ev)? {
                count += 1;
            }
            Ok(())
        })?;
        Ok(Value::Integer(count))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![self.set.calc()]
    }

    fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        self.exclude_empty || self.set.calc().depends_on(hierarchy)
    }
}

/// `Aggregate(set [, value])`: rolls the set up with the current measure's aggregator.
///
/// Stored measures use their own aggregator (`Count` measures are summed); calculated measures
/// are summed. An empty set, or one where every value is null, gives null.
#[derive(Debug)]
pub(crate) struct AggregateCalc {
    set: SetOperand,
    value: Option<CalcRef>,
}

impl AggregateCalc {
    pub(crate) fn new(set: SetOperand, value: Option<CalcRef>) -> Self {
        Self { set, value }
    }
}

impl Calc for AggregateCalc {
    fn shape(&self) -> Shape {
        Shape::Scalar
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let aggregator = measures_hierarchy(ev.schema())
            .and_then(|h| ev.current_member(h).aggregator())
            .unwrap_or(Aggregator::Sum);
        let (values, _) = collect(&self.set, self.value.as_ref(), ev)?;
        if values.is_empty() {
            return Ok(Value::Null);
        }
        let rolled = match aggregator {
            Aggregator::Sum | Aggregator::Count => {
                let mut sum = KahanSum::default();
                values.iter().for_each(|v| sum.add(*v));
                sum.value()
            }
            Aggregator::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregator::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        Ok(Value::Float(rolled))
    }

    value_node!();

    fn aggregated_set(&self) -> Option<&SetOperand> {
        Some(&self.set)
    }
}
