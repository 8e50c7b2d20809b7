use super::{set_value, Calc, CalcRef, ResultStyle, SetOperand, TupleSet};
use crate::error::{OlapError, OlapResult};
use crate::evaluator::Evaluator;
use crate::model::{HierarchyId, LevelRef, Tuple};
use crate::native::{is_empty_cell, NativeOutcome, NativeSite, ResultLimiter};
use crate::value::{Shape, Value};
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::sync::Arc;

/// Wraps a freshly built list in the negotiated representation.
pub(crate) fn deliver(tuples: Vec<Tuple>, style: ResultStyle) -> TupleSet {
    match style {
        ResultStyle::Iterable => TupleSet::Iterable(Box::new(tuples.into_iter())),
        ResultStyle::MutableList => TupleSet::MutableList(tuples),
        ResultStyle::List | ResultStyle::Value => TupleSet::List(tuples.into()),
    }
}

/// Lazy cartesian product of tuple lists, rightmost list varying fastest.
pub(crate) struct Cartesian {
    lists: Vec<Arc<[Tuple]>>,
    indices: Vec<usize>,
    remaining: usize,
}

impl Cartesian {
    pub(crate) fn new(lists: Vec<Arc<[Tuple]>>) -> Self {
        let remaining = if lists.is_empty() {
            0
        } else {
            lists
                .iter()
                .fold(1usize, |acc, list| acc.saturating_mul(list.len()))
        };
        Self {
            indices: vec![0; lists.len()],
            lists,
            remaining,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.remaining
    }
}

impl Iterator for Cartesian {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        if self.remaining == 0 {
            return None;
        }
        let tuple = Tuple::new(
            self.lists
                .iter()
                .zip(&self.indices)
                .flat_map(|(list, &idx)| list[idx].members().iter().cloned()),
        );
        self.remaining -= 1;
        for pos in (0..self.indices.len()).rev() {
            self.indices[pos] += 1;
            if self.indices[pos] < self.lists[pos].len() {
                break;
            }
            self.indices[pos] = 0;
        }
        Some(tuple)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// `<Level>.Members`
#[derive(Debug)]
pub(crate) struct LevelMembersCalc {
    level: LevelRef,
}

impl LevelMembersCalc {
    pub(crate) fn new(level: LevelRef) -> Self {
        Self { level }
    }
}

impl Calc for LevelMembersCalc {
    fn shape(&self) -> Shape {
        Shape::Set { arity: 1 }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn depends_on(&self, _hierarchy: HierarchyId) -> bool {
        false
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::SHARED_LIST
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let members = ev.schema().level_members(&self.level)?;
        let tuples = members.iter().cloned().map(Tuple::single).collect();
        Ok(deliver(tuples, style))
    }
}

/// `<Member>.Children`
#[derive(Debug)]
pub(crate) struct ChildrenCalc {
    member: CalcRef,
}

impl ChildrenCalc {
    pub(crate) fn new(member: CalcRef) -> Self {
        Self { member }
    }
}

impl Calc for ChildrenCalc {
    fn shape(&self) -> Shape {
        Shape::Set { arity: 1 }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.member]
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let member = match self.member.evaluate(ev)? {
            Value::Member(member) => member,
            Value::Null => return Ok(deliver(Vec::new(), style)),
            other => {
                return Err(OlapError::internal(format!(
                    "children of a {}",
                    other.type_name()
                )))
            }
        };
        let children = ev.schema().children(&member)?;
        Ok(deliver(children.into_iter().map(Tuple::single).collect(), style))
    }
}

#[derive(Debug)]
pub(crate) enum EnumItem {
    /// A member or tuple; a null member is skipped.
    Tuple(CalcRef),
    Set(SetOperand),
}

/// `{a, b, ...}`: concatenation in order, duplicates kept.
#[derive(Debug)]
pub(crate) struct EnumSetCalc {
    items: Vec<EnumItem>,
    arity: usize,
}

impl EnumSetCalc {
    pub(crate) fn new(items: Vec<EnumItem>, arity: usize) -> Self {
        Self { items, arity }
    }
}

impl Calc for EnumSetCalc {
    fn shape(&self) -> Shape {
        Shape::Set { arity: self.arity }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        self.items
            .iter()
            .map(|item| match item {
                EnumItem::Tuple(calc) => calc,
                EnumItem::Set(set) => set.calc(),
            })
            .collect()
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let mut tuples = Vec::with_capacity(self.items.len());
        for item in &self.items {
            match item {
                EnumItem::Tuple(calc) => match calc.evaluate(ev)? {
                    Value::Null => {}
                    Value::Member(member) => tuples.push(Tuple::single(member)),
                    Value::Tuple(tuple) => tuples.push(tuple),
                    other => {
                        return Err(OlapError::internal(format!(
                            "set item evaluated to a {}",
                            other.type_name()
                        )))
                    }
                },
                EnumItem::Set(set) => tuples.extend(set.evaluate_iter(ev)?),
            }
        }
        Ok(deliver(tuples, style))
    }
}

/// A member or tuple used where a set is expected.
#[derive(Debug)]
pub(crate) struct SingletonSetCalc {
    item: CalcRef,
}

impl SingletonSetCalc {
    pub(crate) fn new(item: CalcRef) -> Self {
        Self { item }
    }
}

impl Calc for SingletonSetCalc {
    fn shape(&self) -> Shape {
        Shape::Set {
            arity: self.item.shape().arity().unwrap_or(1),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.item]
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let tuples = match self.item.evaluate(ev)? {
            Value::Null => Vec::new(),
            Value::Member(member) => vec![Tuple::single(member)],
            Value::Tuple(tuple) => vec![tuple],
            other => {
                return Err(OlapError::internal(format!(
                    "singleton set of a {}",
                    other.type_name()
                )))
            }
        };
        Ok(deliver(tuples, style))
    }
}

/// The evaluator's current slicer tuples.
#[derive(Debug)]
pub(crate) struct SlicerCalc {
    arity: usize,
}

impl SlicerCalc {
    pub(crate) fn new(arity: usize) -> Self {
        Self { arity }
    }
}

impl Calc for SlicerCalc {
    fn shape(&self) -> Shape {
        Shape::Set { arity: self.arity }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(Value::Set(Arc::clone(ev.slicer())))
    }

    fn depends_on(&self, _hierarchy: HierarchyId) -> bool {
        false
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::SHARED_LIST
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        Ok(TupleSet::List(Arc::clone(ev.slicer())).adapt(style))
    }
}

/// `CrossJoin` and `NonEmptyCrossJoin`.
#[derive(Debug)]
pub(crate) struct CrossJoinCalc {
    args: Vec<SetOperand>,
    native: NativeSite,
    force_non_empty: bool,
}

impl CrossJoinCalc {
    pub(crate) fn new(args: Vec<SetOperand>, native: NativeSite, force_non_empty: bool) -> Self {
        Self {
            args,
            native,
            force_non_empty,
        }
    }
}

impl Calc for CrossJoinCalc {
    fn shape(&self) -> Shape {
        Shape::Set {
            arity: self.args.iter().map(SetOperand::arity).sum(),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        self.args.iter().map(SetOperand::calc).collect()
    }

    fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        self.force_non_empty || self.children().iter().any(|c| c.depends_on(hierarchy))
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let non_empty = self.force_non_empty || ev.is_non_empty();
        if let NativeOutcome::Delegated(tuples) = self.native.dispatch(ev, non_empty)? {
            return Ok(deliver(tuples, style));
        }

        let mut lists = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            lists.push(arg.evaluate_list(ev)?);
        }
        let varied: Vec<HierarchyId> = lists
            .iter()
            .filter_map(|list| list.first())
            .flat_map(|t| t.members().iter().map(|m| m.hierarchy()))
            .collect();
        let product = Cartesian::new(lists);
        let config = ev.config();

        if !non_empty {
            if config.exceeds_result_limit(product.len()) {
                return Err(OlapError::ResourceLimit {
                    limit: config.result_limit,
                });
            }
            if style == ResultStyle::Iterable {
                return Ok(TupleSet::Iterable(Box::new(product)));
            }
            let mut tuples = Vec::with_capacity(product.len());
            for tuple in product {
                ev.check_cancel()?;
                tuples.push(tuple);
            }
            return Ok(deliver(tuples, style));
        }

        let mut scope = ev.scope();
        scope.widen_slicer(&varied);
        let mut limiter = ResultLimiter::new(config.result_limit);
        for tuple in product {
            scope.check_cancel()?;
            let empty = {
                let mut inner = scope.scope();
                inner.set_context_tuple(&tuple);
                is_empty_cell(&mut inner)?
            };
            if !empty {
                limiter.push(tuple)?;
            }
        }
        Ok(deliver(limiter.into_tuples(), style))
    }
}

/// `Filter(set, condition)`
#[derive(Debug)]
pub(crate) struct FilterCalc {
    set: SetOperand,
    condition: CalcRef,
    native: NativeSite,
}

impl FilterCalc {
    pub(crate) fn new(set: SetOperand, condition: CalcRef, native: NativeSite) -> Self {
        Self {
            set,
            condition,
            native,
        }
    }
}

impl Calc for FilterCalc {
    fn shape(&self) -> Shape {
        Shape::Set {
            arity: self.set.arity(),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![self.set.calc(), &self.condition]
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        if let NativeOutcome::Delegated(tuples) = self.native.dispatch(ev, false)? {
            return Ok(deliver(tuples, style));
        }
        let mut kept = Vec::new();
        for tuple in self.set.evaluate_iter(ev)? {
            ev.check_cancel()?;
            let mut scope = ev.scope();
            scope.set_context_tuple(&tuple);
            if self.condition.evaluate_boolean(&mut scope)?.unwrap_or(false) {
                kept.push(tuple);
            }
        }
        Ok(deliver(kept, style))
    }
}

/// `TopCount` and `BottomCount`.
///
/// With a measure, tuples are ranked by it (nulls rank lowest) with ties kept in set order.
/// Without one the operator is native-only; its fallback keeps the first `count` tuples.
#[derive(Debug)]
pub(crate) struct TopCountCalc {
    set: SetOperand,
    count: CalcRef,
    measure: Option<CalcRef>,
    native: Option<NativeSite>,
    top: bool,
}

impl TopCountCalc {
    pub(crate) fn top(
        set: SetOperand,
        count: CalcRef,
        measure: Option<CalcRef>,
        native: NativeSite,
    ) -> Self {
        Self {
            set,
            count,
            measure,
            native: Some(native),
            top: true,
        }
    }

    pub(crate) fn bottom(set: SetOperand, count: CalcRef, measure: CalcRef) -> Self {
        Self {
            set,
            count,
            measure: Some(measure),
            native: None,
            top: false,
        }
    }
}

impl Calc for TopCountCalc {
    fn shape(&self) -> Shape {
        Shape::Set {
            arity: self.set.arity(),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        let mut children = vec![self.set.calc(), &self.count];
        children.extend(self.measure.as_ref());
        children
    }

    fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        self.measure.is_none() || self.children().iter().any(|c| c.depends_on(hierarchy))
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        if let Some(native) = &self.native {
            if let NativeOutcome::Delegated(tuples) = native.dispatch(ev, false)? {
                return Ok(deliver(tuples, style));
            }
        }
        let count = self.count.evaluate_integer(ev)?.unwrap_or(0).max(0) as usize;
        let mut tuples = self.set.evaluate_mutable(ev)?;
        let Some(measure) = &self.measure else {
            tuples.truncate(count);
            return Ok(deliver(tuples, style));
        };

        let mut keyed = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            ev.check_cancel()?;
            let key = {
                let mut scope = ev.scope();
                scope.set_context_tuple(&tuple);
                measure.evaluate_number(&mut scope)?.map(OrderedFloat)
            };
            keyed.push((key, tuple));
        }
        if self.top {
            keyed.sort_by(|a, b| b.0.cmp(&a.0));
        } else {
            keyed.sort_by(|a, b| a.0.cmp(&b.0));
        }
        keyed.truncate(count);
        Ok(deliver(keyed.into_iter().map(|(_, t)| t).collect(), style))
    }
}

/// `Head(set [, count])`
#[derive(Debug)]
pub(crate) struct HeadCalc {
    set: SetOperand,
    count: Option<CalcRef>,
}

impl HeadCalc {
    pub(crate) fn new(set: SetOperand, count: Option<CalcRef>) -> Self {
        Self { set, count }
    }
}

impl Calc for HeadCalc {
    fn shape(&self) -> Shape {
        Shape::Set {
            arity: self.set.arity(),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        let mut children = vec![self.set.calc()];
        children.extend(self.count.as_ref());
        children
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let count = match &self.count {
            Some(count) => count.evaluate_integer(ev)?.unwrap_or(0).max(0) as usize,
            None => 1,
        };
        let iter = self.set.evaluate_iter(ev)?.take(count);
        if style == ResultStyle::Iterable {
            return Ok(TupleSet::Iterable(Box::new(iter)));
        }
        Ok(deliver(iter.collect(), style))
    }
}

/// Ordering used by `Order`: null first, then numbers, then strings, then booleans.
pub(crate) fn compare_keys(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Integer(_) | Value::Float(_) => 1,
            Value::String(_) => 2,
            _ => 3,
        }
    }
    match (left, right) {
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Boolean(l), Value::Boolean(r)) => l.cmp(r),
        _ => match (left.to_number(), right.to_number()) {
            (Ok(Some(l)), Ok(Some(r))) if rank(left) == 1 && rank(right) == 1 => l.total_cmp(&r),
            _ => rank(left).cmp(&rank(right)),
        },
    }
}

/// `Order(set, key [, ASC | DESC | BASC | BDESC])`. The sort is stable.
#[derive(Debug)]
pub(crate) struct OrderCalc {
    set: SetOperand,
    key: CalcRef,
    descending: bool,
}

impl OrderCalc {
    pub(crate) fn new(set: SetOperand, key: CalcRef, descending: bool) -> Self {
        Self {
            set,
            key,
            descending,
        }
    }
}

impl Calc for OrderCalc {
    fn shape(&self) -> Shape {
        Shape::Set {
            arity: self.set.arity(),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![self.set.calc(), &self.key]
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let tuples = self.set.evaluate_mutable(ev)?;
        let mut keyed = Vec::with_capacity(tuples.len());
        for tuple in tuples {
            ev.check_cancel()?;
            let key = {
                let mut scope = ev.scope();
                scope.set_context_tuple(&tuple);
                self.key.evaluate(&mut scope)?
            };
            keyed.push((key, tuple));
        }
        if self.descending {
            keyed.sort_by(|a, b| compare_keys(&b.0, &a.0));
        } else {
            keyed.sort_by(|a, b| compare_keys(&a.0, &b.0));
        }
        Ok(deliver(keyed.into_iter().map(|(_, t)| t).collect(), style))
    }
}

/// `Generate(set1, set2 [, ALL])`: evaluates `set2` once per tuple of `set1` and concatenates
/// the results, dropping duplicates unless `ALL` is given.
#[derive(Debug)]
pub(crate) struct GenerateCalc {
    source: SetOperand,
    each: SetOperand,
    all: bool,
}

impl GenerateCalc {
    pub(crate) fn new(source: SetOperand, each: SetOperand, all: bool) -> Self {
        Self { source, each, all }
    }
}

impl Calc for GenerateCalc {
    fn shape(&self) -> Shape {
        Shape::Set {
            arity: self.each.arity(),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        set_value(self, ev)
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![self.source.calc(), self.each.calc()]
    }

    fn result_styles(&self) -> &'static [ResultStyle] {
        ResultStyle::ANY_SET
    }

    fn evaluate_set(&self, ev: &mut Evaluator<'_>, style: ResultStyle) -> OlapResult<TupleSet> {
        let mut limiter = ResultLimiter::new(ev.config().result_limit);
        let mut seen = ahash::AHashSet::new();
        for tuple in self.source.evaluate_iter(ev)? {
            ev.check_cancel()?;
            let generated = {
                let mut scope = ev.scope();
                scope.set_context_tuple(&tuple);
                self.each.evaluate_list(&mut scope)?
            };
            for item in generated.iter() {
                if self.all || seen.insert(item.clone()) {
                    limiter.push(item.clone())?;
                }
            }
        }
        Ok(deliver(limiter.into_tuples(), style))
    }
}
