use super::{Calc, CalcRef};
use crate::error::{OlapError, OlapResult};
use crate::evaluator::Evaluator;
use crate::model::{HierarchyId, Member, Tuple};
use crate::value::{Shape, Value};

#[derive(Debug)]
pub(crate) struct MemberConstantCalc {
    member: Member,
}

impl MemberConstantCalc {
    pub(crate) fn new(member: Member) -> Self {
        Self { member }
    }
}

impl Calc for MemberConstantCalc {
    fn shape(&self) -> Shape {
        Shape::Member
    }

    fn evaluate(&self, _ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(Value::Member(self.member.clone()))
    }

    fn depends_on(&self, _hierarchy: HierarchyId) -> bool {
        false
    }
}

/// `<Hierarchy>.CurrentMember`
#[derive(Debug)]
pub(crate) struct CurrentMemberCalc {
    hierarchy: HierarchyId,
}

impl CurrentMemberCalc {
    pub(crate) fn new(hierarchy: HierarchyId) -> Self {
        Self { hierarchy }
    }
}

impl Calc for CurrentMemberCalc {
    fn shape(&self) -> Shape {
        Shape::Member
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(Value::Member(ev.current_member(self.hierarchy).clone()))
    }

    fn depends_on(&self, hierarchy: HierarchyId) -> bool {
        hierarchy == self.hierarchy
    }
}

/// `<Member>.Parent`; null for a root member.
#[derive(Debug)]
pub(crate) struct ParentCalc {
    member: CalcRef,
}

impl ParentCalc {
    pub(crate) fn new(member: CalcRef) -> Self {
        Self { member }
    }
}

impl Calc for ParentCalc {
    fn shape(&self) -> Shape {
        Shape::Member
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let member = self.member.evaluate_member(ev)?;
        Ok(member.parent().cloned().map_or(Value::Null, Value::Member))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.member]
    }
}

/// `(m1, m2, ...)`
#[derive(Debug)]
pub(crate) struct TupleCalc {
    members: Vec<CalcRef>,
}

impl TupleCalc {
    pub(crate) fn new(members: Vec<CalcRef>) -> Self {
        Self { members }
    }
}

impl Calc for TupleCalc {
    fn shape(&self) -> Shape {
        Shape::Tuple {
            arity: self.members.len(),
        }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        let mut members = Vec::with_capacity(self.members.len());
        for calc in &self.members {
            let member = calc.evaluate_member(ev)?;
            if members.iter().any(|m: &Member| m.hierarchy() == member.hierarchy()) {
                return Err(OlapError::Eval(format!(
                    "tuple contains more than one member of the hierarchy of {member}"
                )));
            }
            members.push(member);
        }
        Ok(Value::Tuple(Tuple::new(members)))
    }

    fn children(&self) -> Vec<&CalcRef> {
        self.members.iter().collect()
    }
}

#[derive(Debug)]
pub(crate) struct MemberToTupleCalc {
    member: CalcRef,
}

impl MemberToTupleCalc {
    pub(crate) fn new(member: CalcRef) -> Self {
        Self { member }
    }
}

impl Calc for MemberToTupleCalc {
    fn shape(&self) -> Shape {
        Shape::Tuple { arity: 1 }
    }

    fn evaluate(&self, ev: &mut Evaluator<'_>) -> OlapResult<Value> {
        Ok(Value::Tuple(Tuple::single(self.member.evaluate_member(ev)?)))
    }

    fn children(&self) -> Vec<&CalcRef> {
        vec![&self.member]
    }
}
