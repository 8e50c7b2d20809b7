use crate::error::{OlapError, OlapResult};
use crate::model::Tuple;

/// Row sink that enforces the configured result limit while tuples stream in.
#[derive(Debug)]
pub(crate) struct ResultLimiter {
    limit: usize,
    tuples: Vec<Tuple>,
}

impl ResultLimiter {
    /// `limit == 0` means unlimited.
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            tuples: Vec::new(),
        }
    }

    /// Resumes limiting an already collected list, e.g. before merging more tuples into it.
    pub(crate) fn resume(limit: usize, tuples: Vec<Tuple>) -> OlapResult<Self> {
        let limiter = Self { limit, tuples };
        limiter.ensure_room(0)?;
        Ok(limiter)
    }

    fn exceeded(&self, count: usize) -> bool {
        self.limit != 0 && count > self.limit
    }

    pub(crate) fn push(&mut self, tuple: Tuple) -> OlapResult<()> {
        if self.exceeded(self.tuples.len() + 1) {
            return Err(OlapError::ResourceLimit { limit: self.limit });
        }
        self.tuples.push(tuple);
        Ok(())
    }

    /// Fails up front if `additional` more tuples would break the limit.
    pub(crate) fn ensure_room(&self, additional: usize) -> OlapResult<()> {
        if self.exceeded(self.tuples.len().saturating_add(additional)) {
            return Err(OlapError::ResourceLimit { limit: self.limit });
        }
        Ok(())
    }

    pub(crate) fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HierarchyId, Member};

    fn tuple(i: u32) -> Tuple {
        let all = Member::all(HierarchyId(1), "Store");
        Tuple::single(Member::child(&all, format!("S{i}"), i))
    }

    #[test]
    fn accepts_exactly_the_limit() {
        let mut limiter = ResultLimiter::new(3);
        for i in 0..3 {
            limiter.push(tuple(i)).unwrap();
        }
        assert_eq!(
            limiter.push(tuple(3)).unwrap_err(),
            OlapError::ResourceLimit { limit: 3 }
        );
        assert_eq!(limiter.into_tuples().len(), 3);
    }

    #[test]
    fn checks_projected_merge_before_appending() {
        let limiter = ResultLimiter::resume(2, vec![tuple(0), tuple(1)]).unwrap();
        assert!(limiter.ensure_room(0).is_ok());
        assert!(limiter.ensure_room(1).is_err());
        assert!(ResultLimiter::resume(1, vec![tuple(0), tuple(1)]).is_err());
    }

    #[test]
    fn zero_is_unlimited() {
        let mut limiter = ResultLimiter::new(0);
        for i in 0..1000 {
            limiter.push(tuple(i)).unwrap();
        }
        assert!(limiter.ensure_room(usize::MAX).is_ok());
    }
}
