use super::{CallSite, FunctionImpl, FunctionSpec, FunctionTable, Returns};
use crate::calc::aggregate::{
    AggregateCalc, AvgCalc, CountCalc, LinRegCalc, LinRegStat, MinMaxCalc, PairStat,
    PairwiseCalc, PercentileCalc, SumCalc, VarianceCalc, ACCEPTS,
};
use crate::calc::{CalcRef, SetOperand};
use crate::compiler::Compiler;
use crate::error::{OlapError, OlapResult};
use crate::stats::Dispersion;
use crate::syntax::Syntax;
use crate::value::{Category, Shape};
use std::sync::Arc;

const SET_VALUE: &[Category] = &[Category::Set, Category::Numeric];
const SET_Y_X: &[Category] = &[Category::Set, Category::Numeric, Category::Numeric];

fn register_fn(
    table: &mut FunctionTable,
    name: &'static str,
    args: (usize, usize),
    arg_types: &'static [Category],
    returns: Shape,
    implementation: FunctionImpl,
) {
    table.register(FunctionSpec {
        name,
        syntax: Syntax::Function,
        min_args: args.0,
        max_args: args.1,
        return_type: Returns::Fixed(returns),
        arg_types,
        implementation,
    });
}

pub(super) fn register(table: &mut FunctionTable) {
    register_fn(
        table,
        "Count",
        (1, 2),
        &[Category::Set, Category::Symbol],
        Shape::Integer,
        count,
    );
    register_fn(table, "Sum", (1, 2), SET_VALUE, Shape::Float, sum);
    register_fn(table, "Avg", (1, 2), SET_VALUE, Shape::Float, avg);
    register_fn(table, "Min", (1, 2), SET_VALUE, Shape::Float, min);
    register_fn(table, "Max", (1, 2), SET_VALUE, Shape::Float, max);
    register_fn(table, "Median", (1, 2), SET_VALUE, Shape::Float, median);
    register_fn(table, "Percentile", (3, 3), SET_Y_X, Shape::Float, percentile);
    for name in ["Var", "Variance"] {
        register_fn(table, name, (1, 2), SET_VALUE, Shape::Float, var);
    }
    for name in ["VarP", "VarianceP"] {
        register_fn(table, name, (1, 2), SET_VALUE, Shape::Float, var_p);
    }
    for name in ["Stdev", "Stddev"] {
        register_fn(table, name, (1, 2), SET_VALUE, Shape::Float, stdev);
    }
    for name in ["StdevP", "StddevP"] {
        register_fn(table, name, (1, 2), SET_VALUE, Shape::Float, stdev_p);
    }
    register_fn(table, "LinRegSlope", (2, 3), SET_Y_X, Shape::Float, lin_reg_slope);
    register_fn(table, "LinRegIntercept", (2, 3), SET_Y_X, Shape::Float, lin_reg_intercept);
    register_fn(table, "LinRegR2", (2, 3), SET_Y_X, Shape::Float, lin_reg_r2);
    register_fn(table, "LinRegVariance", (2, 3), SET_Y_X, Shape::Float, lin_reg_variance);
    register_fn(
        table,
        "LinRegPoint",
        (3, 4),
        &[Category::Numeric, Category::Set, Category::Numeric, Category::Numeric],
        Shape::Float,
        lin_reg_point,
    );
    register_fn(table, "Covariance", (2, 3), SET_Y_X, Shape::Float, covariance);
    register_fn(table, "CovarianceN", (2, 3), SET_Y_X, Shape::Float, covariance_n);
    register_fn(table, "Correlation", (2, 3), SET_Y_X, Shape::Float, correlation);
    register_fn(table, "Aggregate", (1, 2), SET_VALUE, Shape::Scalar, aggregate);
}

fn set_arg(compiler: &Compiler<'_>, site: &CallSite<'_>, idx: usize) -> OlapResult<SetOperand> {
    compiler.compile_set(&site.args[idx], ACCEPTS)
}

fn count(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    let exclude_empty = match site.flag(1).as_deref() {
        None | Some("INCLUDEEMPTY") => false,
        Some("EXCLUDEEMPTY") => true,
        Some(other) => {
            return Err(OlapError::Type(format!(
                "{}: unknown flag {other}",
                site.exp
            )))
        }
    };
    Ok(Arc::new(CountCalc::new(
        set_arg(compiler, site, 0)?,
        exclude_empty,
    )))
}

fn sum(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(SumCalc::new(
        set_arg(compiler, site, 0)?,
        site.opt_arg(compiler, 1)?,
    )))
}

fn avg(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(AvgCalc::new(
        set_arg(compiler, site, 0)?,
        site.opt_arg(compiler, 1)?,
    )))
}

fn min(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(MinMaxCalc::min(
        set_arg(compiler, site, 0)?,
        site.opt_arg(compiler, 1)?,
    )))
}

fn max(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(MinMaxCalc::max(
        set_arg(compiler, site, 0)?,
        site.opt_arg(compiler, 1)?,
    )))
}

fn median(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(PercentileCalc::median(
        set_arg(compiler, site, 0)?,
        site.opt_arg(compiler, 1)?,
    )))
}

fn percentile(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(PercentileCalc::percentile(
        set_arg(compiler, site, 0)?,
        site.arg(compiler, 1)?,
        site.arg(compiler, 2)?,
    )))
}

fn dispersion(
    compiler: &Compiler<'_>,
    site: &CallSite<'_>,
    kind: Dispersion,
    sqrt: bool,
) -> OlapResult<CalcRef> {
    Ok(Arc::new(VarianceCalc::new(
        set_arg(compiler, site, 0)?,
        site.opt_arg(compiler, 1)?,
        kind,
        sqrt,
    )))
}

fn var(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    dispersion(compiler, site, Dispersion::Sample, false)
}

fn var_p(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    dispersion(compiler, site, Dispersion::Population, false)
}

fn stdev(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    dispersion(compiler, site, Dispersion::Sample, true)
}

fn stdev_p(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    dispersion(compiler, site, Dispersion::Population, true)
}

fn lin_reg(compiler: &Compiler<'_>, site: &CallSite<'_>, stat: LinRegStat) -> OlapResult<CalcRef> {
    Ok(Arc::new(LinRegCalc::new(
        stat,
        set_arg(compiler, site, 0)?,
        site.arg(compiler, 1)?,
        site.opt_arg(compiler, 2)?,
    )))
}

fn lin_reg_slope(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    lin_reg(compiler, site, LinRegStat::Slope)
}

fn lin_reg_intercept(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    lin_reg(compiler, site, LinRegStat::Intercept)
}

fn lin_reg_r2(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    lin_reg(compiler, site, LinRegStat::R2)
}

fn lin_reg_variance(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    lin_reg(compiler, site, LinRegStat::Variance)
}

/// `LinRegPoint(x, set, y [, x_expr])`: the forecast point comes first.
fn lin_reg_point(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(LinRegCalc::new(
        LinRegStat::Point(site.arg(compiler, 0)?),
        set_arg(compiler, site, 1)?,
        site.arg(compiler, 2)?,
        site.opt_arg(compiler, 3)?,
    )))
}

fn pairwise(compiler: &Compiler<'_>, site: &CallSite<'_>, stat: PairStat) -> OlapResult<CalcRef> {
    Ok(Arc::new(PairwiseCalc::new(
        stat,
        set_arg(compiler, site, 0)?,
        site.arg(compiler, 1)?,
        site.opt_arg(compiler, 2)?,
    )))
}

fn covariance(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    pairwise(compiler, site, PairStat::Covariance(Dispersion::Population))
}

fn covariance_n(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    pairwise(compiler, site, PairStat::Covariance(Dispersion::Sample))
}

fn correlation(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    pairwise(compiler, site, PairStat::Correlation)
}

fn aggregate(compiler: &Compiler<'_>, site: &CallSite<'_>) -> OlapResult<CalcRef> {
    Ok(Arc::new(AggregateCalc::new(
        set_arg(compiler, site, 0)?,
        site.opt_arg(compiler, 1)?,
    )))
}
