mod common;

use common::sales_cube;
use formula_olap::{
    Aggregator, Calc, Category, CubeBuilder, EngineConfig, EvalEnv, Evaluator, Execution, Exp,
    FunctionTable, HierarchyId, InMemoryCube, OlapEngine, OlapError, Value,
};
use pretty_assertions::assert_eq;

/// Items `A..D` with `Y = 2, null, 4, 6` and `X = 1, 2, 3, 4`.
fn items() -> (InMemoryCube, HierarchyId) {
    let mut builder = CubeBuilder::new();
    builder
        .add_measure("Y", Aggregator::Sum)
        .add_measure("X", Aggregator::Sum);
    let item = builder.add_hierarchy("Item", &["Item"]);
    let rows: [(&str, &[(&str, f64)]); 4] = [
        ("A", &[("Y", 2.0), ("X", 1.0)]),
        ("B", &[("X", 2.0)]),
        ("C", &[("Y", 4.0), ("X", 3.0)]),
        ("D", &[("Y", 6.0), ("X", 4.0)]),
    ];
    for (name, values) in rows {
        builder.add_fact(&[(item, &[name])], values).unwrap();
    }
    (builder.build().unwrap(), item)
}

fn member_set(cube: &InMemoryCube, names: &[&str]) -> Exp {
    Exp::set(
        names
            .iter()
            .map(|n| Exp::member(&cube.member(&format!("[Item].[All].[{n}]")).unwrap()))
            .collect(),
    )
}

fn eval(cube: &InMemoryCube, exp: &Exp) -> Value {
    OlapEngine::new().evaluate(exp, cube, &[]).unwrap()
}

fn number(value: Value) -> f64 {
    match value {
        Value::Float(n) => n,
        Value::Integer(n) => n as f64,
        other => panic!("expected a number, got {other:?}"),
    }
}

#[test]
fn aggregates_skip_null_values() {
    let (cube, item) = items();
    let all_items = Exp::members_of(&cube.level(item, 1).unwrap());
    let y = Exp::member(&cube.measure("Y").unwrap());
    let call = |name: &str| Exp::call(name, vec![all_items.clone(), y.clone()]);

    assert_eq!(eval(&cube, &call("Sum")), Value::Float(12.0));
    assert_eq!(eval(&cube, &call("Avg")), Value::Float(4.0));
    assert_eq!(eval(&cube, &call("Min")), Value::Float(2.0));
    assert_eq!(eval(&cube, &call("Max")), Value::Float(6.0));
    assert_eq!(eval(&cube, &call("Median")), Value::Float(4.0));
    assert_eq!(eval(&cube, &call("VarP")), eval(&cube, &call("VarianceP")));
    assert!((number(eval(&cube, &call("Var"))) - 4.0).abs() < 1e-12);
    assert!((number(eval(&cube, &call("Stdev"))) - 2.0).abs() < 1e-12);
}

#[test]
fn count_includes_empty_cells_unless_asked_not_to() {
    let (cube, item) = items();
    let all_items = Exp::members_of(&cube.level(item, 1).unwrap());
    let y = cube.measure("Y").unwrap();

    let count = Exp::call("Count", vec![all_items.clone()]);
    assert_eq!(eval(&cube, &count), Value::Integer(4));

    let exclude = Exp::call("Count", vec![all_items.clone(), Exp::symbol("ExcludeEmpty")]);
    let value = OlapEngine::new().evaluate(&exclude, &cube, &[y]).unwrap();
    assert_eq!(value, Value::Integer(3));

    let bogus = Exp::call("Count", vec![all_items, Exp::symbol("Sometimes")]);
    let err = OlapEngine::new().evaluate(&bogus, &cube, &[]).unwrap_err();
    assert!(matches!(err, OlapError::Type(_)));
}

#[test]
fn empty_set_sums_to_zero_but_all_null_sums_to_null() {
    let sales = sales_cube();
    let measure = Exp::member(&sales.measure("Sales"));
    let engine = OlapEngine::new();

    let empty = Exp::call("Sum", vec![Exp::set(Vec::new()), measure.clone()]);
    assert_eq!(engine.evaluate(&empty, &sales.cube, &[]).unwrap(), Value::Float(0.0));

    let portland = Exp::set(vec![Exp::member(&sales.store("OR/Portland"))]);
    let nulls = Exp::call("Sum", vec![portland.clone(), measure.clone()]);
    assert_eq!(engine.evaluate(&nulls, &sales.cube, &[]).unwrap(), Value::Null);

    let avg = Exp::call("Avg", vec![portland, measure]);
    assert_eq!(engine.evaluate(&avg, &sales.cube, &[]).unwrap(), Value::Null);
}

#[test]
fn aggregate_uses_the_current_measure_aggregator() {
    let mut builder = CubeBuilder::new();
    builder
        .add_measure("Total", Aggregator::Sum)
        .add_measure("Peak", Aggregator::Max);
    let day = builder.add_hierarchy("Day", &["Day"]);
    for (name, value) in [("Mon", 3.0), ("Tue", 9.0), ("Wed", 5.0)] {
        builder
            .add_fact(&[(day, &[name])], &[("Total", value), ("Peak", value)])
            .unwrap();
    }
    let cube = builder.build().unwrap();
    let days = Exp::members_of(&cube.level(day, 1).unwrap());
    let aggregate = Exp::call("Aggregate", vec![days]);
    let engine = OlapEngine::new();

    let total = engine
        .evaluate(&aggregate, &cube, &[cube.measure("Total").unwrap()])
        .unwrap();
    assert_eq!(total, Value::Float(17.0));

    let peak = engine
        .evaluate(&aggregate, &cube, &[cube.measure("Peak").unwrap()])
        .unwrap();
    assert_eq!(peak, Value::Float(9.0));
}

#[test]
fn regression_drops_pairs_with_a_null_side() {
    let (cube, _) = items();
    let y = Exp::member(&cube.measure("Y").unwrap());
    let x = Exp::member(&cube.measure("X").unwrap());
    let all = member_set(&cube, &["A", "B", "C", "D"]);
    let without_b = member_set(&cube, &["A", "C", "D"]);

    for stat in ["LinRegSlope", "LinRegIntercept", "LinRegR2", "LinRegVariance"] {
        let with_null = Exp::call(stat, vec![all.clone(), y.clone(), x.clone()]);
        let dropped = Exp::call(stat, vec![without_b.clone(), y.clone(), x.clone()]);
        assert_eq!(eval(&cube, &with_null), eval(&cube, &dropped), "{stat}");
    }

    // (1, 2), (3, 4), (4, 6)
    let slope = number(eval(&cube, &Exp::call("LinRegSlope", vec![all.clone(), y.clone(), x.clone()])));
    assert!((slope - 9.0 / 7.0).abs() < 1e-12);

    let point = Exp::call("LinRegPoint", vec![Exp::number(0.0), all, y, x]);
    let intercept = number(eval(&cube, &point));
    assert!((intercept - 4.0 / 7.0).abs() < 1e-12);
}

#[test]
fn regression_defaults_x_to_the_position_in_the_set() {
    let (cube, _) = items();
    let y = Exp::member(&cube.measure("Y").unwrap());
    let x = Exp::member(&cube.measure("X").unwrap());
    let all = member_set(&cube, &["A", "B", "C", "D"]);

    // Positions count every tuple visited, so X and the position coincide here.
    let positional = Exp::call("LinRegSlope", vec![all.clone(), y.clone()]);
    let explicit = Exp::call("LinRegSlope", vec![all, y, x]);
    assert_eq!(eval(&cube, &positional), eval(&cube, &explicit));
}

#[test]
fn covariance_and_correlation() {
    let (cube, _) = items();
    let y = Exp::member(&cube.measure("Y").unwrap());
    let x = Exp::member(&cube.measure("X").unwrap());
    let all = member_set(&cube, &["A", "C", "D"]);

    // Pairs (1, 2), (3, 4), (4, 6): means 8/3 and 4.
    let cov = number(eval(&cube, &Exp::call("Covariance", vec![all.clone(), x.clone(), y.clone()])));
    assert!((cov - 2.0).abs() < 1e-12);
    let cov_n = number(eval(&cube, &Exp::call("CovarianceN", vec![all.clone(), x.clone(), y.clone()])));
    assert!((cov_n - 3.0).abs() < 1e-12);

    let corr = number(eval(&cube, &Exp::call("Correlation", vec![all, x, y])));
    assert!(corr > 0.95 && corr <= 1.0);
}

#[test]
fn percentile_interpolates_between_ranks() {
    let (cube, item) = items();
    let all_items = Exp::members_of(&cube.level(item, 1).unwrap());
    let y = Exp::member(&cube.measure("Y").unwrap());

    let p25 = Exp::call("Percentile", vec![all_items.clone(), y.clone(), Exp::integer(25)]);
    assert_eq!(eval(&cube, &p25), Value::Float(3.0));
    let p100 = Exp::call("Percentile", vec![all_items, y, Exp::integer(100)]);
    assert_eq!(eval(&cube, &p100), Value::Float(6.0));
}

#[test]
fn aggregates_see_empty_tuples_inside_a_non_empty_context() {
    let sales = sales_cube();
    let cross = Exp::call(
        "CrossJoin",
        vec![
            Exp::members_of(&sales.cities()),
            Exp::members_of(&sales.categories()),
        ],
    );
    let count = Exp::call("Count", vec![cross.clone()]);
    let slope = Exp::call(
        "LinRegSlope",
        vec![cross, Exp::member(&sales.measure("Sales"))],
    );

    let engine = OlapEngine::new();
    let functions = FunctionTable::with_builtins();
    let config = EngineConfig::default();
    let execution = Execution::default();
    let mut ev = Evaluator::new(EvalEnv {
        schema: &sales.cube,
        backend: &sales.cube,
        functions: &functions,
        config: &config,
        execution: &execution,
    });

    let mut values = Vec::new();
    for exp in [count, slope] {
        let calc = engine.compiler().compile(&exp, Category::Value).unwrap();
        ev.set_non_empty(false);
        let expected = calc.evaluate(&mut ev).unwrap();
        ev.set_non_empty(true);
        assert_eq!(calc.evaluate(&mut ev).unwrap(), expected, "{exp}");
        assert!(ev.is_non_empty());
        values.push(expected);
    }
    // Four cities by four categories, empty ones included.
    assert_eq!(values[0], Value::Integer(16));
}
