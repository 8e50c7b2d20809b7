mod common;

use common::{names, native_config, sales_cube, sorted_names};
use formula_olap::{EngineConfig, Exp, Member, NativeAlertMode, OlapEngine, OlapError};
use pretty_assertions::assert_eq;

fn city_by_category(cube: &common::SalesCube) -> Exp {
    Exp::call(
        "NonEmptyCrossJoin",
        vec![
            Exp::members_of(&cube.cities()),
            Exp::members_of(&cube.categories()),
        ],
    )
}

#[test]
fn native_non_empty_crossjoin_matches_interpreted() {
    let sales = sales_cube();
    let exp = city_by_category(&sales);
    let expected = vec!["SF/Drink", "SF/Food", "LA/Food", "Seattle/Drink", "Seattle/NonFood"];

    let native = OlapEngine::with_config(native_config())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(names(&native), expected);
    assert_eq!(sales.cube.native_executions(), 1);

    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(names(&interpreted), expected);
    assert_eq!(sales.cube.native_executions(), 1);
}

#[test]
fn non_emptiness_follows_the_current_measure() {
    let sales = sales_cube();
    let exp = city_by_category(&sales);
    let units = sales.measure("Units");

    for config in [native_config(), EngineConfig::interpreted_only()] {
        let tuples = OlapEngine::with_config(config)
            .evaluate_set(&exp, &sales.cube, &[units.clone()])
            .unwrap();
        assert_eq!(
            names(&tuples),
            vec!["SF/Drink", "SF/Food", "LA/Food", "Seattle/Drink"]
        );
    }
}

#[test]
fn context_members_constrain_native_rows() {
    let sales = sales_cube();
    let exp = city_by_category(&sales);
    let year = sales.time("2024");

    for config in [native_config(), EngineConfig::interpreted_only()] {
        let tuples = OlapEngine::with_config(config)
            .evaluate_set(&exp, &sales.cube, &[year.clone()])
            .unwrap();
        assert_eq!(names(&tuples), vec!["SF/Drink", "LA/Food", "Seattle/Drink"]);
    }
    assert_eq!(sales.cube.native_executions(), 1);
}

#[test]
fn small_operands_stay_interpreted() {
    let sales = sales_cube();
    let exp = city_by_category(&sales);

    // Four cities by four categories.
    let at = EngineConfig {
        native_min_threshold: 16,
        ..EngineConfig::default()
    };
    OlapEngine::with_config(at)
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(sales.cube.native_executions(), 0);

    let below = EngineConfig {
        native_min_threshold: 15,
        ..EngineConfig::default()
    };
    OlapEngine::with_config(below)
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(sales.cube.native_executions(), 1);
}

#[test]
fn disabled_operator_is_not_delegated() {
    let sales = sales_cube();
    let config = EngineConfig {
        enable_native_crossjoin: false,
        ..native_config()
    };
    let tuples = OlapEngine::with_config(config)
        .evaluate_set(&city_by_category(&sales), &sales.cube, &[])
        .unwrap();
    assert_eq!(tuples.len(), 5);
    assert_eq!(sales.cube.native_executions(), 0);
}

#[test]
fn ragged_hierarchy_disqualifies_native_evaluation() {
    use formula_olap::{Aggregator, CubeBuilder};

    let mut builder = CubeBuilder::new();
    builder.add_measure("Sales", Aggregator::Sum);
    let geo = builder.add_hierarchy("Geo", &["Country", "City"]);
    let product = builder.add_hierarchy("Product", &["Category"]);
    builder.set_ragged(geo, true).unwrap();
    builder
        .add_fact(&[(geo, &["US", "Boston"]), (product, &["Drink"])], &[("Sales", 1.0)])
        .unwrap();
    let cube = builder.build().unwrap();

    let exp = Exp::call(
        "NonEmptyCrossJoin",
        vec![
            Exp::members_of(&cube.level(geo, 2).unwrap()),
            Exp::members_of(&cube.level(product, 1).unwrap()),
        ],
    );
    let tuples = OlapEngine::with_config(native_config())
        .evaluate_set(&exp, &cube, &[])
        .unwrap();
    assert_eq!(names(&tuples), vec!["Boston/Drink"]);
    assert_eq!(cube.native_executions(), 0);
}

#[test]
fn result_limit_applies_to_native_rows() {
    let sales = sales_cube();
    let exp = city_by_category(&sales);

    let fits = EngineConfig {
        result_limit: 5,
        ..native_config()
    };
    let tuples = OlapEngine::with_config(fits)
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(tuples.len(), 5);

    let tight = EngineConfig {
        result_limit: 4,
        ..native_config()
    };
    let err = OlapEngine::with_config(tight)
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap_err();
    assert_eq!(err, OlapError::ResourceLimit { limit: 4 });
}

fn with_beverages(sales: &common::SalesCube) -> (Exp, Member) {
    let product_all = sales.hierarchy(sales.product).default_member().clone();
    let beverages = Member::calculated(
        &product_all,
        "Beverages",
        Exp::call(
            "Aggregate",
            vec![Exp::set(vec![
                Exp::member(&sales.product("Drink")),
                Exp::member(&sales.product("Food")),
            ])],
        ),
        0,
    );
    let products = Exp::set(
        ["Drink", "Food", "NonFood", "Toys"]
            .iter()
            .map(|name| Exp::member(&sales.product(name)))
            .chain(std::iter::once(Exp::member(&beverages)))
            .collect(),
    );
    let exp = Exp::call(
        "NonEmptyCrossJoin",
        vec![Exp::members_of(&sales.cities()), products],
    );
    (exp, beverages)
}

#[test]
fn calculated_members_are_merged_after_native_rows() {
    let sales = sales_cube();
    let (exp, _) = with_beverages(&sales);

    let native = OlapEngine::with_config(native_config())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(sales.cube.native_executions(), 1);
    assert_eq!(
        names(&native),
        vec![
            "SF/Drink",
            "SF/Food",
            "LA/Food",
            "Seattle/Drink",
            "Seattle/NonFood",
            "SF/Beverages",
            "LA/Beverages",
            "Seattle/Beverages",
        ]
    );

    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(sorted_names(&native), sorted_names(&interpreted));
}

#[test]
fn merged_calculated_members_count_against_the_limit() {
    let sales = sales_cube();
    let (exp, _) = with_beverages(&sales);

    let fits = EngineConfig {
        result_limit: 8,
        ..native_config()
    };
    assert_eq!(
        OlapEngine::with_config(fits)
            .evaluate_set(&exp, &sales.cube, &[])
            .unwrap()
            .len(),
        8
    );

    let tight = EngineConfig {
        result_limit: 5,
        ..native_config()
    };
    let err = OlapEngine::with_config(tight)
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap_err();
    assert_eq!(err, OlapError::ResourceLimit { limit: 5 });
    // The native rows fit; the merge broke the limit.
    assert_eq!(sales.cube.native_executions(), 2);
}

#[test]
fn top_count_ranks_by_measure() {
    let sales = sales_cube();
    let exp = Exp::call(
        "TopCount",
        vec![
            Exp::members_of(&sales.cities()),
            Exp::integer(2),
            Exp::member(&sales.measure("Sales")),
        ],
    );

    let native = OlapEngine::with_config(native_config())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(names(&native), vec!["Seattle", "SF"]);
    assert_eq!(sales.cube.native_executions(), 1);

    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(names(&interpreted), vec!["Seattle", "SF"]);
}

#[test]
fn top_count_without_measure_uses_current_measure_natively() {
    let sales = sales_cube();
    let exp = Exp::call(
        "TopCount",
        vec![Exp::members_of(&sales.cities()), Exp::integer(2)],
    );
    // No threshold applies to the two-argument form.
    let tuples = OlapEngine::new()
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(names(&tuples), vec!["Seattle", "SF"]);
    assert_eq!(sales.cube.native_executions(), 1);
}

#[test]
fn unsupported_top_count_follows_the_alert_mode() {
    let sales = sales_cube();
    sales.cube.set_native_enabled(false);
    let exp = Exp::call(
        "TopCount",
        vec![Exp::members_of(&sales.cities()), Exp::integer(2)],
    );

    for mode in [NativeAlertMode::SilentFallback, NativeAlertMode::WarnAndFallback] {
        let config = EngineConfig {
            alert_native_unsupported: mode,
            ..EngineConfig::default()
        };
        let tuples = OlapEngine::with_config(config)
            .evaluate_set(&exp, &sales.cube, &[])
            .unwrap();
        assert_eq!(names(&tuples), vec!["SF", "LA"]);
    }

    let config = EngineConfig {
        alert_native_unsupported: NativeAlertMode::Error,
        ..EngineConfig::default()
    };
    let err = OlapEngine::with_config(config)
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap_err();
    assert!(matches!(err, OlapError::NativeUnsupported { .. }));
    assert_eq!(sales.cube.native_executions(), 0);
}

#[test]
fn filter_on_measure_comparison() {
    let sales = sales_cube();
    let exp = Exp::call(
        "Filter",
        vec![
            Exp::members_of(&sales.cities()),
            Exp::infix(">", Exp::member(&sales.measure("Sales")), Exp::integer(25)),
        ],
    );

    let native = OlapEngine::with_config(native_config())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(names(&native), vec!["SF", "Seattle"]);
    assert_eq!(sales.cube.native_executions(), 1);

    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only())
        .evaluate_set(&exp, &sales.cube, &[])
        .unwrap();
    assert_eq!(names(&interpreted), vec!["SF", "Seattle"]);
}

#[test]
fn unsafe_calculated_measure_falls_back_to_interpretation() {
    let sales = sales_cube();
    let doubled = Member::calculated_measure(
        sales.measure("Sales").hierarchy(),
        "Doubled",
        Exp::infix("*", Exp::member(&sales.measure("Sales")), Exp::integer(2)),
        0,
    );
    let tuples = OlapEngine::with_config(native_config())
        .evaluate_set(&city_by_category(&sales), &sales.cube, &[doubled])
        .unwrap();
    assert_eq!(tuples.len(), 5);
    assert_eq!(sales.cube.native_executions(), 0);
}

/// Evaluates `exp` natively and interpreted with `measure` in context; returns the native
/// executions spent and the shared result.
fn both_ways(sales: &common::SalesCube, exp: &Exp, measure: &Member) -> (usize, Vec<String>) {
    let before = sales.cube.native_executions();
    let native = OlapEngine::with_config(native_config())
        .evaluate_set(exp, &sales.cube, &[measure.clone()])
        .unwrap();
    let executions = sales.cube.native_executions() - before;
    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only())
        .evaluate_set(exp, &sales.cube, &[measure.clone()])
        .unwrap();
    assert_eq!(names(&native), names(&interpreted));
    (executions, names(&native))
}

#[test]
fn conditional_measures_keep_native_and_interpreted_rows_equal() {
    let sales = sales_cube();
    let amount = sales.measure("Sales");
    let calc = |name: &str, exp: Exp| Member::calculated_measure(amount.hierarchy(), name, exp, 0);
    let large = Exp::infix(">", Exp::member(&amount), Exp::integer(25));
    let exp = city_by_category(&sales);
    let with_sales: Vec<String> = ["SF/Drink", "SF/Food", "LA/Food", "Seattle/Drink", "Seattle/NonFood"]
        .into_iter()
        .map(String::from)
        .collect();

    let alias = calc("Alias", Exp::member(&amount));
    assert_eq!(both_ways(&sales, &exp, &alias), (1, with_sales.clone()));

    let same_either_way = calc(
        "SameEitherWay",
        Exp::call("IIf", vec![large.clone(), Exp::member(&alias), Exp::member(&amount)]),
    );
    assert_eq!(both_ways(&sales, &exp, &same_either_way), (1, with_sales));

    // Zero where Sales is empty: every combination has a value.
    let zero_filled = calc(
        "ZeroFilled",
        Exp::call(
            "IIf",
            vec![
                Exp::call("IsEmpty", vec![Exp::member(&amount)]),
                Exp::integer(0),
                Exp::member(&amount),
            ],
        ),
    );
    let (executions, rows) = both_ways(&sales, &exp, &zero_filled);
    assert_eq!((executions, rows.len()), (0, 16));

    let large_only = calc(
        "LargeOnly",
        Exp::call("IIf", vec![large, Exp::member(&amount), Exp::null()]),
    );
    assert_eq!(
        both_ways(&sales, &exp, &large_only),
        (0, vec!["SF/Food".to_string(), "Seattle/Drink".into(), "Seattle/NonFood".into()])
    );
}

#[test]
fn conditional_measure_is_delegated_when_empty_rows_are_kept() {
    let sales = sales_cube();
    let amount = sales.measure("Sales");
    let zero_filled = Member::calculated_measure(
        amount.hierarchy(),
        "ZeroFilled",
        Exp::call(
            "IIf",
            vec![
                Exp::call("IsEmpty", vec![Exp::member(&amount)]),
                Exp::integer(0),
                Exp::member(&amount),
            ],
        ),
        0,
    );
    let exp = Exp::call(
        "CrossJoin",
        vec![
            Exp::members_of(&sales.cities()),
            Exp::members_of(&sales.categories()),
        ],
    );
    let (executions, rows) = both_ways(&sales, &exp, &zero_filled);
    assert_eq!((executions, rows.len()), (1, 16));
}

#[test]
fn aggregate_member_in_context_becomes_a_slicer_constraint() {
    let sales = sales_cube();
    let time_all = sales.hierarchy(sales.time).default_member().clone();
    let first_quarters = Member::calculated(
        &time_all,
        "First quarters",
        Exp::call(
            "Aggregate",
            vec![Exp::set(vec![
                Exp::member(&sales.time("2023/Q1")),
                Exp::member(&sales.time("2024/Q1")),
            ])],
        ),
        0,
    );

    let expected = vec!["SF/Drink", "SF/Food", "LA/Food"];
    let native = OlapEngine::with_config(native_config())
        .evaluate_set(&city_by_category(&sales), &sales.cube, &[first_quarters.clone()])
        .unwrap();
    assert_eq!(names(&native), expected);
    assert_eq!(sales.cube.native_executions(), 1);

    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only())
        .evaluate_set(&city_by_category(&sales), &sales.cube, &[first_quarters])
        .unwrap();
    assert_eq!(names(&interpreted), expected);
}

#[test]
fn self_referencing_slicer_is_an_evaluation_loop() {
    let sales = sales_cube();
    let exp = Exp::call(
        "NonEmptyCrossJoin",
        vec![
            Exp::members_of(&sales.states()),
            Exp::members_of(&sales.categories()),
        ],
    );
    let time_all = sales.hierarchy(sales.time).default_member().clone();
    let looping = Member::calculated(
        &time_all,
        "Looping",
        Exp::call("Aggregate", vec![exp.clone()]),
        0,
    );

    let err = OlapEngine::with_config(native_config())
        .evaluate_set(&exp, &sales.cube, &[looping])
        .unwrap_err();
    assert_eq!(
        err,
        OlapError::EvaluationLoop {
            expression: exp.to_string(),
        }
    );
}
