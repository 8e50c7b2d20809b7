mod common;

use common::sales_cube;
use formula_olap::{Category, Exp, OlapEngine, OlapError, ResultStyle, Shape, Value};
use pretty_assertions::assert_eq;

#[test]
fn type_of_reports_natural_shapes() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let compiler = engine.compiler();

    let crossjoin = Exp::call(
        "CrossJoin",
        vec![
            Exp::members_of(&sales.cities()),
            Exp::members_of(&sales.categories()),
        ],
    );
    assert_eq!(compiler.type_of(&crossjoin).unwrap(), Shape::Set { arity: 2 });
    assert_eq!(
        compiler.type_of(&Exp::members_of(&sales.years())).unwrap(),
        Shape::Set { arity: 1 }
    );
    assert_eq!(
        compiler.type_of(&Exp::member(&sales.store("CA"))).unwrap(),
        Shape::Member
    );

    let iif = Exp::call(
        "IIf",
        vec![Exp::boolean(true), Exp::integer(1), Exp::number(2.5)],
    );
    assert_eq!(compiler.type_of(&iif).unwrap(), Shape::Float);
}

#[test]
fn requested_category_inserts_a_conversion() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let compiler = engine.compiler();

    let text = compiler.compile(&Exp::integer(3), Category::String).unwrap();
    assert_eq!(text.shape(), Shape::String);
    assert_eq!(
        engine.evaluate_calc(&text, &sales.cube, &[]).unwrap(),
        Value::String("3".into())
    );

    let truncated = compiler.compile(&Exp::number(2.75), Category::Integer).unwrap();
    assert_eq!(truncated.shape(), Shape::Integer);
    assert_eq!(
        engine.evaluate_calc(&truncated, &sales.cube, &[]).unwrap(),
        Value::Integer(2)
    );
}

#[test]
fn level_cannot_become_a_number() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let err = engine
        .compiler()
        .compile(&Exp::level(&sales.cities()), Category::Numeric)
        .unwrap_err();
    assert!(matches!(
        err,
        OlapError::NoConversion {
            from: Shape::Level,
            to: Category::Numeric,
            ..
        }
    ));
    assert!(err.is_compile_error());
}

#[test]
fn hierarchy_used_as_member_is_its_current_member() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let store = sales.hierarchy(sales.store);
    let calc = engine
        .compiler()
        .compile(&Exp::hierarchy(&store), Category::Member)
        .unwrap();
    assert_eq!(calc.shape(), Shape::Member);

    assert_eq!(
        engine.evaluate_calc(&calc, &sales.cube, &[]).unwrap(),
        Value::Member(store.default_member().clone())
    );
    let sf = sales.store("CA/SF");
    assert_eq!(
        engine.evaluate_calc(&calc, &sales.cube, &[sf.clone()]).unwrap(),
        Value::Member(sf)
    );
}

#[test]
fn unknown_function_is_a_compile_error() {
    let engine = OlapEngine::new();
    let err = engine
        .compiler()
        .compile(&Exp::call("Frobnicate", vec![Exp::integer(1)]), Category::Value)
        .unwrap_err();
    assert!(matches!(err, OlapError::NoMatchingFunction { ref name, .. } if name == "Frobnicate"));
}

#[test]
fn wrong_argument_count_is_a_compile_error() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let err = engine
        .compiler()
        .compile(
            &Exp::call("TopCount", vec![Exp::members_of(&sales.cities())]),
            Category::Set,
        )
        .unwrap_err();
    assert!(matches!(err, OlapError::NoMatchingFunction { .. }));
}

#[test]
fn set_representation_is_negotiated() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let compiler = engine.compiler();
    let cities = Exp::members_of(&sales.cities());

    let shared = compiler.compile_set(&cities, ResultStyle::MUTATE).unwrap();
    assert_eq!(shared.style(), ResultStyle::List);

    let crossjoin = Exp::call(
        "CrossJoin",
        vec![cities.clone(), Exp::members_of(&sales.categories())],
    );
    let fresh = compiler.compile_set(&crossjoin, ResultStyle::MUTATE).unwrap();
    assert_eq!(fresh.style(), ResultStyle::MutableList);
    assert_eq!(fresh.arity(), 2);

    let iterable = compiler.compile_set(&crossjoin, ResultStyle::ITERATE).unwrap();
    assert_eq!(iterable.style(), ResultStyle::Iterable);
}

#[test]
fn shared_list_cannot_be_handed_out_for_mutation_only() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let err = engine
        .compiler()
        .compile_set(&Exp::members_of(&sales.cities()), &[ResultStyle::MutableList])
        .unwrap_err();
    match err {
        OlapError::NoAcceptableRepresentation {
            produced, accepted, ..
        } => {
            assert_eq!(produced, vec![ResultStyle::Iterable, ResultStyle::List]);
            assert_eq!(accepted, vec![ResultStyle::MutableList]);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn member_is_promoted_to_a_singleton_set() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let tuples = engine
        .evaluate_set(&Exp::member(&sales.store("WA")), &sales.cube, &[])
        .unwrap();
    assert_eq!(common::names(&tuples), vec!["WA"]);
}
