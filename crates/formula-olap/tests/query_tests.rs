mod common;

use common::{names, sales_cube, SalesCube};
use formula_olap::{
    Axis, CellValue, EngineConfig, Execution, Exp, Member, OlapEngine, OlapError, Query, Value,
};
use pretty_assertions::assert_eq;

fn measures(sales: &SalesCube, names: &[&str]) -> Exp {
    Exp::set(
        names
            .iter()
            .map(|n| Exp::member(&sales.measure(n)))
            .collect(),
    )
}

fn numbers(cells: &[CellValue]) -> Vec<Option<f64>> {
    cells.iter().map(CellValue::as_number).collect()
}

#[test]
fn cells_are_laid_out_with_the_first_axis_fastest() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![
            Axis::new(measures(&sales, &["Sales", "Units"])),
            Axis::new(Exp::members_of(&sales.cities())),
        ],
        slicer: None,
    };
    let prepared = engine.prepare(&query).unwrap();
    let result = engine.execute(&prepared, &sales.cube).unwrap();

    assert_eq!(names(&result.axes[1]), vec!["SF", "LA", "Seattle", "Portland"]);
    assert_eq!(
        numbers(&result.cells),
        vec![
            Some(50.0),
            Some(11.0),
            Some(20.0),
            Some(2.0),
            Some(80.0),
            Some(3.0),
            None,
            None,
        ]
    );
    assert_eq!(
        result.cell(&[1, 2]),
        Some(&CellValue::Value(Value::Float(3.0)))
    );
    assert_eq!(result.cell(&[0, 4]), None);
    assert!(result.cell(&[0, 3]).unwrap().is_empty());
}

#[test]
fn prepared_query_can_run_repeatedly() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![Axis::new(Exp::members_of(&sales.states()))],
        slicer: None,
    };
    let prepared = engine.prepare(&query).unwrap();
    let first = engine.execute(&prepared, &sales.cube).unwrap();
    let second = engine.execute(&prepared, &sales.cube).unwrap();
    assert_eq!(first, second);
    assert_eq!(numbers(&first.cells), vec![Some(70.0), Some(80.0), None]);
}

#[test]
fn non_empty_axis_drops_empty_positions() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![
            Axis::new(measures(&sales, &["Sales"])),
            Axis::non_empty(Exp::members_of(&sales.cities())),
        ],
        slicer: None,
    };
    let result = engine
        .execute(&engine.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert_eq!(names(&result.axes[1]), vec!["SF", "LA", "Seattle"]);
    assert_eq!(numbers(&result.cells), vec![Some(50.0), Some(20.0), Some(80.0)]);
}

#[test]
fn single_tuple_slicer_sets_the_context() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![Axis::new(Exp::members_of(&sales.cities()))],
        slicer: Some(Exp::set(vec![Exp::member(&sales.time("2024"))])),
    };
    let result = engine
        .execute(&engine.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert_eq!(
        numbers(&result.cells),
        vec![Some(10.0), Some(20.0), Some(30.0), None]
    );
}

#[test]
fn compound_slicer_aggregates_its_tuples() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![Axis::new(Exp::members_of(&sales.cities()))],
        slicer: Some(Exp::set(vec![
            Exp::member(&sales.time("2023/Q1")),
            Exp::member(&sales.time("2024/Q2")),
        ])),
    };
    let result = engine
        .execute(&engine.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert_eq!(
        numbers(&result.cells),
        vec![Some(40.0), None, Some(30.0), None]
    );
}

#[test]
fn compound_slicer_constrains_native_crossjoins() {
    let sales = sales_cube();
    let slicer = Exp::set(vec![
        Exp::member(&sales.time("2023/Q1")),
        Exp::member(&sales.time("2024/Q2")),
    ]);
    let rows = Exp::call(
        "NonEmptyCrossJoin",
        vec![
            Exp::members_of(&sales.cities()),
            Exp::members_of(&sales.categories()),
        ],
    );
    let query = Query {
        axes: vec![Axis::new(rows)],
        slicer: Some(slicer),
    };

    let native = OlapEngine::with_config(common::native_config());
    let result = native
        .execute(&native.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert_eq!(names(&result.axes[0]), vec!["SF/Food", "Seattle/Drink"]);
    assert_eq!(sales.cube.native_executions(), 1);

    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only());
    let result = interpreted
        .execute(&interpreted.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert_eq!(names(&result.axes[0]), vec!["SF/Food", "Seattle/Drink"]);
    assert_eq!(numbers(&result.cells), vec![Some(40.0), Some(30.0)]);
}

#[test]
fn empty_slicer_leaves_every_cell_empty() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![Axis::new(Exp::members_of(&sales.cities()))],
        slicer: Some(Exp::set(Vec::new())),
    };
    let result = engine
        .execute(&engine.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert_eq!(result.axes[0].len(), 4);
    assert!(result.cells.iter().all(CellValue::is_empty));
    assert_eq!(sales.cube.cell_loads(), 0);
}

#[test]
fn cell_errors_stay_in_their_cell() {
    let sales = sales_cube();
    let sales_measure = sales.measure("Sales");
    let broken = Member::calculated_measure(
        sales_measure.hierarchy(),
        "Broken",
        Exp::infix("/", Exp::member(&sales_measure), Exp::integer(0)),
        0,
    );
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![
            Axis::new(Exp::set(vec![
                Exp::member(&sales_measure),
                Exp::member(&broken),
            ])),
            Axis::new(Exp::set(vec![
                Exp::member(&sales.store("CA/SF")),
                Exp::member(&sales.store("OR/Portland")),
            ])),
        ],
        slicer: None,
    };
    let result = engine
        .execute(&engine.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert_eq!(
        result.cells,
        vec![
            CellValue::Value(Value::Float(50.0)),
            CellValue::Error(OlapError::DivisionByZero.to_string()),
            CellValue::Value(Value::Null),
            CellValue::Value(Value::Null),
        ]
    );
}

#[test]
fn calculated_measure_with_higher_solve_order_wins() {
    let sales = sales_cube();
    let sales_measure = sales.measure("Sales");
    let store_all = sales.hierarchy(sales.store).default_member().clone();
    let west = Member::calculated(
        &store_all,
        "West",
        Exp::call(
            "Aggregate",
            vec![Exp::set(vec![
                Exp::member(&sales.store("CA")),
                Exp::member(&sales.store("WA")),
            ])],
        ),
        0,
    );
    let share = Member::calculated_measure(
        sales_measure.hierarchy(),
        "Share",
        Exp::infix(
            "/",
            Exp::member(&sales_measure),
            Exp::tuple(vec![Exp::member(&sales_measure), Exp::member(&store_all)]),
        ),
        10,
    );

    let engine = OlapEngine::new();
    let value = engine
        .evaluate(&Exp::member(&share), &sales.cube, &[west])
        .unwrap();
    // West holds all stored sales.
    assert_eq!(value, Value::Float(1.0));
}

#[test]
fn empty_axis_yields_no_cells() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![
            Axis::new(Exp::members_of(&sales.cities())),
            Axis::new(Exp::set(Vec::new())),
        ],
        slicer: None,
    };
    let result = engine
        .execute(&engine.prepare(&query).unwrap(), &sales.cube)
        .unwrap();
    assert!(result.cells.is_empty());
}

#[test]
fn cancelled_execution_aborts_the_query() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![Axis::new(Exp::members_of(&sales.cities()))],
        slicer: None,
    };
    let prepared = engine.prepare(&query).unwrap();
    let execution = Execution::default();
    execution.cancel();
    let err = engine
        .execute_with(&prepared, &sales.cube, &execution)
        .unwrap_err();
    assert_eq!(err, OlapError::Cancelled);
}

#[test]
fn compile_errors_surface_from_prepare() {
    let sales = sales_cube();
    let engine = OlapEngine::new();
    let query = Query {
        axes: vec![Axis::new(Exp::call("NoSuchFunction", vec![Exp::members_of(&sales.cities())]))],
        slicer: None,
    };
    let err = engine.prepare(&query).unwrap_err();
    assert!(err.is_compile_error());
}
