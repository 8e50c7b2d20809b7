use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use formula_olap::{
    Aggregator, CubeBuilder, EngineConfig, Exp, InMemoryCube, LevelRef, OlapEngine,
};
use std::time::Duration;

fn bench_customers() -> usize {
    std::env::var("FORMULA_OLAP_CROSSJOIN_BENCH_CUSTOMERS")
        .ok()
        .and_then(|v| v.replace('_', "").parse::<usize>().ok())
        .filter(|&v| (100..=50_000).contains(&v))
        .unwrap_or(2_000)
}

/// `customers` x 50 products, with a fact on roughly one combination in seven so that most of the
/// cross product is empty.
fn build_cube(customers: usize) -> (InMemoryCube, LevelRef, LevelRef) {
    let products = 50usize;
    let mut builder = CubeBuilder::new();
    builder.add_measure("Amount", Aggregator::Sum);
    let customer = builder.add_hierarchy("Customer", &["Region", "Customer"]);
    let product = builder.add_hierarchy("Product", &["Product"]);

    let customer_names: Vec<(String, String)> = (0..customers)
        .map(|c| (format!("R{}", c % 10), format!("C{c}")))
        .collect();
    let product_names: Vec<String> = (0..products).map(|p| format!("P{p}")).collect();

    for name in &product_names {
        builder.add_members(product, &[name.as_str()]).unwrap();
    }
    for (c, (region, name)) in customer_names.iter().enumerate() {
        builder
            .add_members(customer, &[region.as_str(), name.as_str()])
            .unwrap();
        for (p, product_name) in product_names.iter().enumerate() {
            if (c * 31 + p * 17) % 7 != 0 {
                continue;
            }
            builder
                .add_fact(
                    &[
                        (customer, &[region.as_str(), name.as_str()]),
                        (product, &[product_name.as_str()]),
                    ],
                    &[("Amount", (c + p) as f64)],
                )
                .unwrap();
        }
    }

    let cube = builder.build().unwrap();
    let customers = cube.level(customer, 2).unwrap();
    let products = cube.level(product, 1).unwrap();
    (cube, customers, products)
}

fn bench_non_empty_crossjoin(c: &mut Criterion) {
    let customers = bench_customers();
    let (cube, customer_level, product_level) = build_cube(customers);
    let exp = Exp::call(
        "NonEmptyCrossJoin",
        vec![
            Exp::members_of(&customer_level),
            Exp::members_of(&product_level),
        ],
    );

    let native = OlapEngine::with_config(EngineConfig::default());
    let interpreted = OlapEngine::with_config(EngineConfig::interpreted_only());

    let mut group = c.benchmark_group("non_empty_crossjoin");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements((customers * 50) as u64));

    group.bench_with_input(BenchmarkId::new("native", customers), &customers, |b, _| {
        b.iter(|| {
            let tuples = native.evaluate_set(&exp, &cube, &[]).unwrap();
            black_box(tuples);
        })
    });

    group.bench_with_input(
        BenchmarkId::new("interpreted", customers),
        &customers,
        |b, _| {
            b.iter(|| {
                let tuples = interpreted.evaluate_set(&exp, &cube, &[]).unwrap();
                black_box(tuples);
            })
        },
    );

    group.finish();
}

criterion_group!(benches, bench_non_empty_crossjoin);
criterion_main!(benches);
