#![allow(dead_code)]

use formula_olap::{
    Aggregator, CubeBuilder, EngineConfig, Hierarchy, HierarchyId, InMemoryCube, LevelRef,
    Member, SchemaReader, Tuple,
};

/// A small sales cube:
///
/// | Time       | Store         | Product | Sales | Units |
/// |------------|---------------|---------|-------|-------|
/// | 2024 / Q1  | CA / SF       | Drink   | 10    | 1     |
/// | 2024 / Q1  | CA / LA       | Food    | 20    | 2     |
/// | 2024 / Q2  | WA / Seattle  | Drink   | 30    | 3     |
/// | 2023 / Q1  | CA / SF       | Food    | 40    | 4     |
/// | 2023 / Q3  | WA / Seattle  | NonFood | 50    |       |
/// | 2024 / Q2  | CA / SF       | Drink   |       | 6     |
///
/// `OR / Portland` and the `Toys` category exist but have no facts.
pub struct SalesCube {
    pub cube: InMemoryCube,
    pub time: HierarchyId,
    pub store: HierarchyId,
    pub product: HierarchyId,
}

impl SalesCube {
    pub fn member(&self, unique_name: &str) -> Member {
        self.cube
            .member(unique_name)
            .unwrap_or_else(|| panic!("no member {unique_name}"))
    }

    pub fn measure(&self, name: &str) -> Member {
        self.cube
            .measure(name)
            .unwrap_or_else(|| panic!("no measure {name}"))
    }

    pub fn store(&self, path: &str) -> Member {
        self.member(&unique("Store", path))
    }

    pub fn time(&self, path: &str) -> Member {
        self.member(&unique("Time", path))
    }

    pub fn product(&self, path: &str) -> Member {
        self.member(&unique("Product", path))
    }

    pub fn hierarchy(&self, id: HierarchyId) -> Hierarchy {
        self.cube.hierarchy(id).unwrap().clone()
    }

    pub fn level(&self, id: HierarchyId, depth: usize) -> LevelRef {
        self.cube.level(id, depth).unwrap()
    }

    pub fn cities(&self) -> LevelRef {
        self.level(self.store, 2)
    }

    pub fn states(&self) -> LevelRef {
        self.level(self.store, 1)
    }

    pub fn categories(&self) -> LevelRef {
        self.level(self.product, 1)
    }

    pub fn years(&self) -> LevelRef {
        self.level(self.time, 1)
    }
}

/// `"CA/SF"` under `[Store]` becomes `[Store].[All].[CA].[SF]`.
fn unique(hierarchy: &str, path: &str) -> String {
    let mut name = format!("[{hierarchy}].[All]");
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        name.push_str(&format!(".[{segment}]"));
    }
    name
}

pub fn sales_cube() -> SalesCube {
    let mut builder = CubeBuilder::new();
    builder
        .add_measure("Sales", Aggregator::Sum)
        .add_measure("Units", Aggregator::Sum);
    let time = builder.add_hierarchy("Time", &["Year", "Quarter"]);
    let store = builder.add_hierarchy("Store", &["State", "City"]);
    let product = builder.add_hierarchy("Product", &["Category"]);

    for year in ["2023", "2024"] {
        for quarter in ["Q1", "Q2", "Q3", "Q4"] {
            builder.add_members(time, &[year, quarter]).unwrap();
        }
    }
    for (state, city) in [("CA", "SF"), ("CA", "LA"), ("WA", "Seattle"), ("OR", "Portland")] {
        builder.add_members(store, &[state, city]).unwrap();
    }
    for category in ["Drink", "Food", "NonFood", "Toys"] {
        builder.add_members(product, &[category]).unwrap();
    }

    let facts: [(&str, &str, &str, &str, &str, &[(&str, f64)]); 6] = [
        ("2024", "Q1", "CA", "SF", "Drink", &[("Sales", 10.0), ("Units", 1.0)]),
        ("2024", "Q1", "CA", "LA", "Food", &[("Sales", 20.0), ("Units", 2.0)]),
        ("2024", "Q2", "WA", "Seattle", "Drink", &[("Sales", 30.0), ("Units", 3.0)]),
        ("2023", "Q1", "CA", "SF", "Food", &[("Sales", 40.0), ("Units", 4.0)]),
        ("2023", "Q3", "WA", "Seattle", "NonFood", &[("Sales", 50.0)]),
        ("2024", "Q2", "CA", "SF", "Drink", &[("Units", 6.0)]),
    ];
    for (year, quarter, state, city, category, values) in facts {
        builder
            .add_fact(
                &[
                    (time, &[year, quarter]),
                    (store, &[state, city]),
                    (product, &[category]),
                ],
                values,
            )
            .unwrap();
    }

    SalesCube {
        cube: builder.build().unwrap(),
        time,
        store,
        product,
    }
}

/// Native delegation attempted regardless of operand size.
pub fn native_config() -> EngineConfig {
    EngineConfig {
        native_min_threshold: 0,
        ..EngineConfig::default()
    }
}

/// Member names of each tuple joined with `/`, e.g. `SF/Drink`.
pub fn names(tuples: &[Tuple]) -> Vec<String> {
    tuples
        .iter()
        .map(|t| {
            t.members()
                .iter()
                .map(|m| m.name().to_string())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect()
}

pub fn sorted_names(tuples: &[Tuple]) -> Vec<String> {
    let mut names = names(tuples);
    names.sort();
    names
}
