//! Transform engine tests: end-to-end mapping scenarios and batching
//! invariance.

use std::collections::BTreeMap;

use databridge::data::Value;
use databridge::mapping::{CastType, ColumnRules, MappingConfig, TargetColumn};
use databridge::transform::Transformer;
use proptest::prelude::*;

mod common;
use common::TestWorkspace;

fn headers(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|row| row.iter().map(|f| f.to_string()).collect())
        .collect()
}

const CUSTOMER_MAPPING: &str = r#"
columns:
  - target: source_tag
    static: crm
  - target: full_name
    sources: [first_name, last_name]
  - target: email
    sources: [email]
  - target: amount
    sources: [amount]
  - target: signup
    sources: [signup_date]
filters:
  first_name:
    trim: true
  last_name:
    trim: true
  email:
    trim: true
    pattern: '([^@\s]+@[^@\s]+)'
    reject_on_mismatch: true
  amount:
    trim: true
    cast: float
    strict: true
  signup_date:
    cast: date
    default: "2020-01-01"
"#;

#[test]
fn customer_scenario_filters_combines_and_orders_columns() {
    let ws = TestWorkspace::new();
    let mapping = ws.write("customers.yml", CUSTOMER_MAPPING);
    let config = MappingConfig::load(&mapping).unwrap();
    let engine = Transformer::new(
        &config,
        &headers(&[
            "first_name",
            "last_name",
            "email",
            "amount",
            "signup_date",
            "country",
        ]),
    )
    .unwrap();

    // Static-only targets render after every fan-in target.
    assert_eq!(
        engine.columns(),
        ["full_name", "email", "amount", "signup", "source_tag"]
    );

    let input = rows(&[
        &[" Ada ", "Lovelace", "ada@example.com", " 10.50 ", "2024-03-01", "UK"],
        &["Grace", "Hopper", "contact: grace@navy.mil", "7", "", "US"],
        &["Bad", "Amount", "bad@example.com", "ten", "2024-01-01", "FR"],
        &["No", "Email", "not-an-address", "1.0", "2024-01-01", "DE"],
    ]);
    let (batch, stats) = engine.transform(input);

    assert_eq!(stats.rejected, 2);
    assert_eq!(batch.rows.len(), 2);

    let ada = &batch.rows[0];
    assert_eq!(ada[0], Value::String("Ada Lovelace".into()));
    assert_eq!(ada[1], Value::String("ada@example.com".into()));
    assert_eq!(ada[2], Value::Float(10.5));
    assert!(matches!(ada[3], Value::Date(_)));
    assert_eq!(ada[4], Value::String("crm".into()));

    // Pattern extraction pulls the address out of surrounding text, and the
    // empty signup date falls back to the configured default.
    let grace = &batch.rows[1];
    assert_eq!(grace[1], Value::String("grace@navy.mil".into()));
    assert_eq!(grace[3].as_display(), "2020-01-01");
}

#[test]
fn unreferenced_input_columns_are_dropped() {
    let ws = TestWorkspace::new();
    let mapping = ws.write(
        "narrow.yml",
        "columns:\n  - target: name\n    sources: [name]\n",
    );
    let config = MappingConfig::load(&mapping).unwrap();
    let engine = Transformer::new(&config, &headers(&["id", "name", "extra"])).unwrap();
    let (batch, _) = engine.transform(rows(&[&["1", "x", "y"]]));
    assert_eq!(batch.columns, ["name"]);
    assert_eq!(batch.rows[0], vec![Value::String("x".into())]);
}

#[test]
fn filters_on_unmapped_columns_are_inert() {
    let ws = TestWorkspace::new();
    let mapping = ws.write(
        "partial.yml",
        "columns:\n  - target: id\n    sources: [id]\n  - target: full_name\n    sources: [name]\nfilters:\n  amount:\n    cast: float\n    strict: true\n",
    );
    let config = MappingConfig::load(&mapping).unwrap();
    let engine = Transformer::new(&config, &headers(&["id", "name", "amount"])).unwrap();

    // The strict cast on `amount` would reject Bob, but no target reads that
    // column, so the rule never runs.
    let (batch, stats) = engine.transform(rows(&[&["1", "Alice", "10"], &["2", "Bob", "bad"]]));
    assert_eq!(stats.rejected, 0);
    assert_eq!(batch.columns, ["id", "full_name"]);
    assert_eq!(batch.rows[0], vec![
        Value::String("1".into()),
        Value::String("Alice".into()),
    ]);
    assert_eq!(batch.rows[1], vec![
        Value::String("2".into()),
        Value::String("Bob".into()),
    ]);
}

fn invariance_config() -> MappingConfig {
    let mut filters = BTreeMap::new();
    filters.insert(
        "a".to_string(),
        ColumnRules {
            trim: true,
            ..ColumnRules::default()
        },
    );
    filters.insert(
        "n".to_string(),
        ColumnRules {
            trim: true,
            cast: Some(CastType::Integer),
            strict: true,
            ..ColumnRules::default()
        },
    );
    MappingConfig {
        columns: vec![
            TargetColumn {
                target: "ab".into(),
                sources: vec!["a".into(), "b".into()],
                static_value: None,
            },
            TargetColumn {
                target: "n".into(),
                sources: vec!["n".into()],
                static_value: None,
            },
        ],
        filters,
    }
}

fn field_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{0,8}",
        "-?[0-9]{1,6}",
        Just(String::new()),
        "  [a-z]{1,4}  ",
    ]
}

fn row_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(field_strategy(), 3)
}

proptest! {
    /// Splitting the same rows into batches of any size must yield the same
    /// output rows and the same rejection count as one big batch.
    #[test]
    fn batch_splits_never_change_the_output(
        input in prop::collection::vec(row_strategy(), 0..40),
        chunk in 1usize..=7,
    ) {
        let config = invariance_config();
        let engine = Transformer::new(&config, &headers(&["a", "b", "n"])).unwrap();

        let (whole, whole_stats) = engine.transform(input.clone());

        let mut chunked_rows = Vec::new();
        let mut chunked_rejected = 0;
        for piece in input.chunks(chunk) {
            let (batch, stats) = engine.transform(piece.to_vec());
            chunked_rows.extend(batch.rows);
            chunked_rejected += stats.rejected;
        }

        prop_assert_eq!(whole.rows, chunked_rows);
        prop_assert_eq!(whole_stats.rejected, chunked_rejected);
    }
}
