//! End-to-end tests through the collection facade.

use memquery::{Collection, QueryError, Value};
use serde_json::json;

fn v(j: serde_json::Value) -> Value {
    Value::from(j)
}

fn people() -> Collection {
    Collection::from_json(json!([
        { "city": "NY", "age": 28 },
        { "city": "NY", "age": 34 },
        { "city": "LA", "age": 20 }
    ]))
    .unwrap()
}

#[test]
fn find_results_preserve_relative_order() {
    let coll = Collection::from_json(json!([
        { "n": 5 }, { "n": 1 }, { "n": 4 }, { "n": 2 }
    ]))
    .unwrap();
    let out = coll.find(json!({ "n": { "$gte": 2 } })).unwrap().to_array().unwrap();
    assert_eq!(out, vec![v(json!({ "n": 5 })), v(json!({ "n": 4 })), v(json!({ "n": 2 }))]);
}

#[test]
fn to_array_is_idempotent_and_isolated() {
    let coll = people();
    let cursor = coll.find(json!({ "city": "NY" })).unwrap();
    let mut first = cursor.to_array().unwrap();
    if let Value::Object(map) = &mut first[0] {
        map.insert("age".to_string(), v(json!(999)));
    }
    let second = cursor.to_array().unwrap();
    assert_eq!(second[0], v(json!({ "city": "NY", "age": 28 })));
    assert_eq!(coll.items()[0], v(json!({ "city": "NY", "age": 28 })));
}

#[test]
fn nor_is_negated_or() {
    let coll = people();
    let a = json!({ "city": "NY" });
    let b = json!({ "age": { "$lt": 25 } });
    for record in coll.items() {
        let nor = memquery::Query::from_json(json!({ "$nor": [a.clone(), b.clone()] }))
            .unwrap()
            .matches(record)
            .unwrap();
        let or = memquery::Query::from_json(json!({ "$or": [a.clone(), b.clone()] }))
            .unwrap()
            .matches(record)
            .unwrap();
        assert_eq!(nor, !or);
    }
}

#[test]
fn sort_directions_are_exact_reverses_without_ties() {
    let coll = Collection::from_json(json!([
        { "k": 3 }, { "k": 1 }, { "k": 2 }
    ]))
    .unwrap();
    let asc = coll.find(json!({})).unwrap().sort(json!({ "k": 1 })).to_array().unwrap();
    let mut desc = coll.find(json!({})).unwrap().sort(json!({ "k": -1 })).to_array().unwrap();
    desc.reverse();
    assert_eq!(asc, desc);
}

#[test]
fn scenario_a_find_and_group() {
    let coll = people();
    assert_eq!(coll.find(json!({ "city": "NY" })).unwrap().to_array().unwrap().len(), 2);

    let groups = coll
        .aggregate(vec![json!({ "$group": { "_id": "$city", "count": { "$sum": 1 } } })])
        .unwrap();
    assert_eq!(
        groups,
        vec![
            v(json!({ "_id": "NY", "count": 2.0 })),
            v(json!({ "_id": "LA", "count": 1.0 })),
        ]
    );
}

#[test]
fn scenario_b_unwind_drops_empty() {
    let coll = Collection::from_json(json!([
        { "id": 1, "tags": ["a", "b"] },
        { "id": 2, "tags": [] }
    ]))
    .unwrap();
    let out = coll.aggregate(vec![json!({ "$unwind": "$tags" })]).unwrap();
    assert_eq!(
        out,
        vec![v(json!({ "id": 1, "tags": "a" })), v(json!({ "id": 1, "tags": "b" }))]
    );
}

#[test]
fn scenario_c_projection() {
    let coll = Collection::from_json(json!([{ "_id": 1, "name": "Bob", "age": 9 }])).unwrap();
    let out = coll
        .find_with_projection(json!({}), json!({ "name": 1, "_id": 0 }))
        .unwrap()
        .to_array()
        .unwrap();
    assert_eq!(out, vec![v(json!({ "name": "Bob" }))]);
}

#[test]
fn scenario_d_mod() {
    let coll = Collection::from_json(json!([{ "age": 28 }, { "age": 34 }, { "age": 35 }])).unwrap();
    let out = coll.find(json!({ "age": { "$mod": [2, 0] } })).unwrap().to_array().unwrap();
    assert_eq!(out, vec![v(json!({ "age": 28 })), v(json!({ "age": 34 }))]);
}

#[test]
fn scenario_e_negative_slice() {
    let coll = Collection::from_json(json!([{ "tags": [1, 2, 3, 4, 5] }])).unwrap();
    let out = coll
        .find_with_projection(json!({}), json!({ "tags": { "$slice": -2 } }))
        .unwrap()
        .to_array()
        .unwrap();
    assert_eq!(out, vec![v(json!({ "tags": [4, 5] }))]);
}

#[test]
fn scenario_f_strict_typed_comparison() {
    let coll = Collection::from_json(json!([{ "n": "5" }])).unwrap();
    assert_eq!(coll.count(json!({ "n": { "$gt": 3 } })).unwrap(), 0);
}

#[test]
fn group_null_id_over_empty_input_is_empty() {
    let coll = Collection::from_json(json!([])).unwrap();
    let out = coll
        .aggregate(vec![json!({ "$group": { "_id": null, "count": { "$sum": 1 } } })])
        .unwrap();
    assert!(out.is_empty());
}

#[test]
fn group_null_id_is_single_group() {
    let coll = people();
    let out = coll
        .aggregate(vec![json!({ "$group": { "_id": null, "count": { "$sum": 1 } } })])
        .unwrap();
    assert_eq!(out, vec![v(json!({ "_id": null, "count": 3.0 }))]);
}

#[test]
fn avg_of_entirely_absent_field_is_null() {
    let coll = people();
    let out = coll
        .aggregate(vec![json!({ "$group": { "_id": null, "avg": { "$avg": "$salary" } } })])
        .unwrap();
    assert_eq!(out, vec![v(json!({ "_id": null, "avg": null }))]);
}

#[test]
fn projection_round_trip_preserves_resolved_values() {
    let coll = Collection::from_json(json!([{
        "scalar": 7,
        "nested": { "deep": { "x": true } },
        "list": [1, [2, 3], { "y": "z" }]
    }]))
    .unwrap();
    for field in ["scalar", "nested.deep", "list"] {
        let mut spec = serde_json::Map::new();
        spec.insert(field.to_string(), json!(1));
        let out = coll
            .find_with_projection(json!({}), serde_json::Value::Object(spec))
            .unwrap()
            .to_array()
            .unwrap();
        let path = memquery::FieldPath::parse(field);
        assert_eq!(path.resolve(&out[0]), path.resolve(&coll.items()[0]), "field {field}");
    }
}

#[test]
fn expression_anomalies_degrade_instead_of_failing() {
    let coll = Collection::from_json(json!([{ "x": "abc" }])).unwrap();
    let out = coll
        .aggregate(vec![json!({ "$project": {
            "asInt": { "$toInt": "$x" },
            "asDouble": { "$toDouble": "$x" },
            "asDate": { "$toDate": "$x" },
            "badOp": { "$noSuchOperator": [1, 2] }
        } })])
        .unwrap();
    // computed-only specs run in exclusion mode: the base record rides along
    assert_eq!(
        out,
        vec![v(json!({
            "x": "abc",
            "asInt": 0.0,
            "asDouble": 0.0,
            "asDate": null,
            "badOp": false
        }))]
    );
}

#[test]
fn contract_violations_surface_from_the_call() {
    let coll = people();
    assert!(matches!(
        coll.find(json!({ "$nor": "oops" })),
        Err(QueryError::InvalidQuery(_))
    ));
    assert!(matches!(
        coll.count(json!({ "age": {} })),
        Err(QueryError::InvalidQuery(_))
    ));
    assert!(matches!(
        coll.aggregate(vec![json!({ "$match": { "age": { "$regex": "(" } } })]),
        Err(QueryError::InvalidRegex(_))
    ));
    // $regex on a non-string value is data-driven: it errors at materialization
    let cursor = coll.find(json!({ "age": { "$regex": "2" } })).unwrap();
    assert!(matches!(
        cursor.to_array(),
        Err(QueryError::RegexTypeMismatch(_))
    ));
}

#[test]
fn compound_literal_group_id_collapses_to_one_group() {
    // a bare mapping `_id` is evaluated as an expression and degrades to
    // false, so all records land in a single group
    let coll = people();
    let out = coll
        .aggregate(vec![json!({ "$group": {
            "_id": { "city": "$city" },
            "count": { "$sum": 1 }
        } })])
        .unwrap();
    assert_eq!(out, vec![v(json!({ "_id": false, "count": 3.0 }))]);
}

#[test]
fn full_pipeline_chain() {
    let coll = Collection::from_json(json!([
        { "name": "a", "dept": "eng", "salary": 100, "tags": ["x", "y"] },
        { "name": "b", "dept": "eng", "salary": 140, "tags": ["x"] },
        { "name": "c", "dept": "ops", "salary": 90, "tags": [] },
        { "name": "d", "dept": "eng", "salary": 120, "tags": ["z"] }
    ]))
    .unwrap();

    let out = coll
        .aggregate(vec![
            json!({ "$match": { "dept": "eng" } }),
            json!({ "$unwind": "$tags" }),
            json!({ "$group": { "_id": "$tags", "payroll": { "$sum": "$salary" } } }),
            json!({ "$sort": { "payroll": -1 } }),
            json!({ "$limit": 2 }),
        ])
        .unwrap();
    assert_eq!(
        out,
        vec![
            v(json!({ "_id": "x", "payroll": 240.0 })),
            v(json!({ "_id": "z", "payroll": 120.0 })),
        ]
    );
}

#[test]
fn cursor_chain_matches_spec_order() {
    let coll = Collection::from_json(json!([
        { "n": 4 }, { "n": 2 }, { "n": 5 }, { "n": 1 }, { "n": 3 }
    ]))
    .unwrap();
    // match -> sort -> skip -> limit -> project, regardless of chain order
    let out = coll
        .find(json!({ "n": { "$gte": 2 } }))
        .unwrap()
        .limit(2)
        .sort(json!({ "n": 1 }))
        .skip(1)
        .project(json!({ "n": 1 }))
        .unwrap()
        .to_array()
        .unwrap();
    assert_eq!(out, vec![v(json!({ "n": 3 })), v(json!({ "n": 4 }))]);
}

#[test]
fn distinct_first_seen_order() {
    let coll = Collection::from_json(json!([
        { "tag": "b" }, { "tag": "a" }, { "tag": "b" }, { "x": 1 }
    ]))
    .unwrap();
    assert_eq!(coll.distinct("tag"), vec![v(json!("b")), v(json!("a"))]);
}

#[test]
fn expr_query_through_facade() {
    let coll = Collection::from_json(json!([
        { "spent": 120, "budget": 100 },
        { "spent": 50, "budget": 100 }
    ]))
    .unwrap();
    let out = coll
        .find(json!({ "$expr": { "$gt": ["$spent", "$budget"] } }))
        .unwrap()
        .to_array()
        .unwrap();
    assert_eq!(out, vec![v(json!({ "spent": 120, "budget": 100 }))]);
}
