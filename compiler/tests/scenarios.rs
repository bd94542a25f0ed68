//! Integration tests mirroring the concrete end-to-end scenarios used throughout this
//! codebase's review process, driven entirely through the five public entry points rather
//! than any single module's internals.

use compiler::{build_aggregation_query, build_delete_query, build_select_query, build_update_query};
use schema::{Config, Dialect, Field, FieldType, Relationship, TableSchema, Value};

fn users_posts_orders(dialect: Dialect) -> Config {
    Config {
        dialect,
        tables: [
            (
                "users".to_string(),
                TableSchema::new([
                    Field { name: "id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "name".into(), type_: FieldType::String, nullable: false, default: None },
                    Field { name: "age".into(), type_: FieldType::Number, nullable: true, default: None },
                    Field { name: "active".into(), type_: FieldType::Boolean, nullable: false, default: None },
                    Field { name: "metadata".into(), type_: FieldType::Object, nullable: true, default: None },
                ]),
            ),
            (
                "posts".to_string(),
                TableSchema::new([
                    Field { name: "id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "user_id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "published".into(), type_: FieldType::Boolean, nullable: false, default: None },
                ]),
            ),
            (
                "orders".to_string(),
                TableSchema::new([
                    Field { name: "customer_id".into(), type_: FieldType::Uuid, nullable: false, default: None },
                    Field { name: "total".into(), type_: FieldType::Number, nullable: false, default: None },
                ]),
            ),
        ]
        .into_iter()
        .collect(),
        variables: [("current_user_id".to_string(), Value::String("123".to_string()))]
            .into_iter()
            .collect(),
        relationships: vec![Relationship {
            table: "posts".into(),
            field: "user_id".into(),
            to_table: "users".into(),
            to_field: "id".into(),
        }],
        data_table: None,
    }
}

#[test]
fn scenario_1_select_with_order_by() {
    let cfg = users_posts_orders(Dialect::Postgresql);
    let query = serde_json::json!({
        "rootTable": "users",
        "selection": {"id": true, "name": true},
        "orderBy": [{"field": "users.name", "direction": "ASC"}]
    });
    let sql = build_select_query(&query, &cfg).unwrap();
    assert_eq!(
        sql,
        "SELECT users.id AS \"id\", users.name AS \"name\" FROM users ORDER BY users.name ASC"
    );
}

#[test]
fn scenario_2_offset_without_limit_on_sqlite() {
    let cfg = users_posts_orders(Dialect::SqliteExtensions);
    let query = serde_json::json!({
        "rootTable": "users",
        "selection": {"id": true},
        "pagination": {"offset": 10}
    });
    let sql = build_select_query(&query, &cfg).unwrap();
    assert!(sql.contains("LIMIT -1 OFFSET 10"));
}

#[test]
fn scenario_3_uuid_equality_against_var() {
    let cfg = users_posts_orders(Dialect::Postgresql);
    let query = serde_json::json!({
        "rootTable": "users",
        "selection": {"id": true},
        "condition": {"users.id": {"$eq": {"$var": "current_user_id"}}}
    });
    let sql = build_select_query(&query, &cfg).unwrap();
    assert!(sql.contains("(users.id)::TEXT = '123'"));
}

#[test]
fn scenario_4_json_scalar_equality() {
    let cfg = users_posts_orders(Dialect::Postgresql);
    let query = serde_json::json!({
        "rootTable": "users",
        "selection": {"id": true},
        "condition": {"users.metadata->department": "engineering"}
    });
    let sql = build_select_query(&query, &cfg).unwrap();
    assert!(sql.contains("users.metadata ->> 'department' = 'engineering'"));
}

#[test]
fn scenario_5_update_gate_passes_with_residual() {
    let cfg = users_posts_orders(Dialect::Postgresql);
    let query = serde_json::json!({
        "table": "users",
        "updates": {"name": "John", "age": 25},
        "condition": {
            "$and": [
                {"NEW_ROW.age": {"$ge": 18}},
                {"active": true}
            ]
        }
    });
    let sql = build_update_query(&query, &cfg).unwrap();
    assert_eq!(sql, "UPDATE users SET \"name\" = 'John', \"age\" = 25 WHERE users.active = TRUE");
}

#[test]
fn scenario_6_update_gate_fails() {
    let cfg = users_posts_orders(Dialect::Postgresql);
    let query = serde_json::json!({
        "table": "users",
        "updates": {"name": "John", "age": 15},
        "condition": {
            "$and": [
                {"NEW_ROW.age": {"$ge": 18}},
                {"active": true}
            ]
        }
    });
    let err = build_update_query(&query, &cfg).unwrap_err();
    assert_eq!(err.to_string(), "Update condition not met.");
}

#[test]
fn scenario_7_delete_with_in_on_sqlite() {
    let cfg = users_posts_orders(Dialect::SqliteExtensions);
    let query = serde_json::json!({
        "table": "posts",
        "condition": {
            "user_id": {"$in": ["6ba7b815-9dad-11d1-80b4-00c04fd430c8", "6ba7b816-9dad-11d1-80b4-00c04fd430c8"]}
        }
    });
    let sql = build_delete_query(&query, &cfg).unwrap();
    assert_eq!(
        sql,
        "DELETE FROM posts WHERE CAST(posts.user_id AS TEXT) IN ('6ba7b815-9dad-11d1-80b4-00c04fd430c8', '6ba7b816-9dad-11d1-80b4-00c04fd430c8')"
    );
}

#[test]
fn scenario_8_exists_correlation() {
    let cfg = users_posts_orders(Dialect::Postgresql);
    let query = serde_json::json!({
        "rootTable": "users",
        "selection": {"id": true},
        "condition": {
            "$exists": {
                "table": "posts",
                "condition": {
                    "$and": [
                        {"posts.user_id": {"$eq": {"$field": "users.id"}}},
                        {"posts.published": true}
                    ]
                }
            }
        }
    });
    let sql = build_select_query(&query, &cfg).unwrap();
    assert!(sql.contains(
        "EXISTS (SELECT 1 FROM posts WHERE (posts.user_id = users.id AND posts.published = TRUE))"
    ));
}

#[test]
fn aggregation_group_by_with_sum() {
    let cfg = users_posts_orders(Dialect::Postgresql);
    let query = serde_json::json!({
        "table": "orders",
        "groupBy": ["orders.customer_id"],
        "aggregatedFields": {"total_spent": {"function": "SUM", "field": "orders.total"}}
    });
    let sql = build_aggregation_query(&query, &cfg).unwrap();
    assert!(sql.starts_with("SELECT orders.customer_id AS \"orders.customer_id\", SUM(orders.total)"));
}
