use super::*;
use crate::database::postgres::models::{DistanceMetric, IndexSettings};

fn settings() -> StoreSettings {
    StoreSettings {
        vector_dimensions: 1024,
        vector_table: "bench_points".to_string(),
        vector_index: "index_embedding".to_string(),
        ..StoreSettings::default()
    }
}

#[test]
fn table_ddl_is_idempotent() {
    let statements = create_table_statements(&settings());
    assert_eq!(statements.len(), 3);
    assert!(
        statements
            .iter()
            .all(|sql| sql.contains("IF NOT EXISTS"))
    );
}

#[test]
fn table_ddl_declares_columns() {
    let statements = create_table_statements(&settings());
    let create = &statements[0];

    assert!(create.contains("CREATE TABLE IF NOT EXISTS \"bench_points\""));
    assert!(create.contains("id BIGSERIAL PRIMARY KEY"));
    assert!(create.contains("text TEXT NOT NULL"));
    assert!(create.contains("model TEXT NOT NULL DEFAULT 'default'"));
    assert!(create.contains("embedding vector(1024) NOT NULL"));
    assert!(create.contains("created_at TIMESTAMPTZ NOT NULL DEFAULT now()"));
}

#[test]
fn table_ddl_indexes_model_and_created_at() {
    let statements = create_table_statements(&settings());
    assert_eq!(
        statements[1],
        "CREATE INDEX IF NOT EXISTS \"ix_bench_points_model\" ON \"bench_points\" (model)"
    );
    assert_eq!(
        statements[2],
        "CREATE INDEX IF NOT EXISTS \"ix_bench_points_created_at\" ON \"bench_points\" (created_at)"
    );
}

#[test]
fn index_sql_defaults_to_euclidean_hnsw() {
    let sql = create_index_sql(&settings());
    assert_eq!(
        sql,
        "CREATE INDEX IF NOT EXISTS \"index_embedding\" ON \"bench_points\" USING hnsw (embedding vector_l2_ops) WITH (m = 16, ef_construction = 64)"
    );
}

#[test]
fn index_sql_uses_configured_tunables() {
    let settings = StoreSettings {
        index: IndexSettings {
            distance: DistanceMetric::Cosine,
            m: 24,
            ef_construction: 200,
        },
        ..settings()
    };

    let sql = create_index_sql(&settings);
    assert!(sql.contains("USING hnsw (embedding vector_cosine_ops)"));
    assert!(sql.contains("WITH (m = 24, ef_construction = 200)"));
}

#[test]
fn duplicate_codes_only_match_database_errors() {
    let error = sqlx::Error::RowNotFound;
    assert!(!is_code(&error, DUPLICATE_DATABASE));
    assert!(!is_code(&error, DUPLICATE_TABLE));
}
