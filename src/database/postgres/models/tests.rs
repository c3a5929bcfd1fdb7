use chrono::Utc;

use super::*;

fn small_settings() -> StoreSettings {
    StoreSettings {
        vector_dimensions: 3,
        ..StoreSettings::default()
    }
}

#[test]
fn default_store_settings() {
    let settings = StoreSettings::default();
    assert_eq!(settings.vector_dimensions, 1536);
    assert_eq!(settings.vector_table, "point_with_embeddings");
    assert_eq!(settings.vector_index, format!("index_{}", EMBEDDING_COLUMN));
    assert_eq!(settings.admin_database, "postgres");
    assert!(settings.validate().is_ok());
}

#[test]
fn distance_operator_classes() {
    assert_eq!(DistanceMetric::L2.operator_class(), "vector_l2_ops");
    assert_eq!(DistanceMetric::Cosine.operator_class(), "vector_cosine_ops");
    assert_eq!(DistanceMetric::InnerProduct.operator_class(), "vector_ip_ops");
    assert_eq!(DistanceMetric::InnerProduct.to_string(), "inner_product");
}

#[test]
fn identifier_validation() {
    assert!(validate_identifier("point_with_embeddings").is_ok());
    assert!(validate_identifier("Points2").is_ok());
    assert!(validate_identifier("").is_err());
    assert!(validate_identifier("2points").is_err());
    assert!(validate_identifier("points; DROP TABLE users").is_err());
    assert!(validate_identifier("public.points").is_err());
    assert!(validate_identifier("points\"").is_err());
    assert!(validate_identifier(&"x".repeat(64)).is_err());
}

#[test]
fn quote_ident_escapes_quotes() {
    assert_eq!(quote_ident("points"), "\"points\"");
    assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
}

#[test]
fn new_point_defaults_model() {
    let point = NewPoint::new("This is a dog.", vec![0.0; 3]);
    assert_eq!(point.model_or_default(), DEFAULT_MODEL);

    let point = point.with_model("pytest_model");
    assert_eq!(point.model_or_default(), "pytest_model");
}

#[test]
fn new_point_validation() {
    let settings = small_settings();

    assert!(NewPoint::new("ok", vec![0.0; 3]).validate(&settings).is_ok());

    let wrong_length = NewPoint::new("ok", vec![0.0; 4]).validate(&settings);
    assert!(matches!(wrong_length, Err(PerfError::Validation(_))));

    let empty_text = NewPoint::new("", vec![0.0; 3]).validate(&settings);
    assert!(matches!(empty_text, Err(PerfError::Validation(_))));

    let empty_model = NewPoint::new("ok", vec![0.0; 3])
        .with_model("")
        .validate(&settings);
    assert!(matches!(empty_model, Err(PerfError::Validation(_))));
}

#[test]
fn update_merge_prefers_overrides() {
    let base = PointUpdate {
        text: Some("base text".to_string()),
        model: Some("base-model".to_string()),
        embedding: Some(vec![1.0, 2.0, 3.0]),
    };
    let overrides = PointUpdate {
        text: Some("override".to_string()),
        model: None,
        embedding: None,
    };

    let merged = base.merge(overrides);
    assert_eq!(merged.text.as_deref(), Some("override"));
    assert_eq!(merged.model.as_deref(), Some("base-model"));
    assert_eq!(merged.embedding, Some(vec![1.0, 2.0, 3.0]));
}

#[test]
fn update_emptiness() {
    assert!(PointUpdate::default().is_empty());
    assert!(PointUpdate::default().merge(PointUpdate::default()).is_empty());
    assert!(!PointUpdate::text("cat").is_empty());
}

#[test]
fn update_validation() {
    let settings = small_settings();
    assert!(PointUpdate::text("fine").validate(&settings).is_ok());

    let bad = PointUpdate {
        embedding: Some(vec![0.0; 2]),
        ..PointUpdate::default()
    };
    assert!(matches!(bad.validate(&settings), Err(PerfError::Validation(_))));
    assert!(PointUpdate::text("").validate(&settings).is_err());
}

#[test]
fn point_schema_round_trip() {
    let now = Utc::now();
    let row = PointRow {
        id: 7,
        text: "This is a dog.".to_string(),
        model: "pytest_model".to_string(),
        embedding: Vector::from(vec![0.5, 0.25, 0.0]),
        created_at: now,
    };

    let point = Point::from_row(row);
    assert_eq!(point.id, 7);
    assert_eq!(point.embedding, vec![0.5, 0.25, 0.0]);
    assert_eq!(point.created_at, now);

    let template = point.to_new_point();
    assert_eq!(template.text, "This is a dog.");
    assert_eq!(template.model.as_deref(), Some("pytest_model"));

    let update = point.to_update();
    assert_eq!(update.text.as_deref(), Some("This is a dog."));
    assert_eq!(update.embedding.as_deref(), Some(&[0.5, 0.25, 0.0][..]));
}

#[test]
fn list_options_default_sorts_descending() {
    let options = ListOptions::default();
    assert!(options.sort_desc);
    assert!(options.limit.is_none());
}

#[test]
fn index_settings_bounds() {
    let mut settings = IndexSettings::default();
    assert!(settings.validate().is_ok());

    settings.m = 101;
    assert!(settings.validate().is_err());

    settings.m = 32;
    settings.ef_construction = 63;
    assert!(matches!(
        settings.validate(),
        Err(ConfigError::InvalidEfConstruction(63, 64))
    ));
}
