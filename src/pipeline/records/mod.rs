
use arrow::array::{Array, ArrayRef, AsArray, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::sync::{Arc, LazyLock};

use crate::{PerfError, Result};

pub const ID_COLUMN: &str = "id";
pub const TEXT_COLUMN: &str = "text";
pub const LANGUAGE_COLUMN: &str = "language";
pub const SPLIT_COLUMN: &str = "split";
pub const SUBSET_COLUMN: &str = "subset";
pub const SOURCE_COLUMN: &str = "source";
pub const MODEL_COLUMN: &str = "model";
pub const EMBEDDING_COLUMN: &str = "embedding_base64";

const INTERMEDIATE_STRING_COLUMNS: [&str; 5] = [
    TEXT_COLUMN,
    LANGUAGE_COLUMN,
    SPLIT_COLUMN,
    SUBSET_COLUMN,
    SOURCE_COLUMN,
];

static INTERMEDIATE_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    let mut fields = vec![Field::new(ID_COLUMN, DataType::Int64, false)];
    fields.extend(
        INTERMEDIATE_STRING_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, false)),
    );
    Arc::new(Schema::new(fields))
});

static FEATURE_SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    let mut fields: Vec<Field> = INTERMEDIATE_SCHEMA
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    fields.push(Field::new(MODEL_COLUMN, DataType::Utf8, false));
    fields.push(Field::new(EMBEDDING_COLUMN, DataType::Utf8, false));
    Arc::new(Schema::new(fields))
});

/// One deduplicated text from the translation dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntermediateRecord {
    pub id: i64,
    pub text: String,
    pub language: String,
    pub split: String,
    pub subset: String,
    pub source: String,
}

/// An intermediate record enriched with its embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRecord {
    pub record: IntermediateRecord,
    pub model: String,
    /// Base64 of the little-endian `f32` bytes
    pub embedding: String,
}

#[inline]
pub fn intermediate_schema() -> SchemaRef {
    Arc::clone(&INTERMEDIATE_SCHEMA)
}

#[inline]
pub fn feature_schema() -> SchemaRef {
    Arc::clone(&FEATURE_SCHEMA)
}

/// Checks that `schema` carries every intermediate column with the expected
/// type. Extra columns are tolerated.
#[inline]
pub fn validate_intermediate_schema(schema: &Schema) -> Result<()> {
    for expected in INTERMEDIATE_SCHEMA.fields() {
        let found = schema.field_with_name(expected.name()).map_err(|_| {
            PerfError::Validation(format!("Missing column '{}'", expected.name()))
        })?;
        if found.data_type() != expected.data_type() {
            return Err(PerfError::Validation(format!(
                "Column '{}' has type {}, expected {}",
                expected.name(),
                found.data_type(),
                expected.data_type()
            )));
        }
    }
    Ok(())
}

#[inline]
pub fn intermediate_batch(records: &[IntermediateRecord]) -> Result<RecordBatch> {
    let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.id)));
    let strings = |get: fn(&IntermediateRecord) -> &str| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(records.iter().map(get)))
    };

    let batch = RecordBatch::try_new(
        intermediate_schema(),
        vec![
            ids,
            strings(|r| r.text.as_str()),
            strings(|r| r.language.as_str()),
            strings(|r| r.split.as_str()),
            strings(|r| r.subset.as_str()),
            strings(|r| r.source.as_str()),
        ],
    )?;
    Ok(batch)
}

/// Extends an intermediate batch with model and embedding columns.
#[inline]
pub fn feature_batch(
    batch: &RecordBatch,
    model: &str,
    embeddings: &[String],
) -> Result<RecordBatch> {
    validate_intermediate_schema(&batch.schema())?;
    if embeddings.len() != batch.num_rows() {
        return Err(PerfError::Pipeline(format!(
            "{} embeddings for a batch of {} rows",
            embeddings.len(),
            batch.num_rows()
        )));
    }

    let mut columns = Vec::with_capacity(FEATURE_SCHEMA.fields().len());
    for field in INTERMEDIATE_SCHEMA.fields() {
        let column = batch
            .column_by_name(field.name())
            .ok_or_else(|| PerfError::Validation(format!("Missing column '{}'", field.name())))?;
        columns.push(Arc::clone(column));
    }
    columns.push(Arc::new(StringArray::from_iter_values(
        std::iter::repeat_n(model, batch.num_rows()),
    )) as ArrayRef);
    columns.push(Arc::new(StringArray::from_iter_values(embeddings.iter())) as ArrayRef);

    Ok(RecordBatch::try_new(feature_schema(), columns)?)
}

/// Non-null string values of `name`, in row order.
#[inline]
pub fn string_column(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| PerfError::Validation(format!("Missing column '{name}'")))?
        .as_string_opt::<i32>()
        .ok_or_else(|| PerfError::Validation(format!("Column '{name}' is not a string column")))?;

    if array.null_count() > 0 {
        return Err(PerfError::Validation(format!(
            "Column '{name}' contains {} null values",
            array.null_count()
        )));
    }
    Ok(array.iter().flatten().map(str::to_string).collect())
}

fn id_column(batch: &RecordBatch) -> Result<Vec<i64>> {
    let array = batch
        .column_by_name(ID_COLUMN)
        .ok_or_else(|| PerfError::Validation(format!("Missing column '{ID_COLUMN}'")))?
        .as_primitive_opt::<Int64Type>()
        .ok_or_else(|| PerfError::Validation(format!("Column '{ID_COLUMN}' is not Int64")))?;

    if array.null_count() > 0 {
        return Err(PerfError::Validation(format!(
            "Column '{ID_COLUMN}' contains null values"
        )));
    }
    Ok(array.values().to_vec())
}

#[inline]
pub fn intermediate_records(batch: &RecordBatch) -> Result<Vec<IntermediateRecord>> {
    validate_intermediate_schema(&batch.schema())?;

    let ids = id_column(batch)?;
    let texts = string_column(batch, TEXT_COLUMN)?;
    let languages = string_column(batch, LANGUAGE_COLUMN)?;
    let splits = string_column(batch, SPLIT_COLUMN)?;
    let subsets = string_column(batch, SUBSET_COLUMN)?;
    let sources = string_column(batch, SOURCE_COLUMN)?;

    Ok(itertools::izip!(ids, texts, languages, splits, subsets, sources)
        .map(|(id, text, language, split, subset, source)| IntermediateRecord {
            id,
            text,
            language,
            split,
            subset,
            source,
        })
        .collect())
}

#[inline]
pub fn feature_records(batch: &RecordBatch) -> Result<Vec<FeatureRecord>> {
    let records = intermediate_records(batch)?;
    let models = string_column(batch, MODEL_COLUMN)?;
    let embeddings = string_column(batch, EMBEDDING_COLUMN)?;

    Ok(itertools::izip!(records, models, embeddings)
        .map(|(record, model, embedding)| FeatureRecord {
            record,
            model,
            embedding,
        })
        .collect())
}
