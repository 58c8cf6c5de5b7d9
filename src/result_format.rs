/// Columnar encoding of query results
///
/// Column types are inferred from the first non-null cell of each column.
/// Cells that do not fit the inferred type become nulls, so the encoding is
/// only lossless for homogeneous columns.
use crate::storage::executor::QueryResult;
use crate::storage::value::{parse_numeric_token, Cell};
use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use std::io::Write;
use std::sync::Arc;

/// Rows per record batch
pub const BATCH_ROWS: usize = 65_536;

/// Picks the column type for one cell
fn kind_of(cell: &Cell) -> DataType {
    match cell {
        Cell::Int(_) => DataType::Int64,
        Cell::Float(v) => {
            if crate::storage::value::float_as_exact_i64(*v).is_some() {
                DataType::Int64
            } else {
                DataType::Float64
            }
        }
        Cell::Bool(_) => DataType::Boolean,
        _ => DataType::Utf8,
    }
}

/// Schema for a result, one nullable field per column
pub fn infer_schema(result: &QueryResult) -> SchemaRef {
    let fields: Vec<Field> = result
        .columns
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let first = result
                .data
                .iter()
                .filter_map(|row| row.get(idx))
                .find(|cell| !cell.is_null());
            let data_type = first.map(kind_of).unwrap_or(DataType::Utf8);
            Field::new(name, data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

enum ColumnBuilder {
    Int(Int64Builder),
    Float(Float64Builder),
    Bool(BooleanBuilder),
    Text(StringBuilder),
}

impl ColumnBuilder {
    fn for_type(data_type: &DataType) -> Self {
        match data_type {
            DataType::Int64 => ColumnBuilder::Int(Int64Builder::new()),
            DataType::Float64 => ColumnBuilder::Float(Float64Builder::new()),
            DataType::Boolean => ColumnBuilder::Bool(BooleanBuilder::new()),
            _ => ColumnBuilder::Text(StringBuilder::new()),
        }
    }

    fn append(&mut self, cell: &Cell) {
        // numeric text is treated like a numeric literal token
        let parsed;
        let cell = match (cell, &*self) {
            (Cell::String(s), ColumnBuilder::Int(_) | ColumnBuilder::Float(_)) => {
                parsed = parse_numeric_token(s);
                &parsed
            }
            _ => cell,
        };

        match self {
            ColumnBuilder::Int(b) => match cell {
                Cell::Int(v) => b.append_value(*v),
                Cell::Float(v) => {
                    b.append_option(crate::storage::value::float_as_exact_i64(*v))
                }
                _ => b.append_null(),
            },
            ColumnBuilder::Float(b) => match cell {
                Cell::Float(v) => b.append_value(*v),
                Cell::Int(v) => b.append_value(*v as f64),
                _ => b.append_null(),
            },
            ColumnBuilder::Bool(b) => match cell {
                Cell::Bool(v) => b.append_value(*v),
                _ => b.append_null(),
            },
            ColumnBuilder::Text(b) => match cell.to_text() {
                Some(text) => b.append_value(text),
                None => b.append_null(),
            },
        }
    }

    fn finish(&mut self) -> ArrayRef {
        match self {
            ColumnBuilder::Int(b) => Arc::new(b.finish()),
            ColumnBuilder::Float(b) => Arc::new(b.finish()),
            ColumnBuilder::Bool(b) => Arc::new(b.finish()),
            ColumnBuilder::Text(b) => Arc::new(b.finish()),
        }
    }
}

/// Builds record batches of at most `batch_rows` rows
pub fn encode_batches(
    result: &QueryResult,
    schema: &SchemaRef,
    batch_rows: usize,
) -> Result<Vec<RecordBatch>, ArrowError> {
    let batch_rows = batch_rows.max(1);
    let mut batches = Vec::with_capacity(result.data.len() / batch_rows + 1);

    for chunk in result.data.chunks(batch_rows) {
        let mut builders: Vec<ColumnBuilder> = schema
            .fields()
            .iter()
            .map(|f| ColumnBuilder::for_type(f.data_type()))
            .collect();
        for row in chunk {
            for (idx, builder) in builders.iter_mut().enumerate() {
                builder.append(row.get(idx).unwrap_or(&Cell::Null));
            }
        }
        let arrays: Vec<ArrayRef> = builders.iter_mut().map(ColumnBuilder::finish).collect();
        batches.push(RecordBatch::try_new(schema.clone(), arrays)?);
    }
    Ok(batches)
}

/// Failure while writing the stream
#[derive(Debug, thiserror::Error)]
#[error("error writing Arrow record {record}: {source}")]
pub struct EncodeError {
    pub record: usize,
    #[source]
    pub source: ArrowError,
}

/// Writes schema and batches as one IPC stream
pub fn write_stream<W: Write>(result: &QueryResult, out: W) -> Result<W, EncodeError> {
    let schema = infer_schema(result);
    let batches =
        encode_batches(result, &schema, BATCH_ROWS).map_err(|source| EncodeError { record: 0, source })?;
    let mut writer =
        StreamWriter::try_new(out, &schema).map_err(|source| EncodeError { record: 0, source })?;
    for (record, batch) in batches.iter().enumerate() {
        writer
            .write(batch)
            .map_err(|source| EncodeError { record, source })?;
    }
    writer.finish().map_err(|source| EncodeError {
        record: batches.len(),
        source,
    })?;
    writer.into_inner().map_err(|source| EncodeError {
        record: batches.len(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, BooleanArray, Float64Array, Int64Array, StringArray};
    use arrow::ipc::reader::StreamReader;

    fn result(columns: &[&str], data: Vec<Vec<Cell>>) -> QueryResult {
        QueryResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            data,
            debug: String::new(),
        }
    }

    #[test]
    fn test_schema_from_first_non_null() {
        let r = result(
            &["a", "b", "c", "d", "e"],
            vec![
                vec![Cell::Null, Cell::Float(2.0), Cell::Float(0.5), Cell::Bool(true), Cell::Null],
                vec![Cell::Int(1), Cell::Float(3.0), Cell::Float(1.5), Cell::Bool(false), Cell::Null],
            ],
        );
        let schema = infer_schema(&r);
        let types: Vec<DataType> = schema.fields().iter().map(|f| f.data_type().clone()).collect();
        assert_eq!(
            types,
            vec![
                DataType::Int64,
                DataType::Int64,
                DataType::Float64,
                DataType::Boolean,
                DataType::Utf8
            ]
        );
    }

    #[test]
    fn test_mismatches_become_null() {
        let r = result(
            &["n", "s"],
            vec![
                vec![Cell::Int(1), Cell::String("a".into())],
                vec![Cell::String("x".into()), Cell::Int(7)],
                vec![Cell::String("42".into()), Cell::List(vec![])],
            ],
        );
        let schema = infer_schema(&r);
        let batches = encode_batches(&r, &schema, BATCH_ROWS).unwrap();
        assert_eq!(batches.len(), 1);

        let n = batches[0].column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(n.value(0), 1);
        assert!(n.is_null(1));
        assert_eq!(n.value(2), 42);

        let s = batches[0].column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(s.value(0), "a");
        assert_eq!(s.value(1), "7");
        assert!(s.is_null(2));
    }

    #[test]
    fn test_batches_split_rows() {
        let data = (0..5).map(|i| vec![Cell::Int(i)]).collect();
        let r = result(&["i"], data);
        let schema = infer_schema(&r);
        let batches = encode_batches(&r, &schema, 2).unwrap();
        let sizes: Vec<usize> = batches.iter().map(|b| b.num_rows()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_stream_decodes() {
        let r = result(
            &["id", "name", "count", "active"],
            vec![
                vec![Cell::Int(1), "a".into(), Cell::Int(10), Cell::Bool(true)],
                vec![Cell::Int(2), "b".into(), Cell::Int(20), Cell::Bool(false)],
                vec![Cell::Int(3), "c".into(), Cell::Int(30), Cell::Bool(true)],
            ],
        );
        let bytes = write_stream(&r, Vec::new()).unwrap();
        let reader = StreamReader::try_new(std::io::Cursor::new(bytes), None).unwrap();
        let schema = reader.schema();
        assert_eq!(schema.field(1).name(), "name");
        assert_eq!(schema.field(3).data_type(), &DataType::Boolean);

        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].num_rows(), 3);
        let active = batches[0].column(3).as_any().downcast_ref::<BooleanArray>().unwrap();
        assert!(!active.value(1));
    }

    #[test]
    fn test_float_column() {
        let r = result(&["w"], vec![vec![Cell::Float(0.25)], vec![Cell::Int(2)]]);
        let schema = infer_schema(&r);
        let batches = encode_batches(&r, &schema, BATCH_ROWS).unwrap();
        let w = batches[0].column(0).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(w.value(1), 2.0);
    }

    #[test]
    fn test_empty_result_has_schema_only() {
        let r = result(&["a"], vec![]);
        let bytes = write_stream(&r, Vec::new()).unwrap();
        let reader = StreamReader::try_new(std::io::Cursor::new(bytes), None).unwrap();
        assert_eq!(reader.schema().fields().len(), 1);
        assert_eq!(reader.count(), 0);
    }
}
