/// Streaming delivery of query results in the Arrow IPC stream format
///
/// Batches are encoded on a blocking thread and pushed to the response body
/// as they are produced. A failure after the first chunk cuts the body short;
/// the status line has already been sent at that point.
use crate::result_format::{encode_batches, infer_schema, BATCH_ROWS};
use crate::storage::executor::QueryResult;
use arrow::ipc::writer::StreamWriter;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

pub const ARROW_STREAM_CONTENT_TYPE: &str = "application/vnd.apache.arrow.stream";

type Chunk = Result<Bytes, std::io::Error>;

fn stream_error(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message)
}

/// Encodes `result` into the channel, one chunk per record batch
fn encode_into(result: QueryResult, tx: mpsc::Sender<Chunk>) {
    let schema = infer_schema(&result);
    let batches = match encode_batches(&result, &schema, BATCH_ROWS) {
        Ok(batches) => batches,
        Err(e) => {
            error!(error = %e, "failed to build Arrow batches");
            let _ = tx.blocking_send(Err(stream_error(e.to_string())));
            return;
        }
    };

    let mut writer = match StreamWriter::try_new(Vec::new(), &schema) {
        Ok(w) => w,
        Err(e) => {
            let _ = tx.blocking_send(Err(stream_error(format!(
                "failed to create Arrow IPC writer: {}",
                e
            ))));
            return;
        }
    };

    for (record, batch) in batches.iter().enumerate() {
        if let Err(e) = writer.write(batch) {
            let message = format!("error writing Arrow record {}: {}", record, e);
            error!("{}", message);
            let _ = tx.blocking_send(Err(stream_error(message)));
            return;
        }
        let chunk = std::mem::take(writer.get_mut());
        if tx.blocking_send(Ok(Bytes::from(chunk))).is_err() {
            debug!(record, "client went away, stopping Arrow stream");
            return;
        }
    }

    if let Err(e) = writer.finish() {
        let _ = tx.blocking_send(Err(stream_error(format!(
            "failed to finalize Arrow IPC writer: {}",
            e
        ))));
        return;
    }
    let tail = std::mem::take(writer.get_mut());
    let _ = tx.blocking_send(Ok(Bytes::from(tail)));
}

/// Streams a result as an Arrow IPC response
pub fn arrow_response(result: QueryResult) -> Response {
    let (tx, rx) = mpsc::channel::<Chunk>(4);
    tokio::task::spawn_blocking(move || encode_into(result, tx));

    let mut response = (StatusCode::OK, Body::from_stream(ReceiverStream::new(rx))).into_response();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(ARROW_STREAM_CONTENT_TYPE),
    );
    response
}
