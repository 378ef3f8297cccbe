//! Streaming conversion API: emit results as images complete.
//!
//! ## Why stream?
//!
//! A batch of scanned homework pages can take a while. A stream-based API lets
//! callers display results immediately, drive a progress bar, or write files
//! incrementally instead of waiting for the whole batch.
//!
//! Unlike the eager [`crate::convert::convert`], which converts one image,
//! [`convert_stream`] takes many inputs and yields `(input, result)` pairs
//! as each finishes. Results may arrive out of input order; the input string
//! identifies each one.

use crate::config::ConversionConfig;
use crate::convert::Converter;
use crate::error::HandTexError;
use crate::output::ConversionResult;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{info, warn};

/// One finished input: the path or URL it came from and its outcome.
pub type StreamItem = (String, Result<ConversionResult, HandTexError>);

/// A boxed stream of per-input results.
pub type ResultStream = Pin<Box<dyn Stream<Item = StreamItem> + Send>>;

/// Convert many images, yielding each result as soon as it is ready.
///
/// Up to `config.workers` inputs are in flight at once and they share one
/// worker pool. A failing input yields its error and does not stop the
/// rest of the batch.
pub fn convert_stream<I, S>(inputs: I, config: &ConversionConfig) -> ResultStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    convert_stream_with(Arc::new(Converter::new(config.clone())), inputs)
}

/// Like [`convert_stream`] over an existing converter.
pub fn convert_stream_with<I, S>(converter: Arc<Converter>, inputs: I) -> ResultStream
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
    let concurrency = converter.config().workers.max(1);
    info!(
        inputs = inputs.len(),
        concurrency, "Starting streaming conversion"
    );

    let s = stream::iter(inputs)
        .map(move |input| {
            let converter = Arc::clone(&converter);
            async move {
                let result = converter.convert(&input).await;
                if let Err(ref e) = result {
                    warn!("Failed to convert '{}': {}", input, e);
                }
                (input, result)
            }
        })
        .buffer_unordered(concurrency);

    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let blank = dir.path().join("blank.png");
        GrayImage::from_pixel(24, 24, Luma([255]))
            .save(&blank)
            .unwrap();
        let missing = dir.path().join("missing.png");

        let inputs = vec![
            blank.to_string_lossy().into_owned(),
            missing.to_string_lossy().into_owned(),
        ];
        let mut results: Vec<StreamItem> = convert_stream(inputs.clone(), &ConversionConfig::default())
            .collect()
            .await;
        results.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(results.len(), 2);
        let (ok_name, ok) = &results[0];
        assert_eq!(ok_name, &inputs[0]);
        assert_eq!(ok.as_ref().unwrap().latex, "");
        assert!(matches!(
            results[1].1,
            Err(HandTexError::InputNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_empty_stream() {
        let results: Vec<StreamItem> =
            convert_stream(Vec::<String>::new(), &ConversionConfig::default())
                .collect()
                .await;
        assert!(results.is_empty());
    }
}
