//! Streaming batch API: extract many listings, emit each as it completes.
//!
//! ## Why stream?
//!
//! A crawl produces hundreds of listings and each one costs one or two model
//! calls. A stream lets callers persist results as they arrive and bounds the
//! number of in-flight listings by `config.concurrency` instead of buffering
//! the whole batch.
//!
//! Items are `(index, result)` pairs in completion order; `index` is the
//! listing's position in the input. A failed listing is an `Err` item and
//! never stops the stream.

use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::extract::Extractor;
use crate::output::ExtractionOutcome;
use crate::pipeline::input::ImageSource;
use futures::stream::{self, StreamExt};
use std::pin::Pin;
use tokio_stream::Stream;
use tracing::info;

/// One finished listing: its input position and outcome.
pub type ListingResult = (usize, Result<ExtractionOutcome, ExtractError>);

/// A boxed stream of listing results.
pub type ListingStream = Pin<Box<dyn Stream<Item = ListingResult> + Send>>;

/// Stream extractions for `listings` using a shared [`Extractor`].
///
/// Each listing is the list of its photo sources.
pub fn extract_stream(listings: Vec<Vec<ImageSource>>, extractor: Extractor) -> ListingStream {
    let concurrency = extractor.config().concurrency;
    info!(
        "Starting streaming extraction: {} listing(s), concurrency {}",
        listings.len(),
        concurrency
    );

    let s = stream::iter(listings.into_iter().enumerate().map(move |(idx, sources)| {
        let extractor = extractor.clone();
        async move { (idx, extractor.extract_sources(&sources).await) }
    }))
    .buffer_unordered(concurrency);

    Box::pin(s)
}

/// Resolve the provider once from `config`, then [`extract_stream`].
///
/// # Errors
/// Fails only if no provider can be configured; per-listing failures are
/// stream items.
///
/// # Example
/// ```rust,no_run
/// use edgequake_propscan::{extract_stream_with_config, ExtractionConfig, ImageSource};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let listings = vec![
///     vec![ImageSource::parse("a/1.jpg"), ImageSource::parse("a/2.jpg")],
///     vec![ImageSource::parse("b/1.jpg")],
/// ];
/// let mut stream = extract_stream_with_config(listings, &ExtractionConfig::default())?;
/// while let Some((idx, result)) = stream.next().await {
///     match result {
///         Ok(o) => println!("#{idx}: {:?}", o.record.property_info.address),
///         Err(e) => eprintln!("#{idx}: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub fn extract_stream_with_config(
    listings: Vec<Vec<ImageSource>>,
    config: &ExtractionConfig,
) -> Result<ListingStream, ExtractError> {
    let extractor = Extractor::from_config(config.clone())?;
    Ok(extract_stream(listings, extractor))
}
