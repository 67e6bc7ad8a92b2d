//! Drives a provider's fragment stream to completion.

use crate::error::{Error, ProviderError, Result};
use crate::progress::ProgressIndicator;
use crate::protocol::CompletionRequestEnvelope;
use crate::provider::CompletionProvider;
use futures::StreamExt;
use std::future::Future;
use std::io::Write;
use tracing::{debug, info, warn};

/// Everything the provider sent back for one query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamedAnswer {
    /// Deltas concatenated in arrival order.
    pub text: String,
    /// The most recent non-empty source list seen on the stream.
    pub sources: Vec<String>,
}

/// Send the request and collect the answer.
///
/// The indicator is stopped on the first fragment, on error and on
/// cancellation, always before this returns. When `live` is set, each delta
/// is also written there as it arrives. Resolving `cancel` drops the open
/// stream, which closes the connection.
pub async fn consume<C>(
    provider: &dyn CompletionProvider,
    envelope: CompletionRequestEnvelope,
    mut indicator: ProgressIndicator,
    live: Option<&mut (dyn Write + Send)>,
    cancel: C,
) -> Result<StreamedAnswer>
where
    C: Future<Output = ()>,
{
    tokio::pin!(cancel);

    let outcome = tokio::select! {
        biased;
        _ = &mut cancel => {
            info!("Query cancelled by user");
            Err(Error::Cancelled)
        }
        result = drive(provider, envelope, &mut indicator, live) => result,
    };

    indicator.stop().await;
    outcome
}

async fn drive(
    provider: &dyn CompletionProvider,
    envelope: CompletionRequestEnvelope,
    indicator: &mut ProgressIndicator,
    mut live: Option<&mut (dyn Write + Send)>,
) -> Result<StreamedAnswer> {
    let mut fragments = provider.stream(envelope).await.map_err(|e| {
        warn!("{} request failed ({}): {}", provider.name(), e.kind(), e);
        e
    })?;

    let mut answer = StreamedAnswer::default();
    let mut count = 0usize;

    while let Some(item) = fragments.next().await {
        let fragment = item.map_err(|e| {
            warn!("Stream from {} failed ({}): {}", provider.name(), e.kind(), e);
            e
        })?;

        if count == 0 {
            indicator.stop().await;
            debug!("First fragment received");
        }
        count += 1;

        if !fragment.text_delta.is_empty() {
            if let Some(out) = live.as_mut() {
                if let Err(e) = out
                    .write_all(fragment.text_delta.as_bytes())
                    .and_then(|_| out.flush())
                {
                    warn!("Failed to write streamed text: {}", e);
                }
            }
            answer.text.push_str(&fragment.text_delta);
        }
        if !fragment.sources.is_empty() {
            answer.sources = fragment.sources;
        }

        if fragment.is_final {
            info!(
                "Received {} fragments, {} chars, {} sources",
                count,
                answer.text.len(),
                answer.sources.len()
            );
            return Ok(answer);
        }
    }

    Err(ProviderError::MalformedResponse(
        "stream ended without a final fragment".to_string(),
    )
    .into())
}
