//! Ingestion of announcement emails.
//!
//! A [`MessageSource`] hands out raw messages; the [`Ingestor`] runs each one
//! through the [`EmailExtractor`] and stores whatever comes out. Messages are
//! acknowledged (deleted, marked seen) only once they have been handled, so a
//! storage failure leaves them in place for the next pass.

pub mod drop_dir;
pub mod imap;

pub use drop_dir::DropDirectory;
pub use imap::ImapMailbox;

use crate::extract::EmailExtractor;
use crate::models::IngestSummary;
use crate::store::ReportStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },
    #[error("IMAP error: {0}")]
    Imap(#[from] ::imap::Error),
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("mailbox operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("mailbox worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// One message as delivered by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Source specific handle used for acknowledgement.
    pub id: String,
    pub bytes: Vec<u8>,
}

/// Provider of raw messages.
#[rocket::async_trait]
pub trait MessageSource: Send + Sync {
    fn name(&self) -> &str;

    /// Messages not yet consumed.
    async fn fetch(&self) -> Result<Vec<RawMessage>, SourceError>;

    /// Mark messages as consumed.
    async fn acknowledge(&self, ids: &[String]) -> Result<(), SourceError>;
}

/// Moves messages from sources into the store.
pub struct Ingestor {
    sources: Vec<Box<dyn MessageSource>>,
    extractor: EmailExtractor,
    store: Arc<dyn ReportStore>,
}

impl Ingestor {
    pub fn new(
        sources: Vec<Box<dyn MessageSource>>,
        extractor: EmailExtractor,
        store: Arc<dyn ReportStore>,
    ) -> Self {
        Self {
            sources,
            extractor,
            store,
        }
    }

    /// Drain every source once, in registration order.
    pub async fn run_pass(&self) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for source in &self.sources {
            let messages = match source.fetch().await {
                Ok(messages) => messages,
                Err(err) => {
                    log::error!("failed to fetch messages from {}: {}", source.name(), err);
                    summary.source_errors += 1;
                    continue;
                }
            };

            if messages.is_empty() {
                log::debug!("no new messages in {}", source.name());
                continue;
            }

            log::info!("{} new messages in {}", messages.len(), source.name());

            let mut handled = Vec::with_capacity(messages.len());
            for message in messages {
                summary.messages += 1;

                let Some(request) = self.extractor.extract(&message.bytes) else {
                    summary.ignored += 1;
                    handled.push(message.id);
                    continue;
                };

                match self.store.insert_if_absent(&request).await {
                    Ok(Some(id)) => {
                        log::info!(
                            "stored report request {} for {} {} ({})",
                            id,
                            request.tree,
                            request.version,
                            request.message_id
                        );
                        summary.stored += 1;
                        handled.push(message.id);
                    }
                    Ok(None) => {
                        summary.duplicates += 1;
                        handled.push(message.id);
                    }
                    Err(err) => {
                        log::error!(
                            "failed to store report request for {}: {}",
                            request.message_id,
                            err
                        );
                    }
                }
            }

            if handled.is_empty() {
                continue;
            }
            if let Err(err) = source.acknowledge(&handled).await {
                log::error!("failed to acknowledge messages in {}: {}", source.name(), err);
                summary.source_errors += 1;
            }
        }

        summary
    }
}
