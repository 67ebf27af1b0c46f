//! UniProt sequence lookup
//!
//! Fetches `<url>/<accession>.fasta` and returns the first record's
//! sequence.

use crate::caps::SequenceSource;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct UniprotService {
    client: reqwest::Client,
    url: String,
}

impl UniprotService {
    pub fn new(url: impl Into<String>, http_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| PipelineError::Init(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SequenceSource for UniprotService {
    async fn sequence(&self, accession: &str) -> Result<String> {
        let fasta_url = format!("{}/{}.fasta", self.url, accession);
        debug!(url = %fasta_url, "fetching uniprot sequence");

        let response = self
            .client
            .get(&fasta_url)
            .send()
            .await
            .map_err(service_error)?
            .error_for_status()
            .map_err(service_error)?;
        let text = response.text().await.map_err(service_error)?;

        let records = templar_common::fasta::parse_fasta_str(&text)?;
        records
            .into_iter()
            .next()
            .map(|(_, sequence)| sequence)
            .ok_or_else(|| {
                PipelineError::Service(format!("no fasta record for accession {}", accession))
            })
    }
}

fn service_error(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() || e.is_connect() {
        PipelineError::Service("timeout connecting with uniprot".to_string())
    } else {
        PipelineError::Service(format!("uniprot request failed: {}", e))
    }
}
