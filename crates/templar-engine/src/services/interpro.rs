//! InterProScan adapter
//!
//! Submits the target sequence to the InterProScan REST service, polls
//! until the job reaches a terminal status and parses the match XML into
//! annotated ranges. Results are memoized in the shared file cache keyed by
//! the sequence fingerprint: a scan takes minutes and the same sequence is
//! requested over and over.
//!
//! Quirks carried from production: a `NOT_FOUND` status means the service
//! forgot the job and it is resubmitted; a `FAILURE`/`ERROR` response whose
//! body is nonetheless a parseable `protein-matches` document still yields
//! ranges; matches of 20 residues or less are dropped unless the entry is a
//! zinc finger.

use crate::caps::DomainAnnotation;
use crate::config::InterproSettings;
use crate::error::{PipelineError, Result};
use crate::models::range::{AnnotatedRange, SequenceRange};
use crate::services::cache::FileCache;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MIN_DOMAIN_LENGTH: usize = 21;

pub struct InterproService {
    client: reqwest::Client,
    settings: InterproSettings,
    cache: Option<Arc<FileCache>>,
}

impl InterproService {
    pub fn new(settings: InterproSettings, cache: Option<Arc<FileCache>>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Init(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            client,
            settings,
            cache,
        })
    }

    async fn submit(&self, sequence: &str) -> Result<String> {
        let submit_url = format!("{}/run", self.settings.url);
        let params = [
            ("email", self.settings.email.as_str()),
            ("sequence", sequence),
            ("goterms", "true"),
            ("pathways", "false"),
        ];
        let response = self
            .client
            .post(&submit_url)
            .form(&params)
            .send()
            .await
            .map_err(service_error)?;
        let response = response.error_for_status().map_err(service_error)?;
        Ok(response.text().await.map_err(service_error)?)
    }

    async fn status(&self, job_id: &str) -> Result<String> {
        let status_url = format!("{}/status/{}", self.settings.url, job_id);
        let response = self
            .client
            .get(&status_url)
            .send()
            .await
            .map_err(service_error)?
            .error_for_status()
            .map_err(service_error)?;
        Ok(response.text().await.map_err(service_error)?)
    }

    async fn result_xml(&self, job_id: &str) -> Result<String> {
        let result_url = format!("{}/result/{}/xml", self.settings.url, job_id);
        let response = self
            .client
            .get(&result_url)
            .send()
            .await
            .map_err(service_error)?
            .error_for_status()
            .map_err(service_error)?;
        Ok(response.text().await.map_err(service_error)?)
    }

    async fn scan(&self, sequence: &str) -> Result<Vec<AnnotatedRange>> {
        let mut job_id = self.submit(sequence).await?;
        debug!(job_id = %job_id, "interproscan job submitted");

        let started = tokio::time::Instant::now();
        let job_timeout = Duration::from_secs(self.settings.job_timeout_secs);
        let poll_interval = Duration::from_secs(self.settings.poll_interval_secs);

        let mut status = self.status(&job_id).await?;
        while started.elapsed() < job_timeout {
            match status.as_str() {
                "RUNNING" | "PENDING" | "STARTED" | "QUEUED" => {
                    tokio::time::sleep(poll_interval).await;
                },
                "NOT_FOUND" => {
                    // The service lost the job; start over.
                    job_id = self.submit(sequence).await?;
                },
                _ => break,
            }
            status = self.status(&job_id).await?;
        }

        match status.as_str() {
            "RUNNING" | "PENDING" | "STARTED" | "QUEUED" => Err(PipelineError::Service(
                "interproscan job timed out".to_string(),
            )),
            "FAILURE" | "ERROR" => {
                let response_text = self.result_xml(&job_id).await?;
                match parse_interpro_ranges(&response_text) {
                    Ok(ranges) => Ok(ranges),
                    Err(_) => Err(PipelineError::Service(response_text)),
                }
            },
            "FINISHED" => {
                let xml_str = self.result_xml(&job_id).await?;
                parse_interpro_ranges(&xml_str)
            },
            other => Err(PipelineError::Service(format!(
                "interproscan job status = {}",
                other
            ))),
        }
    }
}

fn service_error(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() || e.is_connect() {
        PipelineError::Service("timeout connecting with interpro".to_string())
    } else {
        PipelineError::Service(format!("interpro request failed: {}", e))
    }
}

#[async_trait]
impl DomainAnnotation for InterproService {
    async fn domain_ranges(&self, sequence: &str) -> Result<Vec<AnnotatedRange>> {
        let Some(cache) = &self.cache else {
            return self.scan(sequence).await;
        };

        let key = format!(
            "interpro_domain_ranges_{}",
            templar_common::fingerprint::sequence_id(sequence)
        );

        match cache.lock_key(&key).await? {
            Some(_guard) => {
                if let Some(ranges) = cache.get::<Vec<AnnotatedRange>>(&key) {
                    debug!(key = %key, "interpro cache hit");
                    return Ok(ranges);
                }
                let ranges = self.scan(sequence).await?;
                cache.put(&key, &ranges)?;
                Ok(ranges)
            },
            None => {
                // Lock contention: best-effort read, else compute uncached.
                warn!(key = %key, "interpro cache lock contended");
                if let Some(ranges) = cache.get::<Vec<AnnotatedRange>>(&key) {
                    return Ok(ranges);
                }
                self.scan(sequence).await
            },
        }
    }
}

// ============================================================================
// Match XML parsing
// ============================================================================

/// Parse an InterProScan `protein-matches` document into annotated ranges
/// over the scanned sequence. Locations come in 1-based inclusive and map
/// to `(start-1, end-1)` half-open ranges.
pub fn parse_interpro_ranges(xml_str: &str) -> Result<Vec<AnnotatedRange>> {
    let mut reader = Reader::from_reader(xml_str.as_bytes());
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut saw_protein_matches = false;
    let mut capture_sequence = false;
    let mut sequence = String::new();

    let mut current_entry: Option<(String, String)> = None; // (ac, desc)
    let mut current_locations: Vec<(usize, usize)> = Vec::new();
    let mut ranges: Vec<AnnotatedRange> = Vec::new();

    let mut handle_element = |name: &str,
                              attrs: &[(String, String)],
                              stack: &mut Vec<String>,
                              current_entry: &mut Option<(String, String)>,
                              current_locations: &mut Vec<(usize, usize)>| {
        if name == "protein-matches" {
            saw_protein_matches = true;
        }
        if stack.last().map(|s| s.as_str()) == Some("matches") {
            // a new match element begins
            *current_entry = None;
            current_locations.clear();
        }
        if name == "entry" {
            let ac = attrs
                .iter()
                .find(|(k, _)| k == "ac")
                .map(|(_, v)| v.clone());
            let desc = attrs
                .iter()
                .find(|(k, _)| k == "desc")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            if let Some(ac) = ac {
                *current_entry = Some((ac, desc));
            }
        }
        if stack.last().map(|s| s.as_str()) == Some("locations") {
            let start = attrs
                .iter()
                .find(|(k, _)| k == "start")
                .and_then(|(_, v)| v.parse::<usize>().ok());
            let end = attrs
                .iter()
                .find(|(k, _)| k == "end")
                .and_then(|(_, v)| v.parse::<usize>().ok());
            if let (Some(start), Some(end)) = (start, end) {
                current_locations.push((start, end));
            }
        }
    };

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                let attrs = collect_attributes(&e);
                handle_element(
                    &name,
                    &attrs,
                    &mut stack,
                    &mut current_entry,
                    &mut current_locations,
                );
                if name == "sequence" && stack.last().map(|s| s.as_str()) == Some("protein") {
                    capture_sequence = true;
                }
                stack.push(name);
            },
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                let attrs = collect_attributes(&e);
                handle_element(
                    &name,
                    &attrs,
                    &mut stack,
                    &mut current_entry,
                    &mut current_locations,
                );
            },
            Ok(Event::Text(t)) => {
                if capture_sequence {
                    sequence.push_str(String::from_utf8_lossy(&t).trim());
                }
            },
            Ok(Event::End(_)) => {
                let closed = stack.pop().unwrap_or_default();
                if closed == "sequence" {
                    capture_sequence = false;
                }
                if stack.last().map(|s| s.as_str()) == Some("matches") {
                    // a match element ends: emit its entry's locations
                    if let Some((ac, desc)) = current_entry.take() {
                        let allow_short = desc.to_lowercase().contains("zinc finger");
                        for (loc_start, loc_end) in current_locations.drain(..) {
                            if loc_start < 1 || loc_end < 1 {
                                continue;
                            }
                            let start = loc_start - 1;
                            let end = loc_end - 1;
                            if end <= start {
                                continue;
                            }
                            if end - start >= MIN_DOMAIN_LENGTH || allow_short {
                                match SequenceRange::new(start, end, sequence.clone()) {
                                    Ok(range) => ranges.push(AnnotatedRange {
                                        range,
                                        accession: ac.clone(),
                                    }),
                                    Err(e) => {
                                        warn!(ac = %ac, error = %e, "skipping out-of-bounds interpro location")
                                    },
                                }
                            }
                        }
                    }
                    current_locations.clear();
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(e) => return Err(PipelineError::Xml(e)),
        }
        buf.clear();
    }

    if !saw_protein_matches {
        return Err(PipelineError::Service(
            "not an interproscan protein-matches document".to_string(),
        ));
    }

    Ok(ranges)
}

fn local_name(qname: &[u8]) -> String {
    let name = qname
        .rsplit(|b| *b == b':')
        .next()
        .unwrap_or(qname);
    String::from_utf8_lossy(name).to_string()
}

fn collect_attributes(e: &quick_xml::events::BytesStart<'_>) -> Vec<(String, String)> {
    e.attributes()
        .filter_map(|a| a.ok())
        .map(|a| {
            (
                local_name(a.key.as_ref()),
                String::from_utf8_lossy(&a.value).to_string(),
            )
        })
        .collect()
}
