//! Bulk loading of a known scam network, guarded reset and graph statistics.

pub mod dataset;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::error::{FraudGraphError, Result};
use crate::graph::{GraphStore, Label, Relation, Vertex, VertexKey};
use crate::investigate::InvestigationService;

pub use dataset::{Dataset, SeedLink};

/// How the operator confirms a destructive reset.
pub enum Confirmation<'a> {
    /// An operator at a terminal answers a prompt
    Attended {
        input: &'a mut dyn BufRead,
        prompt: &'a mut dyn Write,
    },
    /// No terminal; only an explicit override lets the reset through
    Unattended { assume_yes: bool },
}

/// Proof that the reset guard approved a wipe. Only [`ResetGuard::authorize`]
/// hands these out and [`BulkLoader::reset`] consumes one.
#[derive(Debug)]
pub struct ResetAuthorization {
    _private: (),
}

pub struct ResetGuard {
    environment: String,
}

impl ResetGuard {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.deployment.environment.clone())
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    /// `Ok(None)` means the operator declined and nothing should be touched.
    /// A production designation is a hard `Configuration` error.
    pub fn authorize(&self, confirmation: Confirmation<'_>) -> Result<Option<ResetAuthorization>> {
        if self.is_production() {
            log::error!("Refusing to wipe the graph in environment {}", self.environment);
            return Err(FraudGraphError::Configuration(format!(
                "graph reset is disabled in environment '{}'",
                self.environment
            )));
        }

        match confirmation {
            Confirmation::Attended { input, prompt } => {
                write!(prompt, "This will wipe ALL graph data. Type 'yes' to confirm: ")?;
                prompt.flush()?;

                let mut answer = String::new();
                if input.read_line(&mut answer)? == 0 {
                    log::warn!("Reset aborted: no confirmation received");
                    return Ok(None);
                }
                if answer.trim().eq_ignore_ascii_case("yes") {
                    log::info!("Reset confirmed by operator");
                    Ok(Some(ResetAuthorization { _private: () }))
                } else {
                    log::warn!("Reset aborted by operator");
                    Ok(None)
                }
            }
            Confirmation::Unattended { assume_yes: true } => {
                log::warn!("Unattended reset approved by explicit override");
                Ok(Some(ResetAuthorization { _private: () }))
            }
            Confirmation::Unattended { assume_yes: false } => {
                log::warn!("Reset aborted: no terminal to confirm on and no override given");
                Ok(None)
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SeedReport {
    pub created: u64,
    pub existing: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetReport {
    pub vertices: SeedReport,
    pub edges: SeedReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphStatistics {
    pub total_vertices: u64,
    pub vertices_by_label: BTreeMap<String, u64>,
    pub total_edges: u64,
    pub ring_threshold: usize,
    pub rings: BTreeSet<String>,
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Graph Statistics:")?;
        writeln!(f, "  Vertices: {}", self.total_vertices)?;
        for (label, count) in &self.vertices_by_label {
            writeln!(f, "    {:<12} {:>6}", label, count)?;
        }
        writeln!(f, "  Edges:    {}", self.total_edges)?;
        writeln!(
            f,
            "Scam rings (phones operating {}+ payment addresses): {}",
            self.ring_threshold,
            self.rings.len()
        )?;
        for number in &self.rings {
            writeln!(f, "  {}", number)?;
        }
        Ok(())
    }
}

pub struct BulkLoader {
    store: Arc<dyn GraphStore>,
    investigation: InvestigationService,
}

impl BulkLoader {
    pub fn new(store: Arc<dyn GraphStore>, ring_threshold: usize) -> Self {
        let investigation = InvestigationService::new(Arc::clone(&store), ring_threshold);
        Self { store, investigation }
    }

    pub fn from_config(config: &Config, store: Arc<dyn GraphStore>) -> Self {
        Self::new(store, config.graph.ring_threshold)
    }

    pub async fn reset(&self, _authorization: ResetAuthorization) -> Result<()> {
        log::warn!("Clearing existing graph data");
        self.store.drop_all().await
    }

    /// Upsert each record. A bad record is logged and counted; an unreachable
    /// store stops the run.
    pub async fn seed_vertices(&self, vertices: Vec<Vertex>) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        for vertex in vertices {
            let key = vertex.key();
            let existed = match self.store.get_vertex(&key).await {
                Ok(found) => found.is_some(),
                Err(err) if err.is_retryable() => return Err(err),
                // A row is there but unreadable; the upsert below replaces it
                Err(err) => {
                    log::warn!("Stored {} is unreadable, overwriting: {}", key, err);
                    true
                }
            };
            match self.store.upsert_vertex(vertex).await {
                Ok(_) if existed => report.existing += 1,
                Ok(_) => {
                    log::debug!("Seeded {}", key);
                    report.created += 1;
                }
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => {
                    log::warn!("Skipping {}: {}", key, err);
                    report.failed += 1;
                }
            }
        }
        log::info!(
            "Vertices: {} created, {} already present, {} failed",
            report.created,
            report.existing,
            report.failed
        );
        Ok(report)
    }

    pub async fn seed_edges(&self, links: &[SeedLink]) -> Result<SeedReport> {
        let mut report = SeedReport::default();
        for link in links {
            let phone = VertexKey::phone(&link.phone);
            let upi = VertexKey::upi(&link.vpa);
            match self.store.add_edge(&phone, &upi, Relation::OperatedBy).await {
                Ok(true) => report.created += 1,
                Ok(false) => report.existing += 1,
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => {
                    log::warn!("Skipping link {} -> {}: {}", link.phone, link.vpa, err);
                    report.failed += 1;
                }
            }
        }
        log::info!(
            "Edges: {} created, {} already present, {} failed",
            report.created,
            report.existing,
            report.failed
        );
        Ok(report)
    }

    pub async fn seed_dataset(&self, dataset: &Dataset) -> Result<DatasetReport> {
        let vertices = self.seed_vertices(dataset.vertices()).await?;
        let edges = self.seed_edges(&dataset.links).await?;
        Ok(DatasetReport { vertices, edges })
    }

    pub async fn report_statistics(&self) -> Result<GraphStatistics> {
        let mut vertices_by_label = BTreeMap::new();
        for label in Label::ALL {
            vertices_by_label.insert(label.to_string(), self.store.count_vertices(Some(label)).await?);
        }

        Ok(GraphStatistics {
            total_vertices: self.store.count_vertices(None).await?,
            vertices_by_label,
            total_edges: self.store.count_edges(None).await?,
            ring_threshold: self.investigation.ring_threshold(),
            rings: self.investigation.find_scam_rings(None).await?,
        })
    }
}
