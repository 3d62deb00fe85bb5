use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};
use std::sync::Arc;

/// Prometheus metrics for the filter index
#[derive(Clone)]
pub struct IndexMetrics {
    // Counters
    pub docs_added: Counter,
    pub docs_deleted: Counter,
    pub duplicate_adds: Counter,
    pub stale_deletes: Counter,
    pub searches_total: CounterVec,

    // Gauges
    pub mutation_queue_depth: Gauge,

    // Histograms
    pub search_latency: Histogram,

    // Registry
    registry: Arc<Registry>,
}

impl IndexMetrics {
    /// Create a new IndexMetrics instance
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let docs_added = Counter::with_opts(Opts::new(
            "baleen_documents_added_total",
            "Total number of document field values indexed",
        ))?;
        registry.register(Box::new(docs_added.clone()))?;

        let docs_deleted = Counter::with_opts(Opts::new(
            "baleen_documents_deleted_total",
            "Total number of document field values removed",
        ))?;
        registry.register(Box::new(docs_deleted.clone()))?;

        let duplicate_adds = Counter::with_opts(Opts::new(
            "baleen_duplicate_adds_total",
            "Adds ignored because the document was already indexed",
        ))?;
        registry.register(Box::new(duplicate_adds.clone()))?;

        let stale_deletes = Counter::with_opts(Opts::new(
            "baleen_stale_deletes_total",
            "Deletes of documents that were not indexed",
        ))?;
        registry.register(Box::new(stale_deletes.clone()))?;

        let searches_total = CounterVec::new(
            Opts::new(
                "baleen_searches_total",
                "Total number of filter searches by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(searches_total.clone()))?;

        let mutation_queue_depth = Gauge::with_opts(Opts::new(
            "baleen_mutation_queue_depth",
            "Mutations waiting on the write pipeline",
        ))?;
        registry.register(Box::new(mutation_queue_depth.clone()))?;

        let search_latency = Histogram::with_opts(HistogramOpts::new(
            "baleen_search_latency_seconds",
            "Filter search latency in seconds",
        ))?;
        registry.register(Box::new(search_latency.clone()))?;

        Ok(Self {
            docs_added,
            docs_deleted,
            duplicate_adds,
            stale_deletes,
            searches_total,
            mutation_queue_depth,
            search_latency,
            registry: Arc::new(registry),
        })
    }

    /// Get the underlying registry for exposition
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Gather all current metric families
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}
