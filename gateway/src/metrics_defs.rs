use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUESTS_TOTAL: MetricDef = MetricDef {
    name: "gateway.requests.total",
    metric_type: MetricType::Counter,
    description: "Requests accepted by the router; one increment per request lifecycle.",
};

pub const ERRORS_TOTAL: MetricDef = MetricDef {
    name: "gateway.errors.total",
    metric_type: MetricType::Counter,
    description: "Requests that ended in a 404 or an internal fault.",
};

pub const UPLOAD_BYTES_RECEIVED: MetricDef = MetricDef {
    name: "gateway.upload.bytes_received",
    metric_type: MetricType::Histogram,
    description: "Size in bytes of fully received upload bodies.",
};

// New metrics must be registered here until collection is automated.
pub const ALL_METRICS: &[MetricDef] = &[REQUESTS_TOTAL, ERRORS_TOTAL, UPLOAD_BYTES_RECEIVED];
