//! Metrics definitions for the attachment relay.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ATTACH_DURATION: MetricDef = MetricDef {
    name: "attach.duration",
    metric_type: MetricType::Histogram,
    description: "Time to run one relay invocation in seconds. Tagged with method.",
};

pub const ATTACH_OUTCOMES: MetricDef = MetricDef {
    name: "attach.outcome",
    metric_type: MetricType::Counter,
    description: "Relay invocations by result. Tagged with method and success.",
};

pub const FALLBACK_ATTEMPTS: MetricDef = MetricDef {
    name: "attach.fallback",
    metric_type: MetricType::Counter,
    description: "Number of times the update-thread fallback was attempted",
};

pub const SCHEMA_QUERY_FAILURES: MetricDef = MetricDef {
    name: "schema.query.failed",
    metric_type: MetricType::Counter,
    description: "Schema queries that failed or returned an unreadable response. Tagged with source.",
};

pub const DATE_STAMP_FAILURES: MetricDef = MetricDef {
    name: "date_stamp.failed",
    metric_type: MetricType::Counter,
    description: "Date stamps that were skipped or rejected",
};

pub const ALL_METRICS: &[MetricDef] = &[
    ATTACH_DURATION,
    ATTACH_OUTCOMES,
    FALLBACK_ATTEMPTS,
    SCHEMA_QUERY_FAILURES,
    DATE_STAMP_FAILURES,
];
