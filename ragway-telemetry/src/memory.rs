//! In-memory span capture, grouped by tenant.
//!
//! [`SpanRecorderLayer`] records every closed span that carries (or inherits
//! from a parent) a `tenant_id` field into a [`SpanStore`]. Spans without a
//! tenant are not kept.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{Id, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Span field that selects the store bucket.
pub const TENANT_FIELD: &str = "tenant_id";

/// A closed span.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpanRecord {
    /// Hex span id, unique while the span is alive.
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    pub target: String,
    /// Unix time in nanoseconds.
    pub start_time: u128,
    /// Unix time in nanoseconds.
    pub end_time: u128,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl SpanRecord {
    /// Wall-clock time between open and close.
    pub fn duration(&self) -> Duration {
        let nanos = self.end_time.saturating_sub(self.start_time);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// String value of an attribute, if it was recorded as one.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|value| value.as_str())
    }
}

/// Shared storage for captured spans, keyed by tenant id.
#[derive(Debug, Clone, Default)]
pub struct SpanStore {
    spans: Arc<RwLock<HashMap<String, Vec<SpanRecord>>>>,
}

impl SpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spans recorded for `tenant_id`, in close order.
    pub fn spans_for(&self, tenant_id: &str) -> Vec<SpanRecord> {
        self.spans
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Tenants with at least one recorded span, sorted.
    pub fn tenants(&self) -> Vec<String> {
        let mut tenants: Vec<String> =
            self.spans.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        tenants.sort();
        tenants
    }

    pub fn record(&self, tenant_id: String, span: SpanRecord) {
        self.spans
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id)
            .or_default()
            .push(span);
    }

    pub fn clear(&self) {
        self.spans.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// A tracing layer that captures tenant-scoped spans in memory.
#[derive(Debug, Clone)]
pub struct SpanRecorderLayer {
    store: SpanStore,
}

impl SpanRecorderLayer {
    pub fn new(store: SpanStore) -> Self {
        Self { store }
    }
}

#[derive(Clone, Copy)]
struct StartTime(u128);

#[derive(Clone)]
struct SpanFields(HashMap<String, serde_json::Value>);

fn unix_nanos() -> u128 {
    SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_nanos()
}

impl<S> Layer<S> for SpanRecorderLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &tracing::span::Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        let mut fields = visitor.0;

        // Child spans belong to the tenant of their parent.
        if !fields.contains_key(TENANT_FIELD) {
            let inherited = span.parent().and_then(|parent| {
                parent.extensions().get::<SpanFields>().and_then(|f| f.0.get(TENANT_FIELD).cloned())
            });
            if let Some(tenant) = inherited {
                fields.insert(TENANT_FIELD.to_string(), tenant);
            }
        }

        let mut extensions = span.extensions_mut();
        extensions.insert(StartTime(unix_nanos()));
        extensions.insert(SpanFields(fields));
    }

    fn on_record(&self, id: &Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            let mut visitor = JsonVisitor::default();
            values.record(&mut visitor);
            fields.0.extend(visitor.0);
        }
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(&id) else {
            return;
        };
        let extensions = span.extensions();
        let Some(fields) = extensions.get::<SpanFields>() else {
            return;
        };
        let Some(tenant_id) = fields.0.get(TENANT_FIELD).and_then(|v| v.as_str()) else {
            return;
        };

        let metadata = span.metadata();
        let record = SpanRecord {
            span_id: format!("{:016x}", id.into_u64()),
            parent_id: span.parent().map(|parent| format!("{:016x}", parent.id().into_u64())),
            name: metadata.name().to_string(),
            target: metadata.target().to_string(),
            start_time: extensions.get::<StartTime>().map(|s| s.0).unwrap_or_default(),
            end_time: unix_nanos(),
            attributes: fields.0.clone(),
        };
        self.store.record(tenant_id.to_string(), record);
    }
}

#[derive(Default)]
struct JsonVisitor(HashMap<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }
}

#[cfg(test)]
mod tests {
    use tracing::{Instrument, info_span};
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;

    fn recording(store: SpanStore) -> impl Subscriber + Send + Sync {
        tracing_subscriber::registry().with(SpanRecorderLayer::new(store))
    }

    #[test]
    fn spans_are_grouped_by_tenant() {
        let store = SpanStore::new();
        tracing::subscriber::with_default(recording(store.clone()), || {
            info_span!("rag.query", tenant_id = "tenant-a", top_k = 5u64).in_scope(|| {});
            info_span!("rag.search", tenant_id = "tenant-b").in_scope(|| {});
            info_span!("rag.search", tenant_id = "tenant-a").in_scope(|| {});
        });

        assert_eq!(store.tenants(), ["tenant-a", "tenant-b"]);
        let spans = store.spans_for("tenant-a");
        let names: Vec<&str> = spans.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["rag.query", "rag.search"]);
        assert_eq!(spans[0].attributes.get("top_k"), Some(&serde_json::json!(5)));
        assert!(spans[0].end_time >= spans[0].start_time);
    }

    #[test]
    fn children_inherit_the_parent_tenant() {
        let store = SpanStore::new();
        tracing::subscriber::with_default(recording(store.clone()), || {
            info_span!("rag.ingest", tenant_id = "tenant-a").in_scope(|| {
                info_span!("embed", batch = 0u64).in_scope(|| {});
            });
        });

        let spans = store.spans_for("tenant-a");
        assert_eq!(spans.len(), 2);
        let (child, parent) = (&spans[0], &spans[1]);
        assert_eq!(child.name, "embed");
        assert_eq!(child.parent_id.as_deref(), Some(parent.span_id.as_str()));
        assert_eq!(child.attribute(TENANT_FIELD), Some("tenant-a"));
    }

    #[test]
    fn spans_without_tenant_are_dropped() {
        let store = SpanStore::new();
        tracing::subscriber::with_default(recording(store.clone()), || {
            info_span!("startup").in_scope(|| {});
        });
        assert!(store.tenants().is_empty());
    }

    #[test]
    fn late_recorded_fields_are_kept() {
        let store = SpanStore::new();
        tracing::subscriber::with_default(recording(store.clone()), || {
            let span = info_span!("rag.query", tenant_id = "t", result_count = tracing::field::Empty);
            span.record("result_count", 3u64);
        });
        assert_eq!(store.spans_for("t")[0].attributes.get("result_count"), Some(&serde_json::json!(3)));
    }

    #[tokio::test]
    async fn async_work_is_timed() {
        let store = SpanStore::new();
        let _guard = tracing::subscriber::set_default(recording(store.clone()));

        async { tokio::time::sleep(Duration::from_millis(5)).await }
            .instrument(info_span!("rag.query", tenant_id = "t"))
            .await;

        let spans = store.spans_for("t");
        assert_eq!(spans.len(), 1);
        assert!(spans[0].duration() >= Duration::from_millis(5));
    }

    #[test]
    fn record_serializes_without_missing_parent() {
        let record = SpanRecord {
            span_id: "0000000000000001".to_string(),
            parent_id: None,
            name: "rag.search".to_string(),
            target: "ragway_rag::pipeline".to_string(),
            start_time: 10,
            end_time: 25,
            attributes: HashMap::new(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"span_id\""));
        assert!(!json.contains("parent_id"));
        assert_eq!(record.duration(), Duration::from_nanos(15));
    }
}
