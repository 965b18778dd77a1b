//! Binder lifecycle adapter.
//!
//! A [`Binder`] owns a spec factory (input entities in, [`BindingSpec`]
//! out) and drives one multiplexer through a consumer's lifecycle:
//! [`attach`](Binder::attach) subscribes and delivers the first props
//! synchronously, [`update_inputs`](Binder::update_inputs) resubscribes
//! only when entity identity actually changed, and
//! [`detach`](Binder::detach) tears everything down deterministically. The
//! identity check is what keeps value-level churn (a record's fields
//! changing under a stable id) from causing subscription churn.
//!
//! Deliveries are *props*: the merge of caller-given pass-through values
//! and the bound values of the latest snapshot, with bound values shadowing
//! a given value of the same name.

use indexmap::IndexMap;
use prism_core::{BindError, BindResult, BindingValue, EntityRef, Value};
use prism_store::LocalStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::mux::{combine, BindingSpec, Multiplexer, MuxConfig, SnapshotEvent, SnapshotSink};

/// Lifecycle state of a binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderState {
    /// Constructed, no subscriptions held.
    Unbound,
    /// Live: subscriptions held, deliveries flowing.
    Subscribed,
    /// Swapping subscriptions after an identity change.
    Rebinding,
    /// Detached. Terminal; all operations fail with `TornDown`.
    TornDown,
}

/// The named input entities a consumer supplies to the spec factory.
///
/// Identity is the full (name, entity reference) mapping: two inputs are
/// the same identity when every name resolves to the same `(table, id)`
/// pair. Record *contents* never enter into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityInputs {
    entries: IndexMap<String, EntityRef>,
}

impl EntityInputs {
    /// No inputs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named input entity.
    pub fn with(mut self, name: impl Into<String>, entity: EntityRef) -> Self {
        self.entries.insert(name.into(), entity);
        self
    }

    /// Look up an input by name.
    pub fn get(&self, name: &str) -> Option<&EntityRef> {
        self.entries.get(name)
    }

    /// Look up an input that the spec factory cannot do without.
    pub fn require(&self, name: &str) -> BindResult<&EntityRef> {
        self.entries
            .get(name)
            .ok_or_else(|| BindError::MissingInput(name.to_string()))
    }

    /// Whether `other` names the same entities under the same names.
    pub fn same_identity(&self, other: &EntityInputs) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(name, entity)| other.entries.get(name) == Some(entity))
    }
}

/// One effective prop value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropValue {
    /// Sourced from a live binding.
    Bound(BindingValue),
    /// A caller-given pass-through value, not store-backed.
    Given(Value),
}

impl PropValue {
    /// The bound value, if this prop is store-backed.
    pub fn as_bound(&self) -> Option<&BindingValue> {
        match self {
            PropValue::Bound(v) => Some(v),
            PropValue::Given(_) => None,
        }
    }
}

/// The consumer's effective inputs: given values merged with bound values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Props {
    seq: u64,
    entries: IndexMap<String, PropValue>,
}

impl Props {
    /// Commit sequence of the snapshot these props reflect.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Value of the named prop.
    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.entries.get(name)
    }

    /// Iterate (name, value) pairs: given values first, then bindings in
    /// declaration order, with bindings shadowing same-named givens.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PropValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of props.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no props.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One delivery from a binder.
#[derive(Debug, Clone, PartialEq)]
pub enum PropsEvent {
    /// A new consistent set of effective props.
    Props(Props),
    /// Terminal: the named binding stopped resolving; the binder's
    /// subscriptions are already released.
    Unavailable {
        /// Name of the binding that failed.
        binding: String,
    },
}

/// Consumer-side receiver of props deliveries.
pub trait PropsSink: Send + Sync {
    /// Accept one delivery.
    fn deliver(&self, event: PropsEvent);
}

impl<F> PropsSink for F
where
    F: Fn(PropsEvent) + Send + Sync,
{
    fn deliver(&self, event: PropsEvent) {
        self(event)
    }
}

/// Builds the binding spec for a given set of input entities.
pub type SpecFactory = dyn Fn(&EntityInputs) -> BindResult<BindingSpec> + Send + Sync;

// Snapshot-to-props adapter sitting between the multiplexer and the
// consumer sink. Owned by the multiplexer task, so it survives rebinds
// only as long as its multiplexer does.
struct PropsAdapter {
    sink: Arc<dyn PropsSink>,
    pass_through: IndexMap<String, Value>,
}

impl SnapshotSink for PropsAdapter {
    fn deliver(&self, event: SnapshotEvent) {
        match event {
            SnapshotEvent::Snapshot(snapshot) => {
                let mut entries: IndexMap<String, PropValue> = self
                    .pass_through
                    .iter()
                    .map(|(k, v)| (k.clone(), PropValue::Given(v.clone())))
                    .collect();
                for (name, value) in snapshot.iter() {
                    entries.insert(name.to_string(), PropValue::Bound(value.clone()));
                }
                self.sink.deliver(PropsEvent::Props(Props {
                    seq: snapshot.seq(),
                    entries,
                }));
            }
            SnapshotEvent::Unavailable { binding } => {
                self.sink.deliver(PropsEvent::Unavailable { binding });
            }
        }
    }
}

/// Drives one consumer's bindings through attach, input updates, and
/// detach.
///
/// The binder holds subscriptions only between a successful
/// [`attach`](Binder::attach) and [`detach`](Binder::detach) (or drop);
/// subscription count over its lifetime nets to zero.
pub struct Binder<S: LocalStore> {
    store: S,
    factory: Arc<SpecFactory>,
    sink: Arc<dyn PropsSink>,
    pass_through: IndexMap<String, Value>,
    config: MuxConfig,
    state: BinderState,
    inputs: Option<EntityInputs>,
    mux: Option<Multiplexer>,
}

impl<S: LocalStore> Binder<S> {
    /// A new, unbound binder.
    pub fn new<F>(store: S, factory: F, sink: Arc<dyn PropsSink>) -> Self
    where
        F: Fn(&EntityInputs) -> BindResult<BindingSpec> + Send + Sync + 'static,
    {
        Self {
            store,
            factory: Arc::new(factory),
            sink,
            pass_through: IndexMap::new(),
            config: MuxConfig::default(),
            state: BinderState::Unbound,
            inputs: None,
            mux: None,
        }
    }

    /// Override the multiplexer configuration.
    pub fn with_config(mut self, config: MuxConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a caller-given value merged into every props delivery. A bound
    /// binding with the same name shadows it.
    pub fn with_pass_through(mut self, name: impl Into<String>, value: Value) -> Self {
        self.pass_through.insert(name.into(), value);
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BinderState {
        self.state
    }

    /// Whether the binder currently holds live subscriptions.
    pub fn is_attached(&self) -> bool {
        self.state == BinderState::Subscribed
    }

    /// Number of store subscriptions currently held.
    pub fn subscription_count(&self) -> usize {
        self.mux.as_ref().map_or(0, Multiplexer::subscription_count)
    }

    /// Attach with the given inputs: build the spec, subscribe, and
    /// deliver the initial props synchronously before returning.
    ///
    /// Attaching while already subscribed behaves as
    /// [`update_inputs`](Binder::update_inputs). Fails with
    /// [`BindError::TornDown`] after detach.
    pub fn attach(&mut self, inputs: EntityInputs) -> BindResult<()> {
        match self.state {
            BinderState::TornDown => Err(BindError::TornDown),
            BinderState::Subscribed | BinderState::Rebinding => self.update_inputs(inputs),
            BinderState::Unbound => {
                self.subscribe(inputs)?;
                self.state = BinderState::Subscribed;
                Ok(())
            }
        }
    }

    /// React to new inputs.
    ///
    /// Same identity as the current inputs is a no-op: no resubscription,
    /// no re-delivery. A changed identity tears the old subscriptions down
    /// fully, then subscribes fresh and delivers the new initial props
    /// synchronously. If the rebind fails, the binder is torn down and the
    /// error is returned; it never continues delivering stale bindings.
    pub fn update_inputs(&mut self, inputs: EntityInputs) -> BindResult<()> {
        match self.state {
            BinderState::TornDown => return Err(BindError::TornDown),
            BinderState::Unbound => return self.attach(inputs),
            BinderState::Subscribed | BinderState::Rebinding => {}
        }
        if self.inputs.as_ref().is_some_and(|i| i.same_identity(&inputs)) {
            return Ok(());
        }
        tracing::debug!("input identity changed, rebinding");
        self.state = BinderState::Rebinding;
        // No overlap: old subscriptions are fully released before the new
        // spec subscribes.
        if let Some(mut old) = self.mux.take() {
            old.teardown();
        }
        match self.subscribe(inputs) {
            Ok(()) => {
                self.state = BinderState::Subscribed;
                Ok(())
            }
            Err(err) => {
                self.state = BinderState::TornDown;
                self.inputs = None;
                Err(err)
            }
        }
    }

    /// Release all subscriptions. Idempotent; the binder is terminal
    /// afterwards and no props delivery begins once this returns.
    pub fn detach(&mut self) {
        if let Some(mut mux) = self.mux.take() {
            mux.teardown();
        }
        if self.state != BinderState::TornDown {
            tracing::debug!("binder detached");
        }
        self.state = BinderState::TornDown;
        self.inputs = None;
    }

    fn subscribe(&mut self, inputs: EntityInputs) -> BindResult<()> {
        let spec = (self.factory)(&inputs)?;
        let adapter = Arc::new(PropsAdapter {
            sink: Arc::clone(&self.sink),
            pass_through: self.pass_through.clone(),
        });
        let mux = combine(&self.store, spec, adapter, self.config.clone())?;
        self.inputs = Some(inputs);
        self.mux = Some(mux);
        Ok(())
    }
}

impl<S: LocalStore> Drop for Binder<S> {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::QuerySpec;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use prism_core::{ColumnName, ColumnSet};
    use prism_store::{ChangeSource, MemoryStore, Schema, StoreReader, TableDef};
    use std::time::Duration;

    fn fields(pairs: &[(&str, Value)]) -> Vec<(ColumnName, Value)> {
        pairs
            .iter()
            .map(|(c, v)| (ColumnName::new(*c), v.clone()))
            .collect()
    }

    fn chat_schema() -> Schema {
        Schema::new()
            .with_table(
                "category",
                TableDef::new().via_link(
                    "channels",
                    "category_channel",
                    "category_id",
                    "channel_id",
                    "channel",
                    Some(ColumnName::new("sort_order")),
                ),
            )
            .with_table("channel", TableDef::new())
            .with_table("category_channel", TableDef::new())
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new(chat_schema());
        store
            .write(|tx| {
                tx.insert("category", "c1", fields(&[("display_name", "Favorites".into())]))?;
                tx.insert("category", "c2", fields(&[("display_name", "Work".into())]))?;
                tx.insert("channel", "ch1", fields(&[("display_name", "general".into())]))?;
                tx.insert("channel", "ch2", fields(&[("display_name", "standup".into())]))?;
                tx.insert(
                    "category_channel",
                    "cc1",
                    fields(&[
                        ("category_id", "c1".into()),
                        ("channel_id", "ch1".into()),
                        ("sort_order", 1i64.into()),
                    ]),
                )?;
                tx.insert(
                    "category_channel",
                    "cc2",
                    fields(&[
                        ("category_id", "c2".into()),
                        ("channel_id", "ch2".into()),
                        ("sort_order", 1i64.into()),
                    ]),
                )
            })
            .expect("seed commits");
        store
    }

    fn recording_sink() -> (Arc<dyn PropsSink>, Arc<Mutex<Vec<PropsEvent>>>) {
        let events: Arc<Mutex<Vec<PropsEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let tap = Arc::clone(&events);
        let sink: Arc<dyn PropsSink> = Arc::new(move |event: PropsEvent| {
            tap.lock().push(event);
        });
        (sink, events)
    }

    fn category_binder(
        store: &MemoryStore,
        sink: Arc<dyn PropsSink>,
    ) -> Binder<MemoryStore> {
        let spec_store = store.clone();
        Binder::new(
            store.clone(),
            move |inputs: &EntityInputs| {
                let category = inputs.require("category")?;
                let channels = spec_store.resolve_relation(category, "channels")?;
                Ok(BindingSpec::new()
                    .with("category", QuerySpec::pass_through(category.clone()))
                    .with(
                        "channels",
                        QuerySpec::observe_relation(
                            channels,
                            ColumnSet::new(["display_name"])?,
                        ),
                    ))
            },
            sink,
        )
    }

    fn inputs_for(category: &str) -> EntityInputs {
        EntityInputs::new().with("category", EntityRef::new("category", category))
    }

    fn channel_names(event: &PropsEvent) -> Vec<String> {
        let props = assert_matches!(event, PropsEvent::Props(p) => p);
        props
            .get("channels")
            .and_then(PropValue::as_bound)
            .and_then(BindingValue::as_records)
            .expect("bound collection")
            .iter()
            .filter_map(|r| {
                r.get(&ColumnName::new("display_name"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_entity_inputs_identity() {
        let a = inputs_for("c1");
        let b = inputs_for("c1");
        let c = inputs_for("c2");
        assert!(a.same_identity(&b));
        assert!(!a.same_identity(&c));
        assert!(!a.same_identity(&EntityInputs::new()));
        assert_matches!(a.require("category"), Ok(_));
        assert_matches!(a.require("team"), Err(BindError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_attach_delivers_initial_props_synchronously() {
        let store = seeded_store();
        let (sink, events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        assert_eq!(binder.state(), BinderState::Unbound);

        binder.attach(inputs_for("c1")).expect("attaches");
        assert_eq!(binder.state(), BinderState::Subscribed);
        assert_eq!(binder.subscription_count(), 1);

        let recorded = events.lock().clone();
        assert_eq!(recorded.len(), 1);
        assert_eq!(channel_names(&recorded[0]), vec!["general"]);
        let props = assert_matches!(&recorded[0], PropsEvent::Props(p) => p.clone());
        let category = assert_matches!(
            props.get("category").and_then(PropValue::as_bound),
            Some(BindingValue::Entity(e)) => e
        );
        assert_eq!(category, &EntityRef::new("category", "c1"));
    }

    #[tokio::test]
    async fn test_live_updates_flow_to_props() {
        let store = seeded_store();
        let (sink, events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        binder.attach(inputs_for("c1")).expect("attaches");

        store
            .write(|tx| {
                tx.update("channel", "ch1", fields(&[("display_name", "town-square".into())]))
            })
            .expect("commits");
        settle().await;

        let recorded = events.lock().clone();
        assert_eq!(recorded.len(), 2);
        assert_eq!(channel_names(&recorded[1]), vec!["town-square"]);
    }

    #[tokio::test]
    async fn test_same_identity_update_is_a_no_op() {
        let store = seeded_store();
        let (sink, events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        binder.attach(inputs_for("c1")).expect("attaches");
        assert_eq!(store.observer_count(), 1);

        binder.update_inputs(inputs_for("c1")).expect("no-op");
        assert_eq!(events.lock().len(), 1, "no re-delivery");
        assert_eq!(store.observer_count(), 1, "no subscription churn");
    }

    #[tokio::test]
    async fn test_identity_change_rebinds_and_redelivers() {
        let store = seeded_store();
        let (sink, events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        binder.attach(inputs_for("c1")).expect("attaches");

        binder.update_inputs(inputs_for("c2")).expect("rebinds");
        assert_eq!(binder.state(), BinderState::Subscribed);
        assert_eq!(store.observer_count(), 1, "old subscriptions released");

        let recorded = events.lock().clone();
        assert_eq!(recorded.len(), 2, "initial for c1, initial for c2");
        assert_eq!(channel_names(&recorded[1]), vec!["standup"]);

        // Changes under the old identity no longer deliver.
        store
            .write(|tx| {
                tx.update("channel", "ch1", fields(&[("display_name", "renamed".into())]))
            })
            .expect("commits");
        settle().await;
        assert_eq!(events.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_rebind_tears_down() {
        let store = seeded_store();
        let (sink, _events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        binder.attach(inputs_for("c1")).expect("attaches");

        // No "category" input at all: the factory's require() fails.
        let err = binder.update_inputs(EntityInputs::new()).unwrap_err();
        assert_matches!(err, BindError::MissingInput(_));
        assert_eq!(binder.state(), BinderState::TornDown);
        assert_eq!(store.observer_count(), 0);
        assert_matches!(binder.attach(inputs_for("c1")), Err(BindError::TornDown));
    }

    #[tokio::test]
    async fn test_detach_is_terminal_and_silences_deliveries() {
        let store = seeded_store();
        let (sink, events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        binder.attach(inputs_for("c1")).expect("attaches");

        binder.detach();
        assert_eq!(binder.state(), BinderState::TornDown);
        assert_eq!(binder.subscription_count(), 0);
        assert_eq!(store.observer_count(), 0);
        binder.detach(); // idempotent

        store
            .write(|tx| {
                tx.update("channel", "ch1", fields(&[("display_name", "after".into())]))
            })
            .expect("commits");
        settle().await;
        assert_eq!(events.lock().len(), 1, "initial props only");
        assert_matches!(binder.update_inputs(inputs_for("c2")), Err(BindError::TornDown));
    }

    #[tokio::test]
    async fn test_drop_releases_subscriptions() {
        let store = seeded_store();
        let (sink, _events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        binder.attach(inputs_for("c1")).expect("attaches");
        assert_eq!(store.observer_count(), 1);
        drop(binder);
        assert_eq!(store.observer_count(), 0);
    }

    #[tokio::test]
    async fn test_pass_through_values_merge_and_are_shadowed() {
        let store = seeded_store();
        let (sink, events) = recording_sink();
        let spec_store = store.clone();
        let mut binder = Binder::new(
            store.clone(),
            move |inputs: &EntityInputs| {
                let category = inputs.require("category")?;
                let channels = spec_store.resolve_relation(category, "channels")?;
                Ok(BindingSpec::new().with(
                    "channels",
                    QuerySpec::observe_relation(channels, ColumnSet::new(["display_name"])?),
                ))
            },
            sink,
        )
        .with_pass_through("is_admin", Value::from(true))
        .with_pass_through("channels", Value::from("shadowed"));

        binder.attach(inputs_for("c1")).expect("attaches");
        let recorded = events.lock().clone();
        let props = assert_matches!(&recorded[0], PropsEvent::Props(p) => p.clone());
        assert_eq!(
            props.get("is_admin"),
            Some(&PropValue::Given(Value::from(true)))
        );
        // The bound binding wins over the same-named given value.
        assert_matches!(props.get("channels"), Some(PropValue::Bound(_)));
    }

    #[tokio::test]
    async fn test_unavailable_forwards_and_quiesces() {
        let store = seeded_store();
        let (sink, events) = recording_sink();
        let mut binder = category_binder(&store, sink);
        binder.attach(inputs_for("c1")).expect("attaches");

        store.write(|tx| tx.delete("category", "c1")).expect("commits");
        settle().await;

        let recorded = events.lock().clone();
        assert_matches!(
            recorded.last(),
            Some(PropsEvent::Unavailable { binding }) if binding == "channels"
        );
        assert_eq!(store.observer_count(), 0);
        binder.detach();
    }
}
