//! # Prism Bind - Reactive View Binder
//!
//! Connects view components to a local record store through live,
//! column-scoped queries. A component declares the bindings it needs
//! (entities, relations, and the columns it cares about); the binder keeps
//! those bindings subscribed across the component's lifecycle and delivers
//! a single consistent snapshot of all bound values on every relevant
//! change.
//!
//! ## Layers
//!
//! - [`query`]: one live query over a record or relation, reacting only to
//!   a fixed set of watched columns. Writes to unwatched columns are
//!   invisible.
//! - [`mux`]: the subscription multiplexer. Composes many queries into one
//!   snapshot stream, coalescing emissions that arrive within the same
//!   change-propagation turn into exactly one atomic delivery.
//! - [`binder`]: the lifecycle adapter. Attaches snapshot deliveries to a
//!   consumer's effective input props, resubscribes when entity identity
//!   changes, and tears everything down deterministically on detach.
//!
//! ## Concurrency Model
//!
//! Single cooperative event loop: store reads are synchronous, change
//! notifications and snapshot deliveries are serialized as discrete events
//! on the loop (a Tokio task per multiplexer). Nothing here blocks, and
//! nothing here writes to the store.
//!
//! ## Example
//!
//! ```rust,ignore
//! use prism_bind::{Binder, BindingSpec, QuerySpec};
//! use prism_core::{ColumnSet, EntityRef};
//!
//! let binder = Binder::new(store.clone(), |inputs| {
//!     let category = inputs.require("category")?;
//!     let channels = store.resolve_relation(category, "channels")?;
//!     let links = store.resolve_relation(category, "categoryChannels")?;
//!     Ok(BindingSpec::new()
//!         .with("category", QuerySpec::pass_through(category.clone()))
//!         .with(
//!             "categoryChannels",
//!             QuerySpec::observe_relation(links, ColumnSet::new(["sort_order"])?),
//!         )
//!         .with(
//!             "channels",
//!             QuerySpec::observe_relation(channels, ColumnSet::new(["display_name"])?),
//!         ))
//! }, sink);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Binder lifecycle adapter: props, sinks, attach/rebind/detach
pub mod binder;
/// Subscription multiplexer: composite snapshot delivery
pub mod mux;
/// Column-scoped live queries
pub mod query;

pub use binder::{Binder, BinderState, EntityInputs, PropValue, Props, PropsEvent, PropsSink};
pub use mux::{combine, BindingSpec, Multiplexer, MuxConfig, QuerySpec, SnapshotEvent, SnapshotSink};
pub use query::{observe, ColumnQuery, LiveQuery, QueryEvent, QueryTarget};
