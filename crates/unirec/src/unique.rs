//! The unique-record binding protocol: every instance resolves its canonical
//! counterpart through the registry on construction and on every
//! identity-relevant change, then keeps the two synchronized through change
//! listeners in both directions.
//!
//! The registry stores the first instance registered for a key and reuses it
//! as the canonical source directly, so the registrant's "source" is its own
//! record. Synchronization pushes full props+session snapshots rather than
//! diffs; convergence is the fixed point where re-applying an identical
//! snapshot emits no further change events. A per-binding `syncing` flag
//! keeps the notification machinery from taking redundant re-entrant hops.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::error::AttributeError;
use crate::record::{AttributeFilter, ListenerId, Record, SetOptions, WeakRecord};
use crate::registry::{Registry, RegistryKey, WeakRegistry};
use crate::schema::{ChildSpec, Schema};
use crate::value::{AttrMap, Id, Value};

struct Binding {
    local: WeakRecord,
    registry: WeakRegistry,
    /// The currently bound canonical record; `None` while the identity key
    /// is incomplete or unresolved.
    source: Option<Record>,
    source_subs: Vec<ListenerId>,
    local_subs: Vec<ListenerId>,
    /// Keys this instance inserted as the canonical entry. The registrant is
    /// responsible for removing them again.
    registered: Vec<RegistryKey>,
    /// Re-entrancy guard: set while a push or pull is applying a snapshot.
    syncing: bool,
    children: HashMap<String, UniqueRecord>,
}

/// A local instance of an identifiable record, deduplicated against every
/// other instance sharing its `(type, id, namespace)` through a [`Registry`].
/// Constructing one behaves exactly like constructing a plain [`Record`];
/// the binding protocol runs behind the same surface.
#[derive(Clone)]
pub struct UniqueRecord {
    record: Record,
    binding: Arc<Mutex<Binding>>,
    registry: Registry,
}

impl UniqueRecord {
    pub fn new(schema: &Arc<Schema>, attrs: AttrMap, registry: &Registry) -> Result<UniqueRecord, AttributeError> {
        let record = Record::new(schema, attrs)?;
        Ok(Self::attach(record, registry))
    }

    /// Wrap an existing record. Attach order matters and mirrors the record
    /// lifecycle: identity listeners first, then the initial bind (with its
    /// pull), then the local-change push (run once so an already-registered
    /// canonical inherits attributes this instance carries), then teardown
    /// wiring, then schema-declared unique children.
    pub fn attach(record: Record, registry: &Registry) -> UniqueRecord {
        let binding = Arc::new(Mutex::new(Binding { local: record.weak(),
                                                    registry: registry.weak(),
                                                    source: None,
                                                    source_subs: Vec::new(),
                                                    local_subs: Vec::new(),
                                                    registered: Vec::new(),
                                                    syncing: false,
                                                    children: HashMap::new() }));

        let schema = record.schema();
        let mut local_subs = Vec::new();

        for attr in [&schema.id_attribute, &schema.type_attribute, &schema.namespace_attribute] {
            let weak = Arc::downgrade(&binding);
            local_subs.push(record.on_change_key(attr, move |rec, _| {
                          if let Some(binding) = weak.upgrade() {
                              rebind(rec, &binding);
                          }
                      }));
        }

        rebind(&record, &binding);

        let weak = Arc::downgrade(&binding);
        local_subs.push(record.on_change(move |rec, _| {
                      if let Some(binding) = weak.upgrade() {
                          push_local_to_source(rec, &binding);
                      }
                  }));
        push_local_to_source(&record, &binding);

        let weak = Arc::downgrade(&binding);
        local_subs.push(record.on_destroy(move |rec, _| {
                      if let Some(binding) = weak.upgrade() {
                          teardown(rec, &binding);
                      }
                  }));

        binding.lock().unwrap().local_subs = local_subs;

        let mut children = HashMap::new();
        for (name, spec) in &schema.children {
            if let ChildSpec::One { unique: true, .. } = spec {
                if let Some(child) = record.child(name) {
                    children.insert(name.clone(), UniqueRecord::attach(child, registry));
                }
            }
        }
        binding.lock().unwrap().children = children;

        UniqueRecord { record,
                       binding,
                       registry: registry.clone() }
    }

    /// The underlying observable record.
    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The currently bound canonical record, if any.
    pub fn source(&self) -> Option<Record> {
        self.binding.lock().unwrap().source.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.binding.lock().unwrap().source.is_some()
    }

    /// A schema-declared unique child, wrapped at attach time.
    pub fn child(&self, name: &str) -> Option<UniqueRecord> {
        self.binding.lock().unwrap().children.get(name).cloned()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.record.get(key)
    }

    pub fn get_id(&self) -> Option<Id> {
        self.record.get_id()
    }

    pub fn get_type(&self) -> Option<String> {
        self.record.get_type()
    }

    pub fn get_namespace(&self) -> Option<String> {
        self.record.get_namespace()
    }

    pub fn attributes(&self, filter: AttributeFilter) -> AttrMap {
        self.record.attributes(filter)
    }

    pub fn set_one(&self, key: &str, value: Value, options: SetOptions) -> Result<(), AttributeError> {
        let mut attrs = AttrMap::new();
        attrs.insert(key.to_string(), value);
        self.set_many(attrs, options)
    }

    /// Forwarded `set`. A silent set suppresses the change-event machinery,
    /// so identity tracking cannot rely on listeners: the identity triple is
    /// snapshotted before the set and diffed afterwards, and the rebind run
    /// here when it changed.
    pub fn set_many(&self, attrs: AttrMap, options: SetOptions) -> Result<(), AttributeError> {
        if !options.silent {
            return self.record.set_many(attrs, options);
        }

        let before = identity_triple(&self.record);
        self.record.set_many(attrs, options)?;
        if identity_triple(&self.record) != before {
            rebind(&self.record, &self.binding);
        }
        Ok(())
    }

    /// Explicit teardown: forwards to the record's `destroy`, which triggers
    /// detachment and, for the registrant, registry removal plus clearing of
    /// the canonical record.
    pub fn destroy(&self) {
        self.record.destroy();
    }
}

fn identity_triple(record: &Record) -> (Option<Id>, Option<String>, Option<String>) {
    (record.get_id(), record.get_type(), record.get_namespace())
}

/// Detach from the current canonical record, resolve the key the record now
/// carries, and bind to whatever it yields. Registrations that no longer
/// match the record's identity are withdrawn, so clearing an id genuinely
/// unregisters the canonical entry.
fn rebind(record: &Record, binding: &Arc<Mutex<Binding>>) {
    let (old_source, old_subs) = {
        let mut b = binding.lock().unwrap();
        (b.source.take(), std::mem::take(&mut b.source_subs))
    };
    if let Some(old) = old_source {
        for id in old_subs {
            old.unsubscribe(id);
        }
    }

    let registry = match binding.lock().unwrap().registry.upgrade() {
        Some(registry) => registry,
        None => return,
    };

    let current = RegistryKey::for_record(record);
    let stale: Vec<RegistryKey> = {
        let mut b = binding.lock().unwrap();
        let (stale, keep) = b.registered
                             .drain(..)
                             .partition(|key| Some(key) != current.as_ref());
        b.registered = keep;
        stale
    };
    for key in stale {
        registry.unregister(&key, record);
    }

    if let Some(key) = registry.store(record) {
        debug!("UniqueRecord registered canonical entry {:?}", key);
        binding.lock().unwrap().registered.push(key);
    }

    let source = registry.lookup_record(record);
    debug!("UniqueRecord rebind: {}", if source.is_some() { "bound" } else { "unbound" });

    if let Some(ref source) = source {
        let weak = Arc::downgrade(binding);
        let local = record.weak();
        let sub = source.on_change(move |_, _| {
                            if let (Some(binding), Some(local)) = (weak.upgrade(), local.upgrade()) {
                                pull_source_to_local(&local, &binding);
                            }
                        });
        let mut b = binding.lock().unwrap();
        b.source = Some(source.clone());
        b.source_subs.push(sub);
    }

    // run the pull once at bind time so late joiners inherit existing
    // attributes
    pull_source_to_local(record, binding);
}

/// Local -> canonical: overwrite the canonical record with this instance's
/// full props+session snapshot. Unspecified attributes are left untouched by
/// `set` semantics, so the canonical grows toward the union of its holders.
fn push_local_to_source(record: &Record, binding: &Arc<Mutex<Binding>>) {
    let source = match begin_sync(record, binding) {
        Some(source) => source,
        None => return,
    };

    let snapshot = record.attributes(AttributeFilter::props_and_session());
    if let Err(e) = source.set_many(snapshot, SetOptions::default()) {
        // only reachable when two holders of one identity disagree on schema
        warn!("push to canonical record dropped: {}", e);
    }
    binding.lock().unwrap().syncing = false;
}

/// Canonical -> local: the symmetric overwrite.
fn pull_source_to_local(record: &Record, binding: &Arc<Mutex<Binding>>) {
    let source = match begin_sync(record, binding) {
        Some(source) => source,
        None => return,
    };

    let snapshot = source.attributes(AttributeFilter::props_and_session());
    if let Err(e) = record.set_many(snapshot, SetOptions::default()) {
        warn!("pull from canonical record dropped: {}", e);
    }
    binding.lock().unwrap().syncing = false;
}

/// Common guard for both sync directions: no-op while unbound, while another
/// hop is already applying a snapshot, and for the registrant (whose source
/// is its own record).
fn begin_sync(record: &Record, binding: &Arc<Mutex<Binding>>) -> Option<Record> {
    let mut b = binding.lock().unwrap();
    if b.syncing {
        return None;
    }
    let source = match &b.source {
        Some(source) if !Record::ptr_eq(source, record) => source.clone(),
        _ => return None,
    };
    b.syncing = true;
    Some(source)
}

/// Destroy-time teardown. Every instance detaches its listeners; the
/// registrant additionally removes its canonical entries and clears the
/// canonical record, which propagates an all-null snapshot to every peer
/// still bound to it.
fn teardown(record: &Record, binding: &Arc<Mutex<Binding>>) {
    let (source, source_subs, local_subs, registered, registry) = {
        let mut b = binding.lock().unwrap();
        (b.source.take(),
         std::mem::take(&mut b.source_subs),
         std::mem::take(&mut b.local_subs),
         std::mem::take(&mut b.registered),
         b.registry.upgrade())
    };

    if let Some(source) = source {
        for id in source_subs {
            source.unsubscribe(id);
        }
    }
    for id in local_subs {
        record.unsubscribe(id);
    }

    let registry = match registry {
        Some(registry) => registry,
        None => return,
    };

    let mut was_registrant = false;
    for key in registered {
        if registry.unregister(&key, record) {
            was_registrant = true;
        }
    }
    if was_registrant {
        debug!("UniqueRecord destroy: clearing canonical record");
        record.clear();
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        // last handle gone: detach, leaving any registered canonical entry
        // in place for other holders
        if let Some(source) = self.source.take() {
            for id in self.source_subs.drain(..) {
                source.unsubscribe(id);
            }
        }
        if let Some(local) = self.local.upgrade() {
            for id in self.local_subs.drain(..) {
                local.unsubscribe(id);
            }
        }
    }
}

impl fmt::Debug for UniqueRecord {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let b = self.binding.lock().unwrap();
        fmt.debug_struct("UniqueRecord")
           .field("record", &self.record)
           .field("bound", &b.source.is_some())
           .field("registered", &b.registered)
           .finish()
    }
}
