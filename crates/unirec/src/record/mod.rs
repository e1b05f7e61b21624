//! The observable-record collaborator: an attribute bag with synchronous
//! change events, identity accessors, and schema-declared nested records.
//!
//! Change propagation is fully synchronous: listeners run inside the `set`
//! call that triggered them, after the record's own lock has been released.
//! Re-applying values that produce no diff emits nothing, which is what the
//! unique layer's convergence relies on.

mod events;

pub use self::events::{ChangeEvent, ListenerId};
pub(crate) use self::events::{Callback, Listener, Topic};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use itertools::Itertools;

use crate::error::AttributeError;
use crate::schema::{ChildSpec, ExtraProperties, Schema};
use crate::value::{AttrMap, Id, Value};

/// Options accepted by `set_one` / `set_many`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SetOptions {
    /// Suppress all event emission for this mutation. The attribute diff is
    /// still applied, so callers interposing identity tracking must diff the
    /// identity triple themselves.
    pub silent: bool,
}

/// Snapshot filter for [`Record::attributes`]. Derived attributes and
/// declared children/collections are never included regardless of flags.
#[derive(Clone, Copy, Debug)]
pub struct AttributeFilter {
    pub props: bool,
    pub session: bool,
}

impl AttributeFilter {
    /// Persisted and session attributes: the snapshot synchronized between
    /// shared holders of one identity.
    pub fn props_and_session() -> Self {
        AttributeFilter { props: true,
                          session: true }
    }
}

struct RecordInner {
    schema: Arc<Schema>,
    attributes: AttrMap,
    children: HashMap<String, Record>,
    collections: HashMap<String, Vec<Record>>,
    listeners: Vec<Listener>,
    next_listener: ListenerId,
    destroyed: bool,
}

/// A mutable, observable attribute bag. `Record` is a cheap cloneable handle;
/// all clones share one instance.
#[derive(Clone)]
pub struct Record {
    inner: Arc<Mutex<RecordInner>>,
}

pub struct WeakRecord {
    inner: Weak<Mutex<RecordInner>>,
}

impl Record {
    pub fn new(schema: &Arc<Schema>, mut attrs: AttrMap) -> Result<Record, AttributeError> {
        let mut children = HashMap::new();
        let mut collections = HashMap::new();

        for (name, spec) in &schema.children {
            let initial = attrs.remove(name);
            match spec {
                ChildSpec::One { schema: child_schema, .. } => {
                    let bag = match initial {
                        Some(Value::Map(bag)) => bag,
                        Some(Value::Null) | None => AttrMap::new(),
                        Some(_) => return Err(AttributeError::InvalidChild(name.clone())),
                    };
                    children.insert(name.clone(), Record::new(child_schema, bag)?);
                },
                ChildSpec::Many { schema: item_schema } => {
                    let items = match initial {
                        Some(Value::List(items)) => items,
                        Some(Value::Null) | None => Vec::new(),
                        Some(_) => return Err(AttributeError::InvalidChild(name.clone())),
                    };
                    collections.insert(name.clone(), build_members(item_schema, name, items)?);
                },
            }
        }

        let mut stored = AttrMap::new();
        for (key, value) in attrs {
            match schema.extra_properties {
                _ if schema.accepts(&key) => {
                    stored.insert(key, value);
                },
                ExtraProperties::Ignore => {},
                _ => return Err(AttributeError::UnknownAttribute(key)),
            }
        }

        let inner = RecordInner { schema: schema.clone(),
                                  attributes: stored,
                                  children,
                                  collections,
                                  listeners: Vec::new(),
                                  next_listener: 0,
                                  destroyed: false };

        Ok(Record { inner: Arc::new(Mutex::new(inner)) })
    }

    pub fn schema(&self) -> Arc<Schema> {
        self.inner.lock().unwrap().schema.clone()
    }

    /// Current value of a plain attribute. `None` for missing keys, stored
    /// nulls, and declared child/collection names.
    pub fn get(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock().unwrap();
        match inner.attributes.get(key) {
            Some(Value::Null) | None => None,
            Some(v) => Some(v.clone()),
        }
    }

    pub fn set_one(&self, key: &str, value: Value, options: SetOptions) -> Result<(), AttributeError> {
        let mut attrs = AttrMap::new();
        attrs.insert(key.to_string(), value);
        self.set_many(attrs, options)
    }

    /// Apply a batch of attribute updates. Only explicitly present keys are
    /// touched; equal values produce no change event. A `Map` value for a
    /// declared child merges into the existing child record, a `List` for a
    /// declared collection replaces its members.
    pub fn set_many(&self, attrs: AttrMap, options: SetOptions) -> Result<(), AttributeError> {
        let mut scalars = AttrMap::new();
        let mut child_merges: Vec<(Record, AttrMap)> = Vec::new();
        let mut collection_resets: Vec<(String, Arc<Schema>, Vec<Value>)> = Vec::new();

        {
            let inner = self.inner.lock().unwrap();
            for (key, value) in attrs {
                match inner.schema.children.get(&key) {
                    Some(ChildSpec::One { .. }) => match value {
                        Value::Map(bag) => {
                            // materialized at construction, so always present
                            let child = inner.children[&key].clone();
                            child_merges.push((child, bag));
                        },
                        Value::Null => {},
                        _ => return Err(AttributeError::InvalidChild(key)),
                    },
                    Some(ChildSpec::Many { schema }) => match value {
                        Value::List(items) => collection_resets.push((key, schema.clone(), items)),
                        Value::Null => {},
                        _ => return Err(AttributeError::InvalidChild(key)),
                    },
                    None => {
                        if inner.schema.accepts(&key) {
                            scalars.insert(key, value);
                        } else if inner.schema.extra_properties == ExtraProperties::Reject {
                            return Err(AttributeError::UnknownAttribute(key));
                        }
                    },
                }
            }
        }

        // Nested records first, so a failure there leaves the scalar
        // attributes untouched. No parent change events result from these.
        for (child, bag) in child_merges {
            child.set_many(bag, options)?;
        }
        for (name, item_schema, items) in collection_resets {
            let members = build_members(&item_schema, &name, items)?;
            self.inner.lock().unwrap().collections.insert(name, members);
        }

        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let mut changed = Vec::new();
            for (key, value) in scalars {
                if inner.attributes.get(&key) != Some(&value) {
                    let was_unset = matches!(inner.attributes.get(&key), Some(Value::Null) | None);
                    if !(was_unset && value.is_null()) {
                        changed.push(key.clone());
                    }
                    inner.attributes.insert(key, value);
                }
            }
            changed
        };

        if !changed.is_empty() && !options.silent {
            self.dispatch_change(changed);
        }
        Ok(())
    }

    /// Replace every set attribute with null, emitting change events. This is
    /// how deletion reaches shared holders: nulls ride the snapshot, absent
    /// keys would not.
    pub fn clear(&self) {
        let changed = {
            let mut inner = self.inner.lock().unwrap();
            let keys: Vec<String> = inner.attributes
                                         .iter()
                                         .filter(|(_, v)| !v.is_null())
                                         .map(|(k, _)| k.clone())
                                         .sorted()
                                         .collect();
            for key in &keys {
                inner.attributes.insert(key.clone(), Value::Null);
            }
            keys
        };

        if !changed.is_empty() {
            self.dispatch_change(changed);
        }
    }

    /// Fire the `destroy` event once. Further calls are no-ops. Change
    /// listeners other holders attached to this record are left in place;
    /// they detach themselves on their own teardown. The attribute bag
    /// itself stays readable and mutable, which deletion propagation
    /// (`clear` after destroy) relies on.
    pub fn destroy(&self) {
        let fired = {
            let mut inner = self.inner.lock().unwrap();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            let (fired, keep): (Vec<_>, Vec<_>) = inner.listeners
                                                       .drain(..)
                                                       .partition(|l| l.topic == Topic::Destroy);
            inner.listeners = keep;
            fired
        };

        let event = ChangeEvent { changed: Vec::new() };
        for listener in &fired {
            (listener.callback)(self, &event);
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().unwrap().destroyed
    }

    // identity accessors

    pub fn get_id(&self) -> Option<Id> {
        let inner = self.inner.lock().unwrap();
        let attr = inner.schema.id_attribute.clone();
        inner.attributes.get(&attr).and_then(Value::as_id)
    }

    /// The type attribute when set, falling back to the schema-level type.
    pub fn get_type(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let attr = inner.schema.type_attribute.clone();
        if let Some(t) = inner.attributes.get(&attr).and_then(Value::as_text) {
            return Some(t.to_string());
        }
        if inner.schema.record_type.is_empty() {
            None
        } else {
            Some(inner.schema.record_type.clone())
        }
    }

    pub fn get_namespace(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        let attr = inner.schema.namespace_attribute.clone();
        inner.attributes
             .get(&attr)
             .and_then(Value::as_text)
             .map(|s| s.to_string())
    }

    /// Snapshot of persisted and/or session attributes. Stored nulls are
    /// included; derived attributes and nested records never are.
    pub fn attributes(&self, filter: AttributeFilter) -> AttrMap {
        let inner = self.inner.lock().unwrap();
        inner.attributes
             .iter()
             .filter(|(key, _)| {
                 if inner.schema.derived.contains(*key) {
                     return false;
                 }
                 if inner.schema.session.contains(*key) {
                     filter.session
                 } else {
                     filter.props
                 }
             })
             .map(|(k, v)| (k.clone(), v.clone()))
             .collect()
    }

    pub fn child(&self, name: &str) -> Option<Record> {
        self.inner.lock().unwrap().children.get(name).cloned()
    }

    pub fn collection(&self, name: &str) -> Option<Vec<Record>> {
        self.inner.lock().unwrap().collections.get(name).cloned()
    }

    // subscriptions

    pub fn on_change<F>(&self, callback: F) -> ListenerId
        where F: Fn(&Record, &ChangeEvent) + Send + Sync + 'static
    {
        self.subscribe(Topic::Change, Arc::new(callback))
    }

    pub fn on_change_key<F>(&self, key: &str, callback: F) -> ListenerId
        where F: Fn(&Record, &ChangeEvent) + Send + Sync + 'static
    {
        self.subscribe(Topic::ChangeKey(key.to_string()), Arc::new(callback))
    }

    pub fn on_destroy<F>(&self, callback: F) -> ListenerId
        where F: Fn(&Record, &ChangeEvent) + Send + Sync + 'static
    {
        self.subscribe(Topic::Destroy, Arc::new(callback))
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|l| l.id != id);
    }

    fn subscribe(&self, topic: Topic, callback: Callback) -> ListenerId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.push(Listener { id, topic, callback });
        id
    }

    /// Invoke listeners for a completed mutation: per-key topics first, in
    /// subscription order, then the aggregate `change` topic. Dispatch runs
    /// on a snapshot of the listener list with the inner lock released, so
    /// listeners may freely subscribe, unsubscribe, and mutate records.
    fn dispatch_change(&self, changed: Vec<String>) {
        let listeners: Vec<Listener> = self.inner.lock().unwrap().listeners.clone();

        for key in changed.iter().unique() {
            let event = ChangeEvent { changed: vec![key.clone()] };
            for listener in &listeners {
                if listener.topic == Topic::ChangeKey(key.clone()) {
                    (listener.callback)(self, &event);
                }
            }
        }

        let event = ChangeEvent { changed };
        for listener in &listeners {
            if listener.topic == Topic::Change {
                (listener.callback)(self, &event);
            }
        }
    }

    /// Instance identity: true when both handles refer to one record.
    pub fn ptr_eq(a: &Record, b: &Record) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    pub fn weak(&self) -> WeakRecord {
        WeakRecord { inner: Arc::downgrade(&self.inner) }
    }
}

fn build_members(schema: &Arc<Schema>, name: &str, items: Vec<Value>) -> Result<Vec<Record>, AttributeError> {
    let mut members = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Map(bag) => members.push(Record::new(schema, bag)?),
            _ => return Err(AttributeError::InvalidChild(name.to_string())),
        }
    }
    Ok(members)
}

impl WeakRecord {
    pub fn upgrade(&self) -> Option<Record> {
        self.inner.upgrade().map(|inner| Record { inner })
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        fmt.debug_struct("Record")
           .field("type", &inner.schema.record_type)
           .field("attributes", &inner.attributes)
           .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schema::Schema;

    fn schema() -> Arc<Schema> {
        Arc::new(Schema::new("TestType"))
    }

    #[test]
    fn set_and_get() {
        let rec = Record::new(&schema(), AttrMap::new()).unwrap();
        rec.set_one("name", "Alex P.".into(), SetOptions::default()).unwrap();
        assert_eq!(rec.get("name"), Some(Value::from("Alex P.")));
        assert_eq!(rec.get("missing"), None);
    }

    #[test]
    fn equal_values_emit_nothing() {
        let rec = Record::new(&schema(), AttrMap::new()).unwrap();
        let fired = Arc::new(Mutex::new(0u32));

        let fired2 = fired.clone();
        rec.on_change(move |_, _| *fired2.lock().unwrap() += 1);

        rec.set_one("name", "Alex P.".into(), SetOptions::default()).unwrap();
        rec.set_one("name", "Alex P.".into(), SetOptions::default()).unwrap();
        assert_eq!(*fired.lock().unwrap(), 1, "identical re-set must not fire");
    }

    #[test]
    fn per_key_topics_fire_before_aggregate() {
        let rec = Record::new(&schema(), AttrMap::new()).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        rec.on_change_key("id", move |_, _| o.lock().unwrap().push("key"));
        let o = order.clone();
        rec.on_change(move |_, _| o.lock().unwrap().push("aggregate"));

        rec.set_one("id", 123i64.into(), SetOptions::default()).unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["key", "aggregate"]);
    }

    #[test]
    fn silent_set_applies_without_events() {
        let rec = Record::new(&schema(), AttrMap::new()).unwrap();
        let fired = Arc::new(Mutex::new(0u32));

        let fired2 = fired.clone();
        rec.on_change(move |_, _| *fired2.lock().unwrap() += 1);

        rec.set_one("id", 123i64.into(), SetOptions { silent: true }).unwrap();
        assert_eq!(*fired.lock().unwrap(), 0);
        assert_eq!(rec.get_id(), Some(Id::Int(123)));
    }

    #[test]
    fn reject_unknown_attributes() {
        let schema = Arc::new(Schema::new("TestType").with_props(&["name"])
                                                     .with_extra_properties(ExtraProperties::Reject));
        let rec = Record::new(&schema, AttrMap::new()).unwrap();

        assert_eq!(rec.set_one("name", "ok".into(), SetOptions::default()), Ok(()));
        assert_eq!(rec.set_one("bogus", "nope".into(), SetOptions::default()),
                   Err(AttributeError::UnknownAttribute("bogus".to_string())));
    }

    #[test]
    fn clear_nulls_everything_and_fires() {
        let mut attrs = AttrMap::new();
        attrs.insert("id".to_string(), 123i64.into());
        attrs.insert("name".to_string(), "Alex P.".into());
        let rec = Record::new(&schema(), attrs).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        rec.on_change(move |_, ev| s.lock().unwrap().extend(ev.changed.clone()));

        rec.clear();
        assert_eq!(rec.get("name"), None);
        assert_eq!(rec.get_id(), None);
        assert_eq!(*seen.lock().unwrap(), vec!["id", "name"]);

        // cleared keys still ride the snapshot as nulls
        let snapshot = rec.attributes(AttributeFilter::props_and_session());
        assert_eq!(snapshot.get("name"), Some(&Value::Null));
    }

    #[test]
    fn destroy_fires_once() {
        let rec = Record::new(&schema(), AttrMap::new()).unwrap();
        let fired = Arc::new(Mutex::new(0u32));

        let fired2 = fired.clone();
        rec.on_destroy(move |_, _| *fired2.lock().unwrap() += 1);

        rec.destroy();
        rec.destroy();
        assert_eq!(*fired.lock().unwrap(), 1);
        assert!(rec.is_destroyed());
    }

    #[test]
    fn snapshot_filters_session_and_derived() {
        let schema = Arc::new(Schema::new("TestType").with_session(&["token"]).with_derived(&["initials"]));
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), "Alex P.".into());
        attrs.insert("token".to_string(), "t-1".into());
        attrs.insert("initials".to_string(), "AP".into());
        let rec = Record::new(&schema, attrs).unwrap();

        let both = rec.attributes(AttributeFilter::props_and_session());
        assert!(both.contains_key("name"));
        assert!(both.contains_key("token"));
        assert!(!both.contains_key("initials"), "derived attributes never snapshot");

        let props_only = rec.attributes(AttributeFilter { props: true,
                                                          session: false });
        assert!(!props_only.contains_key("token"));
    }

    #[test]
    fn ignore_drops_unknown_attributes() {
        let schema = Arc::new(Schema::new("TestType").with_props(&["name"])
                                                     .with_extra_properties(ExtraProperties::Ignore));
        let mut attrs = AttrMap::new();
        attrs.insert("name".to_string(), "Alex P.".into());
        attrs.insert("bogus".to_string(), "nope".into());
        let rec = Record::new(&schema, attrs).unwrap();

        assert_eq!(rec.get("name"), Some(Value::from("Alex P.")));
        assert_eq!(rec.get("bogus"), None, "undeclared attribute silently dropped at construction");

        rec.set_one("bogus", "still nope".into(), SetOptions::default()).unwrap();
        assert_eq!(rec.get("bogus"), None, "undeclared attribute silently dropped by set");
        let snapshot = rec.attributes(AttributeFilter::props_and_session());
        assert!(!snapshot.contains_key("bogus"));
    }

    #[test]
    fn set_resets_collection_members() {
        let tag = schema();
        let group = Arc::new(Schema::new("GroupType").with_collection("tags", &tag));

        let mut item = AttrMap::new();
        item.insert("label".to_string(), "admin".into());
        let mut attrs = AttrMap::new();
        attrs.insert("tags".to_string(), Value::List(vec![Value::Map(item)]));
        let rec = Record::new(&group, attrs).unwrap();
        assert_eq!(rec.collection("tags").unwrap().len(), 1);

        let mut first = AttrMap::new();
        first.insert("label".to_string(), "staff".into());
        let mut second = AttrMap::new();
        second.insert("label".to_string(), "guest".into());
        rec.set_one("tags",
                    Value::List(vec![Value::Map(first), Value::Map(second)]),
                    SetOptions::default())
           .unwrap();

        let members = rec.collection("tags").unwrap();
        assert_eq!(members.len(), 2, "a list value replaces the members wholesale");
        assert_eq!(members[0].get("label"), Some(Value::from("staff")));
        assert_eq!(members[1].get("label"), Some(Value::from("guest")));

        // a non-list value is refused, a null leaves the members alone
        assert_eq!(rec.set_one("tags", "oops".into(), SetOptions::default()),
                   Err(AttributeError::InvalidChild("tags".to_string())));
        rec.set_one("tags", Value::Null, SetOptions::default()).unwrap();
        assert_eq!(rec.collection("tags").unwrap().len(), 2);
    }

    #[test]
    fn declared_children_are_materialized_and_excluded() {
        let person = schema();
        let group = Arc::new(Schema::new("GroupType").with_child("person", &person, false));

        let mut attrs = AttrMap::new();
        attrs.insert("id".to_string(), 456i64.into());
        let rec = Record::new(&group, attrs).unwrap();

        let child = rec.child("person").expect("child materialized even when absent from the bag");
        assert_eq!(child.get_id(), None);

        let mut merge = AttrMap::new();
        merge.insert("id".to_string(), 123i64.into());
        rec.set_one("person", Value::Map(merge), SetOptions::default()).unwrap();
        assert_eq!(child.get_id(), Some(Id::Int(123)), "set merges into the existing child");

        let snapshot = rec.attributes(AttributeFilter::props_and_session());
        assert!(!snapshot.contains_key("person"), "children never snapshot");
    }
}
