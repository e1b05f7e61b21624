//! **unirec** is a deduplicating identity registry for mutable, identifiable
//! records. Any number of independently created instances that refer to the
//! same logical entity (same type + id + namespace) converge on one canonical
//! shared record and stay synchronized with it, without callers ever looking
//! up or sharing instances themselves.
//!
//! - [`Registry`](./registry/struct.Registry.html) Process-scoped keyed store
//!   mapping an identity triple to its one canonical record
//!
//! - [`Record`](./record/struct.Record.html) The observable attribute bag:
//!   get/set with synchronous change events, identity accessors, nested
//!   children
//!
//! - [`UniqueRecord`](./unique/struct.UniqueRecord.html) A record wrapper
//!   that resolves and binds its canonical counterpart through the registry
//!   and keeps both sides synchronized through change listeners
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//! use unirec::{Record, Registry, Schema, SetOptions, UniqueRecord, Value};
//!
//! let registry = Registry::new(); // one per process, handed to every instance
//! let person = Arc::new(Schema::new("Person"));
//!
//! // One part of the app fetches person 123
//! let mut attrs = HashMap::new();
//! attrs.insert("id".to_string(), Value::Int(123));
//! let a = UniqueRecord::new(&person, attrs, &registry).expect("record creation didn't fail");
//!
//! // Another, unrelated part fetches the same person with more detail
//! let mut attrs = HashMap::new();
//! attrs.insert("id".to_string(), Value::Int(123));
//! attrs.insert("name".to_string(), Value::Text("Alex P.".to_string()));
//! let b = UniqueRecord::new(&person, attrs, &registry).expect("record creation didn't fail");
//!
//! // Both resolved the same canonical record, and the first instance already
//! // inherited the extra attribute
//! assert!(Record::ptr_eq(&a.source().unwrap(), &b.source().unwrap()));
//! assert_eq!(a.get("name"), Some(Value::Text("Alex P.".to_string())));
//!
//! // Changes flow both ways with no explicit calls on the other side
//! a.set_one("name", Value::Text("Jordan".to_string()), SetOptions::default()).unwrap();
//! assert_eq!(b.get("name"), Some(Value::Text("Jordan".to_string())));
//! ```

pub mod error;
pub mod record;
pub mod registry;
pub mod schema;
pub mod unique;
pub mod value;

pub use crate::{
    error::AttributeError,
    record::{AttributeFilter, ChangeEvent, ListenerId, Record, SetOptions, WeakRecord},
    registry::{Registry, RegistryKey, WeakRegistry},
    schema::{ChildSpec, ExtraProperties, Schema},
    unique::UniqueRecord,
    value::{AttrMap, Id, Value},
};
