use std::collections::HashMap;
use std::sync::Arc;

use unirec::{Record, Registry, Schema, SetOptions, UniqueRecord, Value};

fn person_schema() -> Arc<Schema> {
    Arc::new(Schema::new("TestType"))
}

fn attrs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn map(pairs: &[(&str, Value)]) -> Value {
    Value::Map(attrs(pairs))
}

#[test]
fn unique_children_share_their_own_canonical() {
    unirec_test_util::init_test_logger();

    let registry = Registry::new();
    let person = person_schema();
    let group = Arc::new(Schema::new("GroupType").with_child("person", &person, true));

    let standalone = UniqueRecord::new(&person, attrs(&[("id", Value::Int(123))]), &registry).unwrap();
    let group_rec = UniqueRecord::new(&group,
                                      attrs(&[("id", Value::Int(456)), ("person", map(&[("id", Value::Int(123))]))]),
                                      &registry).unwrap();

    // the nested person resolved the same canonical as the standalone one
    let nested = group_rec.child("person").expect("declared unique child is wrapped");
    assert_eq!(nested.get_id(), standalone.get_id());
    assert!(nested.is_bound());
    assert!(Record::ptr_eq(&nested.source().unwrap(), &standalone.source().unwrap()));

    // and synchronizes like any other instance of that identity
    standalone.set_one("name", "Alex P.".into(), SetOptions::default()).unwrap();
    assert_eq!(nested.get("name"), Some(Value::from("Alex P.")));
}

#[test]
fn plain_children_are_not_uniqued() {
    unirec_test_util::init_test_logger();

    let registry = Registry::new();
    let person = person_schema();
    let group = Arc::new(Schema::new("GroupType").with_child("person", &person, false));

    let standalone = UniqueRecord::new(&person, attrs(&[("id", Value::Int(123))]), &registry).unwrap();
    let group_rec = UniqueRecord::new(&group,
                                      attrs(&[("id", Value::Int(456)), ("person", map(&[("id", Value::Int(123))]))]),
                                      &registry).unwrap();

    assert!(group_rec.child("person").is_none(), "non-unique children stay plain records");
    let nested = group_rec.record().child("person").unwrap();

    standalone.set_one("name", "Alex P.".into(), SetOptions::default()).unwrap();
    assert_eq!(nested.get("name"), None, "plain children never synchronize");
}

#[test]
fn no_deep_sync_between_parent_instances() {
    unirec_test_util::init_test_logger();

    let registry = Registry::new();
    let person = person_schema();
    let tag = Arc::new(Schema::new("TagType"));
    let group = Arc::new(Schema::new("GroupType").with_child("person", &person, false)
                                                 .with_collection("tags", &tag));

    let g1 = UniqueRecord::new(&group,
                               attrs(&[("id", Value::Int(1)),
                                       ("title", "staff".into()),
                                       ("person", map(&[("id", Value::Int(123)), ("name", "Alex P.".into())])),
                                       ("tags",
                                        Value::List(vec![map(&[("label", "admin".into())])]))]),
                               &registry).unwrap();

    let g2 = UniqueRecord::new(&group, attrs(&[("id", Value::Int(1))]), &registry).unwrap();

    // top-level scalars converge
    assert!(Record::ptr_eq(&g1.source().unwrap(), &g2.source().unwrap()));
    assert_eq!(g2.get("title"), Some(Value::from("staff")));

    // nested records do not: the second instance's child and collection stay
    // at their default-empty state
    let nested = g2.record().child("person").unwrap();
    assert_eq!(nested.get_id(), None);
    assert_eq!(nested.get("name"), None);
    assert_eq!(g2.record().collection("tags").unwrap().len(), 0);

    // and the populated side is untouched
    assert_eq!(g1.record().child("person").unwrap().get("name"), Some(Value::from("Alex P.")));
    assert_eq!(g1.record().collection("tags").unwrap().len(), 1);
}

#[test]
fn nested_stub_does_not_pull_full_nested_data() {
    unirec_test_util::init_test_logger();

    let registry = Registry::new();
    let person = person_schema();
    let group = Arc::new(Schema::new("GroupType").with_child("person", &person, true));

    let full = UniqueRecord::new(&group,
                                 attrs(&[("id", Value::Int(1)),
                                         ("person", map(&[("id", Value::Int(123)), ("name", "Alex P.".into())]))]),
                                 &registry).unwrap();

    // binding a second parent with a shallow stub resolves the child's
    // canonical identity, which carries the child's own scalar attributes,
    // but parent-level sync itself never descended into it
    let stub = UniqueRecord::new(&group,
                                 attrs(&[("id", Value::Int(1)), ("person", map(&[("id", Value::Int(123))]))]),
                                 &registry).unwrap();

    let nested = stub.child("person").unwrap();
    assert_eq!(nested.get("name"),
               Some(Value::from("Alex P.")),
               "the child's own canonical supplies its scalars");
    assert!(Record::ptr_eq(&nested.source().unwrap(),
                           &full.child("person").unwrap().source().unwrap()));
}
