//! End-to-end integration tests for the write pipeline.
//!
//! CREATE, MERGE, SET, REMOVE, DELETE and DETACH DELETE through the full
//! Cypher pipeline, plus transaction rollback through the write surface.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use relgraph::surface::WriteController;
use relgraph::{GraphEngine, MemoryAdapter, NodeId, StorageAdapter, Value, WriteTransaction};

// ============================================================================
// 1. CREATE
// ============================================================================

#[test]
fn test_create_and_match_back() {
    let engine = GraphEngine::open_memory();

    let result = engine
        .execute("CREATE (n:Person {name: 'Ada', age: 3})")
        .unwrap();
    assert_eq!(result.stats.nodes_created, 1);
    assert_eq!(result.stats.properties_set, 0);

    let result = engine.execute("MATCH (n:Person) RETURN n.name, n.age").unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<String>("n.name").unwrap(), "Ada");
    assert_eq!(result.rows[0].get::<i64>("n.age").unwrap(), 3);
}

#[test]
fn test_create_multiple_patterns() {
    let engine = GraphEngine::open_memory();
    engine
        .execute("CREATE (a:Person {name: 'Alice'}), (b:Person {name: 'Bob'})")
        .unwrap();

    let result = engine
        .execute("MATCH (n:Person) RETURN count(n) AS c")
        .unwrap();
    assert_eq!(result.rows[0].get::<i64>("c").unwrap(), 2);
}

#[test]
fn test_create_relationship_between_new_nodes() {
    let engine = GraphEngine::open_memory();
    let result = engine
        .execute("CREATE (a:Person {name: 'Alice'})-[r:KNOWS]->(b:Person {name: 'Bob'})")
        .unwrap();
    assert_eq!(result.stats.nodes_created, 2);
    assert_eq!(result.stats.relationships_created, 1);

    let db = engine.adapter();
    assert_eq!(db.edge_ids().unwrap().len(), 1);
    let edge = db.edge(db.edge_ids().unwrap()[0]).unwrap().unwrap();
    assert_eq!(edge.edge_type, "KNOWS");
    assert_eq!(edge.from_node, 1);
    assert_eq!(edge.to_node, 2);
}

#[test]
fn test_create_returning_row() {
    let engine = GraphEngine::open_memory();
    let result = engine
        .execute("CREATE (n:Person {name: 'Ada'}) RETURN n, n.name AS name")
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get::<NodeId>("n").unwrap(), NodeId(1));
    assert_eq!(result.rows[0].get::<String>("name").unwrap(), "Ada");
}

#[test]
fn test_create_rejects_reserved_label() {
    let engine = GraphEngine::open_memory();
    // Reserved words are keywords to the lexer, so they fail at parse.
    let err = engine.execute("CREATE (n:MATCH)").unwrap_err();
    assert_eq!(err.code(), "PARSE");
    // The write surface bypasses the parser and hits identifier validation.
    let controller = WriteController::new(Arc::new(MemoryAdapter::new()));
    let err = controller.create_node(&["match".to_string()], &[]).unwrap_err();
    assert_eq!(err.code(), "INVALID_FORMAT");
}

// ============================================================================
// 2. Transaction rollback restores the store and the id allocator
// ============================================================================

#[test]
fn test_create_then_rollback_restores_everything() {
    let adapter = Arc::new(MemoryAdapter::new());
    let controller = WriteController::new(adapter.clone());

    let id_before = adapter.next_node_id();

    controller.begin_write().unwrap();
    controller
        .create_node(
            &["Person".to_string()],
            &[("name".to_string(), Value::Str("C".into()))],
        )
        .unwrap();
    controller.rollback_write().unwrap();

    assert_eq!(adapter.node_count(), 0);
    assert_eq!(adapter.next_node_id(), id_before);
}

#[test]
fn test_commit_persists() {
    let adapter = Arc::new(MemoryAdapter::new());
    let controller = WriteController::new(adapter.clone());

    controller.begin_write().unwrap();
    controller.create_node(&["A".to_string()], &[]).unwrap();
    controller.commit_write().unwrap();

    assert_eq!(adapter.node_count(), 1);
}

// ============================================================================
// 3. MERGE
// ============================================================================

#[test]
fn test_merge_matches_existing_node() {
    let engine = GraphEngine::open_memory();
    engine
        .adapter()
        .add_node(1, r#"["U"]"#, r#"{"email":"x"}"#)
        .unwrap();

    let result = engine
        .execute("MERGE (n:U {email: 'x'}) ON MATCH SET n.seen = 1")
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert!(!result.rows[0].get::<bool>("was_created").unwrap());

    let check = engine.execute("MATCH (n:U) RETURN n.seen").unwrap();
    assert_eq!(check.rows[0].get::<i64>("n.seen").unwrap(), 1);
}

#[test]
fn test_merge_creates_missing_node() {
    let engine = GraphEngine::open_memory();

    let result = engine
        .execute("MERGE (n:U {email: 'y'}) ON CREATE SET n.t = 2")
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert!(result.rows[0].get::<bool>("was_created").unwrap());

    let db = engine.adapter();
    assert_eq!(db.node_count(), 1);
    let rec = db.node(1).unwrap().unwrap().decode().unwrap();
    assert!(rec.has_label("U"));
    assert_eq!(rec.get("email"), Some(&Value::Str("y".into())));
    assert_eq!(rec.get("t"), Some(&Value::Int(2)));
}

#[test]
fn test_merge_is_stable_across_repeats() {
    let engine = GraphEngine::open_memory();
    engine.execute("MERGE (n:U {email: 'z'})").unwrap();
    engine.execute("MERGE (n:U {email: 'z'})").unwrap();
    assert_eq!(engine.adapter().node_count(), 1);
}

// ============================================================================
// 4. SET / REMOVE
// ============================================================================

#[test]
fn test_match_set_property() {
    let engine = GraphEngine::open_memory();
    engine.execute("CREATE (n:Person {name: 'Ada'})").unwrap();

    let result = engine
        .execute("MATCH (n:Person) WHERE n.name = 'Ada' SET n.age = 30")
        .unwrap();
    assert_eq!(result.stats.properties_set, 1);

    let check = engine.execute("MATCH (n:Person) RETURN n.age").unwrap();
    assert_eq!(check.rows[0].get::<i64>("n.age").unwrap(), 30);
}

#[test]
fn test_set_label_and_remove_label() {
    let engine = GraphEngine::open_memory();
    engine.execute("CREATE (n:Person {name: 'Ada'})").unwrap();

    engine.execute("MATCH (n:Person) SET n:Employee").unwrap();
    let both = engine.execute("MATCH (n:Employee) RETURN n").unwrap();
    assert_eq!(both.rows.len(), 1);

    engine.execute("MATCH (n:Person) REMOVE n:Employee").unwrap();
    let gone = engine.execute("MATCH (n:Employee) RETURN n").unwrap();
    assert_eq!(gone.rows.len(), 0);
}

#[test]
fn test_set_merge_properties() {
    let engine = GraphEngine::open_memory();
    engine.execute("CREATE (n:Person {name: 'Ada'})").unwrap();
    engine
        .execute("MATCH (n:Person) SET n += {age: 3, city: 'London'}")
        .unwrap();

    let check = engine
        .execute("MATCH (n:Person) RETURN n.name, n.age, n.city")
        .unwrap();
    assert_eq!(check.rows[0].get::<String>("n.name").unwrap(), "Ada");
    assert_eq!(check.rows[0].get::<i64>("n.age").unwrap(), 3);
    assert_eq!(check.rows[0].get::<String>("n.city").unwrap(), "London");
}

#[test]
fn test_set_all_properties_replaces() {
    let engine = GraphEngine::open_memory();
    engine.execute("CREATE (n:Person {name: 'Ada', age: 3})").unwrap();
    engine.execute("MATCH (n:Person) SET n = {city: 'Oslo'}").unwrap();

    let check = engine
        .execute("MATCH (n:Person) RETURN n.name, n.city")
        .unwrap();
    assert_eq!(check.rows[0].get_value("n.name"), Some(&Value::Null));
    assert_eq!(check.rows[0].get::<String>("n.city").unwrap(), "Oslo");
}

#[test]
fn test_remove_property() {
    let engine = GraphEngine::open_memory();
    engine.execute("CREATE (n:Person {name: 'Ada', age: 3})").unwrap();
    engine.execute("MATCH (n:Person) REMOVE n.age").unwrap();

    let check = engine.execute("MATCH (n:Person) RETURN n.age").unwrap();
    assert_eq!(check.rows[0].get_value("n.age"), Some(&Value::Null));
}

// ============================================================================
// 5. DELETE / DETACH DELETE
// ============================================================================

fn seeded_pair() -> GraphEngine<MemoryAdapter> {
    let engine = GraphEngine::open_memory();
    let db = engine.adapter();
    db.add_node(1, r#"["Person"]"#, r#"{"name":"A"}"#).unwrap();
    db.add_node(2, r#"["Person"]"#, r#"{"name":"B"}"#).unwrap();
    db.add_edge(10, 1, 2, "R", 0.0, "{}").unwrap();
    engine
}

#[test]
fn test_plain_delete_of_connected_node_fails() {
    let engine = seeded_pair();
    let err = engine
        .execute("MATCH (n:Person) WHERE n.name = 'A' DELETE n")
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT");
    // The store is untouched.
    assert_eq!(engine.adapter().node_count(), 2);
    assert_eq!(engine.adapter().edge_count(), 1);
}

#[test]
fn test_detach_delete_removes_node_and_edges() {
    let engine = seeded_pair();
    let result = engine
        .execute("MATCH (n:Person) WHERE n.name = 'A' DETACH DELETE n")
        .unwrap();
    assert_eq!(result.stats.nodes_deleted, 1);
    assert_eq!(result.stats.relationships_deleted, 1);

    let db = engine.adapter();
    assert_eq!(db.node_ids().unwrap(), vec![2]);
    assert!(db.edge_ids().unwrap().is_empty());
}

#[test]
fn test_detach_delete_rollback_restores_node_and_edge() {
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.add_node(1, r#"["Person"]"#, r#"{"name":"A"}"#).unwrap();
    adapter.add_node(2, r#"["Person"]"#, r#"{"name":"B"}"#).unwrap();
    adapter.add_edge(10, 1, 2, "R", 0.25, r#"{"w":1}"#).unwrap();

    let mut tx = WriteTransaction::new(adapter.clone());
    tx.begin().unwrap();
    tx.delete_node(NodeId(1), true).unwrap();
    assert!(!adapter.node_exists(1));
    assert!(!adapter.edge_exists(10));
    tx.rollback().unwrap();

    let node = adapter.node(1).unwrap().unwrap().decode().unwrap();
    assert!(node.has_label("Person"));
    assert_eq!(node.get("name"), Some(&Value::Str("A".into())));

    let edge = adapter.edge(10).unwrap().unwrap();
    assert_eq!((edge.from_node, edge.to_node), (1, 2));
    assert_eq!(edge.edge_type, "R");
    assert_eq!(edge.weight, 0.25);
}

#[test]
fn test_delete_relationship_point_op() {
    let adapter = Arc::new(MemoryAdapter::new());
    adapter.add_node(1, "[]", "{}").unwrap();
    adapter.add_node(2, "[]", "{}").unwrap();
    adapter.add_edge(1, 1, 2, "R", 0.0, "{}").unwrap();

    let mut tx = WriteTransaction::new(adapter.clone());
    tx.delete_relationship(1).unwrap();
    assert!(adapter.edge_ids().unwrap().is_empty());
    assert!(adapter.node_relationships(1).unwrap().is_empty());
}

// ============================================================================
// 6. Statement atomicity: a failing write rolls the statement back
// ============================================================================

#[test]
fn test_failed_statement_leaves_store_unchanged() {
    let engine = GraphEngine::open_memory();
    engine.execute("CREATE (n:Person {name: 'Ada'})").unwrap();

    // Second label set is a duplicate -> constraint error; the first SET in
    // the same statement must be rolled back with it.
    let err = engine
        .execute("MATCH (n:Person) SET n.age = 9, n:Person")
        .unwrap_err();
    assert_eq!(err.code(), "CONSTRAINT");

    let check = engine.execute("MATCH (n:Person) RETURN n.age").unwrap();
    assert_eq!(check.rows[0].get_value("n.age"), Some(&Value::Null));
}
