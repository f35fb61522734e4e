//! Execution context — the environment a query runs in.
//!
//! Holds the storage adapter handle, the variable binding table, query
//! parameters and the running mutation statistics. Bindings deep-copy on
//! insert; the context outlives the iterator tree it drives.

use hashbrown::HashMap;

use super::ExecutionStats;
use crate::model::Value;
use crate::storage::StorageAdapter;

pub struct ExecContext<'a> {
    pub adapter: &'a dyn StorageAdapter,
    /// Ordered binding table; string-equal names collapse, last write wins.
    bindings: Vec<(String, Value)>,
    /// name → index into `bindings` for O(1) lookup.
    index: HashMap<String, usize>,
    /// Query parameters (`$name`).
    params: Vec<(String, Value)>,
    pub stats: ExecutionStats,
}

impl<'a> ExecContext<'a> {
    pub fn new(adapter: &'a dyn StorageAdapter) -> Self {
        Self {
            adapter,
            bindings: Vec::new(),
            index: HashMap::new(),
            params: Vec::new(),
            stats: ExecutionStats::default(),
        }
    }

    pub fn with_params(adapter: &'a dyn StorageAdapter, params: Vec<(String, Value)>) -> Self {
        let mut ctx = Self::new(adapter);
        ctx.params = params;
        ctx
    }

    /// Update-or-insert a binding. The value is cloned in, so the caller's
    /// copy stays independent.
    pub fn bind(&mut self, name: &str, value: &Value) {
        if let Some(&i) = self.index.get(name) {
            self.bindings[i].1 = value.clone();
        } else {
            self.index.insert(name.to_string(), self.bindings.len());
            self.bindings.push((name.to_string(), value.clone()));
        }
    }

    /// Read a binding; absent names read as Null.
    pub fn get(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.index
            .get(name)
            .map(|&i| &self.bindings[i].1)
            .unwrap_or(&NULL)
    }

    pub fn has_binding(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;

    #[test]
    fn test_bind_last_write_wins() {
        let adapter = MemoryAdapter::new();
        let mut ctx = ExecContext::new(&adapter);
        ctx.bind("n", &Value::Int(1));
        ctx.bind("n", &Value::Int(2));
        assert_eq!(ctx.get("n"), &Value::Int(2));
    }

    #[test]
    fn test_get_missing_is_null() {
        let adapter = MemoryAdapter::new();
        let ctx = ExecContext::new(&adapter);
        assert_eq!(ctx.get("missing"), &Value::Null);
        assert!(!ctx.has_binding("missing"));
    }

    #[test]
    fn test_bind_deep_copies() {
        let adapter = MemoryAdapter::new();
        let mut ctx = ExecContext::new(&adapter);
        let mut list = Value::List(vec![Value::Int(1)]);
        ctx.bind("xs", &list);
        if let Value::List(items) = &mut list {
            items.push(Value::Int(2));
        }
        assert_eq!(ctx.get("xs"), &Value::List(vec![Value::Int(1)]));
    }
}
