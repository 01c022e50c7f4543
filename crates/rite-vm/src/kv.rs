//! Ordered key/value pair store.
//!
//! Instance variables, Hash payloads and the VM's global/constant tables
//! all share this one structure: an insertion-ordered pair list with
//! linear search. On the intended targets these lists hold a handful of
//! entries; the inline capacity keeps them off the heap entirely.

use smallvec::SmallVec;

use rite_core::SymId;

use crate::value::Value;

/// Insertion-ordered `(key, value)` list with linear search.
#[derive(Default)]
pub struct KvList {
    pairs: SmallVec<[(Value, Value); 4]>,
}

impl KvList {
    pub fn new() -> Self {
        KvList::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Look up by key equality (identity or defined comparison zero).
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(k, _)| k.eq_value(key))
            .map(|(_, v)| v)
    }

    /// Insert or overwrite. Existing keys keep their position; new keys
    /// append, preserving insertion order.
    pub fn set(&mut self, key: Value, value: Value) {
        for (k, v) in self.pairs.iter_mut() {
            if k.eq_value(&key) {
                *v = value;
                return;
            }
        }
        self.pairs.push((key, value));
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let idx = self.pairs.iter().position(|(k, _)| k.eq_value(key))?;
        Some(self.pairs.remove(idx).1)
    }

    /// Symbol-keyed lookup, the instance-variable fast path.
    pub fn get_sym(&self, sym: SymId) -> Option<&Value> {
        self.pairs
            .iter()
            .find(|(k, _)| matches!(k, Value::Symbol(s) if *s == sym))
            .map(|(_, v)| v)
    }

    /// Symbol-keyed insert or overwrite.
    pub fn set_sym(&mut self, sym: SymId, value: Value) {
        for (k, v) in self.pairs.iter_mut() {
            if matches!(k, Value::Symbol(s) if *s == sym) {
                *v = value;
                return;
            }
        }
        self.pairs.push((Value::Symbol(sym), value));
    }

    /// Shallow copy: every key and value duplicated by reference count.
    pub fn dup(&self) -> KvList {
        KvList {
            pairs: self.pairs.clone(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.pairs.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_overwrite() {
        let mut kv = KvList::new();
        kv.set(Value::string("k"), Value::Integer(1));
        kv.set(Value::string("k"), Value::Integer(2));
        kv.set(Value::string("other"), Value::Integer(3));

        assert_eq!(kv.len(), 2);
        assert!(matches!(kv.get(&Value::string("k")), Some(Value::Integer(2))));
    }

    #[test]
    fn preserves_insertion_order() {
        let mut kv = KvList::new();
        for i in 0..6 {
            kv.set(Value::Integer(i), Value::Integer(i * 10));
        }
        let keys: Vec<i64> = kv
            .iter()
            .filter_map(|(k, _)| k.as_integer())
            .collect();
        assert_eq!(keys, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn symbol_fast_path_matches_generic_path() {
        let mut kv = KvList::new();
        let sym = SymId::new(5);
        kv.set_sym(sym, Value::Integer(42));

        assert!(matches!(kv.get_sym(sym), Some(Value::Integer(42))));
        assert!(matches!(
            kv.get(&Value::Symbol(sym)),
            Some(Value::Integer(42))
        ));
        assert!(kv.get_sym(SymId::new(6)).is_none());
    }

    #[test]
    fn dup_shares_payloads() {
        let mut kv = KvList::new();
        let s = Value::string("payload");
        kv.set_sym(SymId::new(0), s.clone());

        let copy = kv.dup();
        assert_eq!(s.ref_count(), Some(3));
        drop(copy);
        assert_eq!(s.ref_count(), Some(2));
    }

    #[test]
    fn remove_returns_the_value() {
        let mut kv = KvList::new();
        kv.set(Value::Integer(1), Value::string("one"));
        let v = kv.remove(&Value::Integer(1)).unwrap();
        assert!(matches!(v, Value::String(_)));
        assert!(kv.is_empty());
        assert!(kv.remove(&Value::Integer(1)).is_none());
    }
}
