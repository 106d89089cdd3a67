//! # Open-addressed value table
//!
//! [`KvMap`] maps [`Value`] keys to [`Value`] payloads with linear
//! probing. One instance serves as the interpreter's dictionary (word
//! definitions, native indices, variable cells); further instances back
//! hashmap values on the stack.
//!
//! The table starts at 64 slots on first insert and grows by ×1.62
//! (rehash) once every slot is occupied. Key identity is [`Value`]
//! equality, so a `Name` and a `RefName` with the same spelling are
//! distinct keys — word definitions and variable cells coexist.

use crate::value::Value;

/// Growth factor applied to the slot count on rehash.
const GROWTH: f64 = 1.62;

/// Slot count allocated on the first insert.
const INITIAL_CAPACITY: usize = 64;

/// Open-addressed hash table from values to values.
pub struct KvMap {
    slots: Vec<Option<(Value, Value)>>,
    len: usize,
}

impl KvMap {
    /// Empty table; allocates nothing until the first insert.
    pub fn new() -> KvMap {
        KvMap {
            slots: Vec::new(),
            len: 0,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Insert or replace the mapping for `key`.
    pub fn put(&mut self, key: Value, value: Value) {
        if self.len == self.slots.len() {
            self.grow();
        }
        self.place(key, value);
    }

    /// Look up `key`, cloning the payload. Returns `None` when absent.
    pub fn get(&self, key: &Value) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let cap = self.slots.len();
        let start = key.hash() as usize % cap;
        let mut idx = start;
        while let Some((k, v)) = &self.slots[idx] {
            if k == key {
                return Some(v.clone());
            }
            idx = (idx + 1) % cap;
            if idx == start {
                // wrapped around a full table
                break;
            }
        }
        None
    }

    /// Remove the mapping for `key`, returning its payload.
    ///
    /// Linear probing needs the cluster after the removed slot to be
    /// re-placed, otherwise later lookups stop at the fresh hole.
    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        let cap = self.slots.len();
        let start = key.hash() as usize % cap;
        let mut idx = start;
        loop {
            match &self.slots[idx] {
                Some((k, _)) if k == key => break,
                Some(_) => {
                    idx = (idx + 1) % cap;
                    if idx == start {
                        return None;
                    }
                }
                None => return None,
            }
        }
        let (_, removed) = self.slots[idx].take()?;
        self.len -= 1;
        let mut next = (idx + 1) % cap;
        while let Some((k, v)) = self.slots[next].take() {
            self.len -= 1;
            self.place(k, v);
            next = (next + 1) % cap;
        }
        Some(removed)
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.slots
            .iter()
            .filter_map(|slot| slot.as_ref().map(|(k, v)| (k, v)))
    }

    /// Probe-insert into a table that is guaranteed to have room.
    fn place(&mut self, key: Value, value: Value) {
        let cap = self.slots.len();
        let mut idx = key.hash() as usize % cap;
        loop {
            match &self.slots[idx] {
                Some((k, _)) if *k == key => {
                    self.slots[idx] = Some((key, value));
                    return;
                }
                Some(_) => idx = (idx + 1) % cap,
                None => {
                    self.slots[idx] = Some((key, value));
                    self.len += 1;
                    return;
                }
            }
        }
    }

    fn grow(&mut self) {
        let new_cap = if self.slots.is_empty() {
            INITIAL_CAPACITY
        } else {
            (self.slots.len() as f64 * GROWTH) as usize
        };
        let old = std::mem::replace(&mut self.slots, vec![None; new_cap]);
        self.len = 0;
        for (k, v) in old.into_iter().flatten() {
            self.place(k, v);
        }
    }
}

impl Default for KvMap {
    fn default() -> KvMap {
        KvMap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(n: &str) -> Value {
        Value::Name(n.into())
    }

    #[test]
    fn put_get_roundtrip() {
        let mut m = KvMap::new();
        m.put(name("pi"), Value::Number(3.1415));
        m.put(Value::Number(2.0), Value::string("two"));
        assert_eq!(m.get(&name("pi")), Some(Value::Number(3.1415)));
        assert_eq!(m.get(&Value::Number(2.0)), Some(Value::string("two")));
        assert_eq!(m.get(&name("tau")), None);
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn put_replaces_existing_key() {
        let mut m = KvMap::new();
        m.put(name("x"), Value::Number(1.0));
        m.put(name("x"), Value::Number(2.0));
        assert_eq!(m.len(), 1);
        assert_eq!(m.get(&name("x")), Some(Value::Number(2.0)));
    }

    #[test]
    fn names_and_refnames_are_distinct_keys() {
        let mut m = KvMap::new();
        m.put(name("x"), Value::Number(1.0));
        m.put(Value::RefName("x".into()), Value::Number(2.0));
        assert_eq!(m.get(&name("x")), Some(Value::Number(1.0)));
        assert_eq!(m.get(&Value::RefName("x".into())), Some(Value::Number(2.0)));
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut m = KvMap::new();
        for i in 0..500 {
            m.put(Value::Number(i as f64), Value::Number((i * 2) as f64));
        }
        assert_eq!(m.len(), 500);
        for i in 0..500 {
            assert_eq!(
                m.get(&Value::Number(i as f64)),
                Some(Value::Number((i * 2) as f64))
            );
        }
    }

    #[test]
    fn remove_keeps_probe_clusters_reachable() {
        let mut m = KvMap::new();
        for i in 0..200 {
            m.put(Value::Number(i as f64), Value::Number(i as f64));
        }
        for i in (0..200).step_by(3) {
            assert_eq!(
                m.remove(&Value::Number(i as f64)),
                Some(Value::Number(i as f64))
            );
        }
        for i in 0..200 {
            let expect = if i % 3 == 0 {
                None
            } else {
                Some(Value::Number(i as f64))
            };
            assert_eq!(m.get(&Value::Number(i as f64)), expect, "key {}", i);
        }
        assert_eq!(m.remove(&Value::Number(0.0)), None);
    }
}
