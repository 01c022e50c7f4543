//! Symbol interner.
//!
//! One append-only table maps NUL-free names to dense small ids. Entries
//! are stable for the life of the process: name bytes are copied into the
//! pool's never-freed region at first intern, so a resolved name stays
//! valid no matter what the rest of the runtime does.
//!
//! Lookup is driven by a 16-bit multiplicative hash. By default the table
//! carries an intrusive binary search tree keyed on that hash (root at
//! index 0, index 0 doubling as the null-child sentinel, equal hashes
//! routed right); the `symbol-linear` feature swaps in a plain scan.

use crate::alloc::{BlockRef, Pool};

/// Default table capacity when the embedder does not pick one.
pub const DEFAULT_MAX_SYMBOLS: usize = 512;

/// Interned symbol id: a dense index into the process-wide table.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SymId(u16);

impl SymId {
    pub fn new(raw: u16) -> Self {
        SymId(raw)
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

struct SymEntry {
    hash: u16,
    block: BlockRef,
    len: u16,
    left: u16,
    right: u16,
}

/// Append-only name table with a fixed capacity.
pub struct SymbolTable {
    entries: Vec<SymEntry>,
    capacity: usize,
}

impl SymbolTable {
    pub fn new(capacity: usize) -> Self {
        SymbolTable {
            entries: Vec::new(),
            capacity: capacity.min(u16::MAX as usize),
        }
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Intern `name`, returning its id. Idempotent: a name already in the
    /// table returns its original id without touching the pool. Returns
    /// `None` when the table is full or the pool cannot hold the copy.
    pub fn intern(&mut self, pool: &mut Pool, name: &str) -> Option<SymId> {
        let hash = calc_hash(name.as_bytes());
        if let Some(id) = self.search(pool, hash, name.as_bytes()) {
            return Some(id);
        }
        if self.entries.len() >= self.capacity {
            return None;
        }

        let bytes = name.as_bytes();
        let block = pool.alloc_no_free(bytes.len().max(1))?;
        pool.bytes_mut(block)[..bytes.len()].copy_from_slice(bytes);

        let id = self.entries.len() as u16;
        self.entries.push(SymEntry {
            hash,
            block,
            len: bytes.len() as u16,
            left: 0,
            right: 0,
        });
        self.link(hash, id);
        Some(SymId(id))
    }

    /// Find an existing symbol without inserting.
    pub fn lookup(&self, pool: &Pool, name: &str) -> Option<SymId> {
        self.search(pool, calc_hash(name.as_bytes()), name.as_bytes())
    }

    /// Resolve an id back to its name. `None` for out-of-range ids.
    pub fn name<'p>(&self, pool: &'p Pool, id: SymId) -> Option<&'p str> {
        let entry = self.entries.get(id.0 as usize)?;
        let bytes = &pool.bytes(entry.block)[..entry.len as usize];
        // Names only enter through `intern(&str)`, so this cannot fail.
        std::str::from_utf8(bytes).ok()
    }

    fn entry_name<'p>(&self, pool: &'p Pool, idx: usize) -> &'p [u8] {
        let entry = &self.entries[idx];
        &pool.bytes(entry.block)[..entry.len as usize]
    }

    #[cfg(not(feature = "symbol-linear"))]
    fn search(&self, pool: &Pool, hash: u16, name: &[u8]) -> Option<SymId> {
        if self.entries.is_empty() {
            return None;
        }
        let mut i = 0usize;
        loop {
            let entry = &self.entries[i];
            if entry.hash == hash && self.entry_name(pool, i) == name {
                return Some(SymId(i as u16));
            }
            let next = if hash < entry.hash {
                entry.left
            } else {
                entry.right
            };
            if next == 0 {
                return None;
            }
            i = next as usize;
        }
    }

    #[cfg(not(feature = "symbol-linear"))]
    fn link(&mut self, hash: u16, id: u16) {
        if id == 0 {
            return; // the first entry is the root
        }
        let mut i = 0usize;
        loop {
            let node = &self.entries[i];
            let next = if hash < node.hash {
                node.left
            } else {
                node.right
            };
            if next == 0 {
                if hash < node.hash {
                    self.entries[i].left = id;
                } else {
                    self.entries[i].right = id;
                }
                return;
            }
            i = next as usize;
        }
    }

    #[cfg(feature = "symbol-linear")]
    fn search(&self, pool: &Pool, hash: u16, name: &[u8]) -> Option<SymId> {
        for i in 0..self.entries.len() {
            if self.entries[i].hash == hash && self.entry_name(pool, i) == name {
                return Some(SymId(i as u16));
            }
        }
        None
    }

    #[cfg(feature = "symbol-linear")]
    fn link(&mut self, _hash: u16, _id: u16) {}
}

/// The 16-bit multiplicative name hash: `h = h * 17 + byte`.
fn calc_hash(bytes: &[u8]) -> u16 {
    let mut h: u16 = 0;
    for &b in bytes {
        h = h.wrapping_mul(17).wrapping_add(b as u16);
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Pool, SymbolTable) {
        (Pool::new(4096), SymbolTable::new(DEFAULT_MAX_SYMBOLS))
    }

    #[test]
    fn ids_are_dense_and_stable() {
        let (mut pool, mut syms) = fixture();
        let foo = syms.intern(&mut pool, "foo").unwrap();
        let bar = syms.intern(&mut pool, "bar").unwrap();
        let foo2 = syms.intern(&mut pool, "foo").unwrap();

        assert_eq!(foo.as_u16(), 0);
        assert_eq!(bar.as_u16(), 1);
        assert_eq!(foo2, foo);
        assert_eq!(syms.name(&pool, bar), Some("bar"));
    }

    #[test]
    fn intern_is_idempotent() {
        let (mut pool, mut syms) = fixture();
        let a = syms.intern(&mut pool, "initialize").unwrap();
        let used = pool.statistics().used;
        let b = syms.intern(&mut pool, "initialize").unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.statistics().used, used, "re-intern must not allocate");
    }

    #[test]
    fn round_trips_every_name() {
        let (mut pool, mut syms) = fixture();
        let names = [
            "foo", "bar", "baz", "+", "-", "<=>", "initialize", "@x", "x=", "",
        ];
        let ids: Vec<SymId> = names
            .iter()
            .map(|n| syms.intern(&mut pool, n).unwrap())
            .collect();
        for (name, id) in names.iter().zip(ids) {
            assert_eq!(syms.name(&pool, id), Some(*name));
            assert_eq!(syms.lookup(&pool, name), Some(id));
        }
    }

    #[test]
    fn lookup_does_not_insert() {
        let (mut pool, mut syms) = fixture();
        syms.intern(&mut pool, "known").unwrap();
        assert_eq!(syms.lookup(&pool, "unknown"), None);
        assert_eq!(syms.len(), 1);
    }

    #[test]
    fn out_of_range_id_resolves_to_none() {
        let (mut pool, mut syms) = fixture();
        syms.intern(&mut pool, "only").unwrap();
        assert_eq!(syms.name(&pool, SymId::new(7)), None);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut pool = Pool::new(4096);
        let mut syms = SymbolTable::new(2);
        assert!(syms.intern(&mut pool, "a").is_some());
        assert!(syms.intern(&mut pool, "b").is_some());
        assert!(syms.intern(&mut pool, "c").is_none());
        // Existing entries still resolve after a refused insert.
        assert_eq!(syms.lookup(&pool, "b").map(SymId::as_u16), Some(1));
    }

    #[test]
    fn survives_many_symbols() {
        // Enough names to exercise both tree arms repeatedly, including
        // hash collisions from short names.
        let mut pool = Pool::new(32 * 1024);
        let mut syms = SymbolTable::new(600);
        let mut ids = Vec::new();
        for i in 0..500 {
            let name = format!("sym_{i}");
            ids.push((name.clone(), syms.intern(&mut pool, &name).unwrap()));
        }
        for (name, id) in &ids {
            assert_eq!(syms.lookup(&pool, name), Some(*id));
            assert_eq!(syms.name(&pool, *id), Some(name.as_str()));
        }
    }

    #[test]
    fn name_storage_survives_pool_churn() {
        let (mut pool, mut syms) = fixture();
        let id = syms.intern(&mut pool, "durable").unwrap();
        // Heavy alloc/free traffic must not disturb pinned name storage.
        for i in 0..32 {
            let r = pool.alloc(64 + i).unwrap();
            pool.free(r);
        }
        assert_eq!(syms.name(&pool, id), Some("durable"));
    }
}
