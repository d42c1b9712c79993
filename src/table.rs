use std::mem::size_of;

use crate::objects::object_string::ObjectString;
use crate::value::{is_nil, make_bool_value, make_nil_value, Value};

// Grow at 3/4 load.
const TABLE_MAX_LOAD_NUM: usize = 3;
const TABLE_MAX_LOAD_DEN: usize = 4;

/// key == null distinguishes two states: an empty slot holds nil, a
/// tombstone holds true.
#[derive(Clone, Copy)]
pub struct Entry {
    pub key: *mut ObjectString,
    pub value: Value,
}

impl Entry {
    fn empty() -> Entry {
        Entry {
            key: std::ptr::null_mut(),
            value: make_nil_value(),
        }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_null() && !is_nil(&self.value)
    }
}

/// Open-addressed, linear-probing table keyed by interned string identity.
/// Capacity stays a power of two so probing can mask instead of mod.
pub struct Table {
    // Live keys plus tombstones; governs the load factor.
    count: usize,
    entries: Vec<Entry>,
}

fn find_entry(entries: &[Entry], key: *mut ObjectString) -> usize {
    let capacity = entries.len();
    let mut index = unsafe { (*key).hash } as usize & (capacity - 1);
    let mut tombstone: Option<usize> = None;

    loop {
        let entry = &entries[index];
        if entry.key.is_null() {
            if !entry.is_tombstone() {
                // Truly empty; reuse an earlier tombstone if we passed one.
                return tombstone.unwrap_or(index);
            }
            if tombstone.is_none() {
                tombstone = Some(index);
            }
        } else if entry.key == key {
            return index;
        }

        index = (index + 1) & (capacity - 1);
    }
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    /// Number of live keys (tombstones excluded).
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.key.is_null()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, key: *mut ObjectString) -> Option<Value> {
        if self.count == 0 {
            return None;
        }

        let entry = &self.entries[find_entry(&self.entries, key)];
        if entry.key.is_null() {
            return None;
        }
        Some(entry.value)
    }

    /// Insert or overwrite; returns true when the key was not present.
    pub fn set(&mut self, key: *mut ObjectString, value: Value) -> bool {
        if (self.count + 1) * TABLE_MAX_LOAD_DEN > self.entries.len() * TABLE_MAX_LOAD_NUM {
            let capacity = if self.entries.len() < 8 {
                8
            } else {
                self.entries.len() * 2
            };
            self.adjust_capacity(capacity);
        }

        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        let is_new_key = entry.key.is_null();
        // A reused tombstone already counts toward the load factor.
        if is_new_key && is_nil(&entry.value) {
            self.count += 1;
        }

        entry.key = key;
        entry.value = value;
        is_new_key
    }

    /// Tombstone the key; returns false when it was absent.
    pub fn delete(&mut self, key: *mut ObjectString) -> bool {
        if self.count == 0 {
            return false;
        }

        let index = find_entry(&self.entries, key);
        let entry = &mut self.entries[index];
        if entry.key.is_null() {
            return false;
        }

        entry.key = std::ptr::null_mut();
        entry.value = make_bool_value(true);
        true
    }

    /// Copy every live entry of `from` into this table (INHERIT).
    pub fn add_all(&mut self, from: &Table) {
        for entry in &from.entries {
            if !entry.key.is_null() {
                self.set(entry.key, entry.value);
            }
        }
    }

    /// Interning lookup: the key pointer is not known yet, so probe by
    /// hash and compare bytes.
    pub fn find_string(&self, content: &str, hash: u32) -> Option<*mut ObjectString> {
        if self.count == 0 {
            return None;
        }

        let capacity = self.entries.len();
        let mut index = hash as usize & (capacity - 1);
        loop {
            let entry = &self.entries[index];
            if entry.key.is_null() {
                if !entry.is_tombstone() {
                    return None;
                }
            } else {
                let key = unsafe { &*entry.key };
                if key.hash == hash && key.content == content {
                    return Some(entry.key);
                }
            }

            index = (index + 1) & (capacity - 1);
        }
    }

    /// Weak-key sweep support: drop every entry whose key the collector
    /// still considers unreached.
    pub fn remove_unmarked(&mut self, is_marked: impl Fn(*mut ObjectString) -> bool) {
        for entry in &mut self.entries {
            if !entry.key.is_null() && !is_marked(entry.key) {
                entry.key = std::ptr::null_mut();
                entry.value = make_bool_value(true);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (*mut ObjectString, &Value)> {
        self.entries
            .iter()
            .filter(|entry| !entry.key.is_null())
            .map(|entry| (entry.key, &entry.value))
    }

    /// Backing-array bytes, for GC accounting.
    pub fn entries_size(&self) -> usize {
        self.entries.capacity() * size_of::<Entry>()
    }

    fn adjust_capacity(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::empty(); capacity]);

        // Tombstones are dropped on rebuild, so recount.
        self.count = 0;
        for entry in old {
            if entry.key.is_null() {
                continue;
            }
            let index = find_entry(&self.entries, entry.key);
            self.entries[index] = entry;
            self.count += 1;
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Table::new()
    }
}
