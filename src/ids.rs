//! Interned (venue, symbol) identifiers.
//!
//! Venue and symbol names are not a compile-time enumeration (unlike the
//! teacher's `edge::wire::SymbolId`, which is fixed to four Binance pairs)
//! because this core is cross-exchange and symbol-agnostic. Instead each
//! name is interned into a small integer id on first sight, bounded by the
//! fixed cardinality spec.md assumes (`<= 32 venues`, `<= 256 symbols`) so
//! the id fits the byte layout of a `QuoteCache` cell index and of an
//! `Operation` record.

use parking_lot::RwLock;
use std::collections::HashMap;

/// Maximum distinct venues the cache can address.
pub const MAX_VENUES: usize = 32;
/// Maximum distinct symbols the cache can address.
pub const MAX_SYMBOLS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VenueId(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u16);

/// A bounded name <-> id interner, shared by venues and symbols.
///
/// Registration is append-only for the process lifetime: ids are handed
/// out in first-seen order and never recycled, matching the quote cache's
/// "owns its storage for the process lifetime; there is no eviction" rule.
#[derive(Debug)]
pub struct Interner {
    capacity: usize,
    names: RwLock<Vec<String>>,
    by_name: RwLock<HashMap<String, u16>>,
}

impl Interner {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            names: RwLock::new(Vec::with_capacity(capacity)),
            by_name: RwLock::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Look up an existing id without registering a new one.
    pub fn find(&self, name: &str) -> Option<u16> {
        self.by_name.read().get(name).copied()
    }

    /// Intern `name`, registering it if this is the first time it's seen.
    /// Returns `None` once `capacity` distinct names have been registered.
    pub fn intern(&self, name: &str) -> Option<u16> {
        if let Some(id) = self.find(name) {
            return Some(id);
        }
        let mut names = self.names.write();
        let mut by_name = self.by_name.write();
        // Re-check under the write lock: another writer may have raced us.
        if let Some(id) = by_name.get(name) {
            return Some(*id);
        }
        if names.len() >= self.capacity {
            return None;
        }
        let id = names.len() as u16;
        names.push(name.to_string());
        by_name.insert(name.to_string(), id);
        Some(id)
    }

    pub fn name_of(&self, id: u16) -> Option<String> {
        self.names.read().get(id as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interns_stably_and_caps_at_capacity() {
        let interner = Interner::new(2);
        let a = interner.intern("binance").unwrap();
        let b = interner.intern("bybit").unwrap();
        assert_ne!(a, b);
        assert_eq!(interner.intern("binance"), Some(a));
        assert_eq!(interner.intern("okx"), None);
        assert_eq!(interner.name_of(a).as_deref(), Some("binance"));
    }
}
