//! Compile-once, lookup-by-pattern store of regular expressions (§4.1).

use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;

#[derive(Debug, Default)]
pub struct RegexCache {
    patterns: DashMap<String, Arc<Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached compiled regex for `pattern`, compiling and
    /// inserting it if absent. Compile errors are returned unwrapped and
    /// are NOT cached, so a later correction by the caller works (§4.1).
    /// Identical patterns return pointer-equal (`Arc`-equal) objects.
    pub fn get(&self, pattern: &str) -> Result<Arc<Regex>, regex::Error> {
        if let Some(existing) = self.patterns.get(pattern) {
            return Ok(Arc::clone(&existing));
        }
        let compiled = Arc::new(Regex::new(pattern)?);
        // `entry` avoids a second compile if another thread won the race.
        let entry = self
            .patterns
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::clone(&compiled));
        Ok(Arc::clone(&entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn repeated_get_returns_same_arc() {
        let cache = RegexCache::new();
        let a = cache.get("a+b*").unwrap();
        let b = cache.get("a+b*").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn compile_errors_are_not_cached() {
        let cache = RegexCache::new();
        assert!(cache.get("(unterminated").is_err());
        // fixed pattern now succeeds, proving the bad one wasn't cached
        // under the same key in a way that would poison future lookups.
        assert!(cache.get("fine").is_ok());
    }

    #[test]
    fn concurrent_gets_agree_on_one_instance() {
        let cache = Arc::new(RegexCache::new());
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    cache.get("concurrent-pattern").unwrap()
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }
}
