//! Using the shared cache before it is initialised must fail loudly.
//!
//! Kept in its own test binary so no other test can initialise the
//! process-wide manager first.

use object_cache::{CacheContext, CacheManager, CachedAttributes};

#[test]
fn test_try_shared_is_empty_before_initialisation() {
    assert!(CacheManager::try_shared().is_none());
}

#[test]
#[should_panic(expected = "cache manager used before initialisation")]
fn test_shared_manager_panics() {
    let _ = CacheManager::shared();
}

#[test]
#[should_panic(expected = "cache manager used before initialisation")]
fn test_shared_context_panics() {
    let _context: CacheContext<i64> = CacheContext::from_shared();
}

#[test]
#[should_panic(expected = "cache manager used before initialisation")]
fn test_shared_attributes_panics() {
    let _ = CachedAttributes::from_shared();
}
