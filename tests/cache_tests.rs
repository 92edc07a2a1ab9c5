use bevy_heightmap_relief::{CacheKey, ContentCache, Error, GeometryStyle};

fn key(name: &str) -> CacheKey {
    CacheKey::heightmap(name)
}

#[test]
fn set_then_get() {
    let mut cache = ContentCache::new();
    assert!(cache.is_empty());

    cache.set(key("a.png"), vec![1u8, 2, 3]).unwrap();
    assert!(cache.has(&key("a.png")));
    assert_eq!(cache.get(&key("a.png")).unwrap(), &vec![1, 2, 3]);
    assert_eq!(cache.ref_count(&key("a.png")), Some(1));
    assert_eq!(cache.len(), 1);
}

#[test]
fn entry_lives_while_refcount_is_positive() {
    let mut cache = ContentCache::new();
    let k = key("shared.png");
    cache.set(k.clone(), "pixels").unwrap();
    assert_eq!(cache.add_ref(&k).unwrap(), 2);
    assert_eq!(cache.add_ref(&k).unwrap(), 3);

    assert_eq!(cache.release(&k).unwrap(), None);
    assert_eq!(cache.release(&k).unwrap(), None);
    assert!(cache.has(&k));
    assert_eq!(cache.get(&k).unwrap(), &"pixels");

    // Last reference hands the payload back for disposal.
    assert_eq!(cache.release(&k).unwrap(), Some("pixels"));
    assert!(!cache.has(&k));
    assert!(cache.is_empty());
}

#[test]
fn double_release_is_reported() {
    let mut cache = ContentCache::new();
    let k = key("once.png");
    cache.set(k.clone(), 7).unwrap();
    cache.release(&k).unwrap();
    assert_eq!(cache.release(&k).unwrap_err(), Error::CacheMiss { key: k });
}

#[test]
fn set_on_present_key_collides() {
    let mut cache = ContentCache::new();
    let k = key("a.png");
    cache.set(k.clone(), 1).unwrap();
    assert_eq!(
        cache.set(k.clone(), 2).unwrap_err(),
        Error::KeyCollision { key: k.clone() }
    );
    // The first entry is untouched.
    assert_eq!(cache.get(&k).unwrap(), &1);
    assert_eq!(cache.ref_count(&k), Some(1));
}

#[test]
fn unknown_keys_are_misses() {
    let mut cache: ContentCache<u32> = ContentCache::new();
    let k = key("missing.png");
    assert!(!cache.has(&k));
    assert!(matches!(cache.get(&k), Err(Error::CacheMiss { .. })));
    assert!(matches!(cache.add_ref(&k), Err(Error::CacheMiss { .. })));
    assert!(matches!(cache.release(&k), Err(Error::CacheMiss { .. })));
    assert_eq!(cache.ref_count(&k), None);
}

#[test]
fn geometry_keys_are_deterministic() {
    let a = CacheKey::geometry(&["a.png", "b.png", "", ""], 200.0, GeometryStyle::Smooth);
    let b = CacheKey::geometry(
        &["a.png".to_string(), "b.png".to_string(), String::new(), String::new()],
        200.0,
        GeometryStyle::Smooth,
    );
    assert_eq!(a, b);
}

#[test]
fn geometry_keys_separate_every_input() {
    let sources = ["a.png", "", "", ""];
    let base = CacheKey::geometry(&sources, 200.0, GeometryStyle::Smooth);
    assert_ne!(base, CacheKey::geometry(&sources, 150.0, GeometryStyle::Smooth));
    assert_ne!(base, CacheKey::geometry(&sources, 200.0, GeometryStyle::Float));
    assert_ne!(
        base,
        CacheKey::geometry(&["", "a.png", "", ""], 200.0, GeometryStyle::Smooth)
    );
    assert_ne!(base, CacheKey::heightmap("a.png"));
}

#[test]
fn geometry_keys_resist_delimiter_injection() {
    let split = CacheKey::geometry(&["a", "1:b", "", ""], 1.0, GeometryStyle::Block);
    let joined = CacheKey::geometry(&["a|1:b", "", "", ""], 1.0, GeometryStyle::Block);
    assert_ne!(split, joined);
}

#[test]
fn negative_zero_max_height_keys_like_zero() {
    let sources = ["a.png"];
    assert_eq!(
        CacheKey::geometry(&sources, 0.0, GeometryStyle::Smooth),
        CacheKey::geometry(&sources, -0.0, GeometryStyle::Smooth)
    );
}
