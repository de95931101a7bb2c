use serde::de::DeserializeOwned;
use serde::Serialize;

/// Wire message with automatic type name generation and schema hashing.
///
/// This trait is automatically implemented for all types that are
/// `Serialize + DeserializeOwned + Send + Sync + 'static`, so every
/// flowdeck wire type (snapshots, watch events, reset requests) can be
/// wrapped in a [`crate::NetworkPacket`] without any per-type impl.
///
/// The type name is generated from `std::any::type_name()` and cached for
/// performance. The schema hash is computed from the short type name
/// (without module path) so it survives module refactoring.
pub trait FlowdeckMessage: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the full type name for this message type (includes module path).
    ///
    /// Example: `"flowdeck_common::positions::WatchEvent"`
    fn type_name() -> &'static str {
        use std::any::{TypeId, type_name};
        use std::collections::HashMap;
        use std::sync::{Mutex, OnceLock};

        static CACHE: OnceLock<Mutex<HashMap<TypeId, &'static str>>> = OnceLock::new();
        let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

        let type_id = TypeId::of::<Self>();

        // Fast path: check cache without holding lock long
        {
            let cache_guard = cache.lock().unwrap();
            if let Some(&name) = cache_guard.get(&type_id) {
                return name;
            }
        }

        // Slow path: generate and cache
        let full_type_name = type_name::<Self>();
        let static_name = Box::leak(full_type_name.to_string().into_boxed_str());

        {
            let mut cache_guard = cache.lock().unwrap();
            cache_guard.insert(type_id, static_name);
        }

        static_name
    }

    /// Returns the short type name (just the struct name, no module path).
    ///
    /// Example: `"WatchEvent"` (from `"flowdeck_common::positions::WatchEvent"`)
    fn short_name() -> &'static str {
        use std::any::TypeId;
        use std::collections::HashMap;
        use std::sync::{Mutex, OnceLock};

        static CACHE: OnceLock<Mutex<HashMap<TypeId, &'static str>>> = OnceLock::new();
        let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

        let type_id = TypeId::of::<Self>();

        {
            let cache_guard = cache.lock().unwrap();
            if let Some(&name) = cache_guard.get(&type_id) {
                return name;
            }
        }

        let full_name = Self::type_name();
        let short = full_name.rsplit("::").next().unwrap_or(full_name);
        let static_name = Box::leak(short.to_string().into_boxed_str());

        {
            let mut cache_guard = cache.lock().unwrap();
            cache_guard.insert(type_id, static_name);
        }

        static_name
    }

    /// Returns a hash of the message schema.
    ///
    /// The hash is computed from the short type name (without module path).
    /// Two distinct types with the same short name will collide; a transport
    /// that multiplexes both in one binary must catch that at registration.
    fn schema_hash() -> u64 {
        use std::any::TypeId;
        use std::collections::HashMap;
        use std::hash::{Hash, Hasher};
        use std::sync::{Mutex, OnceLock};

        static CACHE: OnceLock<Mutex<HashMap<TypeId, u64>>> = OnceLock::new();
        let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

        let type_id = TypeId::of::<Self>();

        {
            let cache_guard = cache.lock().unwrap();
            if let Some(&hash) = cache_guard.get(&type_id) {
                return hash;
            }
        }

        let short = Self::short_name();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        short.hash(&mut hasher);
        let hash = hasher.finish();

        {
            let mut cache_guard = cache.lock().unwrap();
            cache_guard.insert(type_id, hash);
        }

        hash
    }
}

// Blanket implementation for all serializable types
impl<T> FlowdeckMessage for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
