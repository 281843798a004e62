//! Store keys and key hashing.
//!
//! A key is any serializable value. Its hash is the compact JSON rendering of the
//! key with every object's fields in lexicographic order, so two keys that hold the
//! same fields in a different order address the same store.
//!
//! Keys JSON cannot represent, such as maps with tuple keys, are hashed from their
//! bincode encoding instead. That encoding follows the key's own iteration order,
//! so use ordered maps (`BTreeMap`) inside such keys.

use serde::Serialize;

/// A value usable as a store key.
///
/// Implemented for every `Serialize + Clone + Send + Sync + 'static` type. Keys
/// whose `Serialize` impl fails share one store per type.
pub trait StoreKey: Serialize + Clone + Send + Sync + 'static {
    /// Returns the deterministic hash used to index per-key stores.
    fn key_hash(&self) -> String {
        hash_key(self)
    }
}

impl<T> StoreKey for T where T: Serialize + Clone + Send + Sync + 'static {}

/// Hashes a key into its store index.
///
/// `serde_json::Value` keeps object fields in a sorted map, which is what makes the
/// output independent of field order.
pub fn hash_key<K: Serialize + ?Sized>(key: &K) -> String {
    let err = match serde_json::to_value(key) {
        Ok(value) => return value.to_string(),
        Err(err) => err,
    };
    tracing::debug!(error = %err, "store key is not representable as JSON");

    // JSON renderings never start with `<`.
    match bincode::serialize(key) {
        Ok(bytes) => format!("<bincode:{}>", hex::encode(bytes)),
        Err(err) => {
            tracing::warn!(error = %err, "store key is not serializable");
            format!("<unhashable:{}>", std::any::type_name::<K>())
        }
    }
}
