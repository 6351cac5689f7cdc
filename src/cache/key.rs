//! Cache key generation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{QueryParams, Result};

/// Canonical identity of one operation + parameter combination.
///
/// The hash is the identity; the operation name rides along for logging and
/// targeted invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub operation: String,
}

impl CacheKey {
    pub fn new(hash: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            operation: operation.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// Derives deterministic cache keys from an operation identity and its
/// parameter mapping.
///
/// Object keys are sorted at every nesting level before hashing, so two
/// parameter maps with the same contents always produce the same key no
/// matter the insertion order, even when `serde_json`'s `preserve_order`
/// feature is active elsewhere in the dependency graph.
pub struct KeyGenerator {
    salt: Option<String>,
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespace all generated keys, so unrelated query sets sharing a
    /// [`CacheService`](super::CacheService) cannot collide.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn generate(&self, operation: &str, params: &QueryParams) -> Result<CacheKey> {
        let mut canonical = String::with_capacity(64);
        canonical.push_str("{\"operation\":");
        write_canonical(&Value::String(operation.to_string()), &mut canonical)?;
        canonical.push_str(",\"params\":");
        write_canonical(&Value::Object(params.clone()), &mut canonical)?;
        if let Some(ref salt) = self.salt {
            canonical.push_str(",\"salt\":");
            write_canonical(&Value::String(salt.clone()), &mut canonical)?;
        }
        canonical.push('}');

        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        let hash: String = hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect();
        Ok(CacheKey::new(hash, operation))
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// Emits JSON with object keys in lexicographic order at every level. Scalars
// and strings defer to serde_json so escaping stays identical to to_string.
fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out)?;
            }
            out.push(']');
        }
        other => out.push_str(&serde_json::to_string(other)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> QueryParams {
        match value {
            Value::Object(map) => map,
            _ => panic!("test params must be an object"),
        }
    }

    #[test]
    fn test_key_independent_of_insertion_order() {
        let generator = KeyGenerator::new();
        let mut a = QueryParams::new();
        a.insert("page".into(), json!(2));
        a.insert("filter".into(), json!({"status": "open", "assignee": "kim"}));
        let mut b = QueryParams::new();
        b.insert("filter".into(), json!({"assignee": "kim", "status": "open"}));
        b.insert("page".into(), json!(2));

        let ka = generator.generate("list_issues", &a).unwrap();
        let kb = generator.generate("list_issues", &b).unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn test_key_differs_on_structure() {
        let generator = KeyGenerator::new();
        let a = params(json!({"ids": [1, 2]}));
        let b = params(json!({"ids": [2, 1]}));
        let c = params(json!({"ids": [1, 2], "extra": null}));

        let ka = generator.generate("fetch", &a).unwrap();
        assert_ne!(ka, generator.generate("fetch", &b).unwrap());
        assert_ne!(ka, generator.generate("fetch", &c).unwrap());
        assert_ne!(ka, generator.generate("fetch_other", &a).unwrap());
    }

    #[test]
    fn test_salt_namespaces_keys() {
        let plain = KeyGenerator::new();
        let salted = KeyGenerator::new().with_salt("tenant-a");
        let p = params(json!({"q": "rust"}));

        assert_ne!(
            plain.generate("search", &p).unwrap(),
            salted.generate("search", &p).unwrap()
        );
    }

    #[test]
    fn test_display_is_hash() {
        let key = CacheKey::new("abc123", "fetch");
        assert_eq!(key.to_string(), "abc123");
        assert_eq!(key.as_str(), "abc123");
    }
}
