use crate::collab::{ReportStore, Versioned, WriteCondition};
use crate::error::StoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-local `ReportStore` with the same versioning rules as the durable store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<(String, String), Versioned>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, index: &str) -> usize {
        self.lock().keys().filter(|(i, _)| i == index).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Versioned>> {
        self.docs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ReportStore for MemoryStore {
    fn exists(&self, index: &str, id: &str) -> Result<bool, StoreError> {
        Ok(self.lock().contains_key(&(index.to_string(), id.to_string())))
    }

    fn get(&self, index: &str, id: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.lock().get(&(index.to_string(), id.to_string())).cloned())
    }

    fn put(&self, index: &str, id: &str, document: &Value, condition: WriteCondition) -> Result<u64, StoreError> {
        let mut docs = self.lock();
        let key = (index.to_string(), id.to_string());
        let current = docs.get(&key).map(|v| v.version);
        let allowed = match (condition, current) {
            (WriteCondition::Any, _) => true,
            (WriteCondition::Absent, None) => true,
            (WriteCondition::Version(expected), Some(v)) => expected == v,
            _ => false,
        };
        if !allowed {
            return Err(StoreError::Conflict { index: index.to_string(), id: id.to_string() });
        }
        let version = current.unwrap_or(0) + 1;
        docs.insert(key, Versioned { version, document: document.clone() });
        Ok(version)
    }

    fn bulk_put(&self, index: &str, documents: &[(String, Value)]) -> Vec<Result<u64, StoreError>> {
        documents
            .iter()
            .map(|(id, doc)| self.put(index, id, doc, WriteCondition::Any))
            .collect()
    }

    fn list(&self, index: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut docs: Vec<(String, Value)> =
            self.lock().iter().filter(|((i, _), _)| i == index).map(|((_, id), v)| (id.clone(), v.document.clone())).collect();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn versioned_writes() {
        let s = MemoryStore::new();
        assert_eq!(s.put("domains", "a", &json!({"n": 1}), WriteCondition::Absent).unwrap(), 1);
        assert!(matches!(s.put("domains", "a", &json!({}), WriteCondition::Absent), Err(StoreError::Conflict { .. })));
        assert_eq!(s.put("domains", "a", &json!({"n": 2}), WriteCondition::Version(1)).unwrap(), 2);
        assert!(matches!(s.put("domains", "a", &json!({}), WriteCondition::Version(1)), Err(StoreError::Conflict { .. })));
        assert!(matches!(s.put("domains", "b", &json!({}), WriteCondition::Version(1)), Err(StoreError::Conflict { .. })));
        let got = s.get("domains", "a").unwrap().unwrap();
        assert_eq!(got.version, 2);
        assert_eq!(got.document["n"], 2);
    }

    #[test]
    fn bulk_put_reports_per_item() {
        let s = MemoryStore::new();
        let docs = vec![("x".to_string(), json!(1)), ("y".to_string(), json!(2))];
        let res = s.bulk_put("resources", &docs);
        assert!(res.iter().all(|r| r.is_ok()));
        assert_eq!(s.len("resources"), 2);
        assert!(s.exists("resources", "x").unwrap());
        assert!(!s.exists("scans", "x").unwrap());
    }

    #[test]
    fn list_is_per_index_and_sorted() {
        let s = MemoryStore::new();
        s.put("feeds", "b", &json!({"url": "b.test"}), WriteCondition::Any).unwrap();
        s.put("feeds", "a", &json!({"url": "a.test"}), WriteCondition::Any).unwrap();
        s.put("scans", "c", &json!({}), WriteCondition::Any).unwrap();
        let ids: Vec<_> = s.list("feeds").unwrap().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(s.list("domains").unwrap().is_empty());
    }
}
