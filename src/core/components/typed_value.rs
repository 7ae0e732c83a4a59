use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::core::error::{SimError, SimResult};

trait CloneAny: Any + Send + Sync {
    fn clone_box(&self) -> Box<dyn CloneAny>;
    fn as_any(&self) -> &dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync + Clone> CloneAny for T {
    fn clone_box(&self) -> Box<dyn CloneAny> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

/// Type-erased but type-safe container for component values
pub struct TypedValue {
    data: Box<dyn CloneAny>,
    type_name: &'static str,
    type_id: TypeId,
}

impl TypedValue {
    /// Create a new typed value
    pub fn new<T: Send + Sync + Clone + 'static>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            data: Box::new(value),
        }
    }

    /// Get a reference to the contained value
    pub fn get<T: 'static>(&self) -> SimResult<&T> {
        self.data
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| self.mismatch::<T>())
    }

    /// Consume the typed value and return the contained value
    pub fn into_inner<T: 'static>(self) -> SimResult<T> {
        let err = self.mismatch::<T>();
        self.data
            .into_any()
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| err)
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn is_type<T: 'static>(&self) -> bool {
        TypeId::of::<T>() == self.type_id
    }

    fn mismatch<T>(&self) -> SimError {
        SimError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            found: self.type_name,
        }
    }
}

impl Clone for TypedValue {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone_box(),
            type_name: self.type_name,
            type_id: self.type_id,
        }
    }
}

impl std::fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypedValue<{}>", self.type_name)
    }
}

/// Named values attached to one component
#[derive(Debug, Clone, Default)]
pub struct ValueStore {
    values: HashMap<String, TypedValue>,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous value
    pub fn put<T: Send + Sync + Clone + 'static>(&mut self, key: impl Into<String>, value: T) -> Option<TypedValue> {
        self.values.insert(key.into(), TypedValue::new(value))
    }

    /// Clone of the value under `key`; `Ok(None)` if absent, an error if of another type
    pub fn get<T: Clone + 'static>(&self, key: &str) -> SimResult<Option<T>> {
        match self.values.get(key) {
            Some(value) => value.get::<T>().map(|v| Some(v.clone())),
            None => Ok(None),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<TypedValue> {
        self.values.remove(key)
    }

    /// Stored keys in sorted order
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_value_basic() {
        let value = TypedValue::new(42i64);
        assert_eq!(value.get::<i64>().unwrap(), &42);
        assert!(value.is_type::<i64>());
        assert!(!value.is_type::<String>());
        assert_eq!(value.clone().into_inner::<i64>().unwrap(), 42);
    }

    #[test]
    fn test_typed_value_type_mismatch() {
        let value = TypedValue::new(42i64);
        match value.get::<String>() {
            Err(SimError::TypeMismatch { found, .. }) => assert_eq!(found, "i64"),
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_value_store() {
        let mut store = ValueStore::new();
        assert!(store.put("setup", 2.5f64).is_none());
        store.put("label", "lathe".to_string());
        assert_eq!(store.get::<f64>("setup").unwrap(), Some(2.5));
        assert_eq!(store.get::<f64>("missing").unwrap(), None);
        assert!(store.get::<u32>("label").is_err());
        assert_eq!(store.keys(), vec!["label".to_string(), "setup".to_string()]);
        assert!(store.remove("label").is_some());
        assert_eq!(store.len(), 1);
    }
}
