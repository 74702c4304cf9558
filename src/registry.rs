//! Named constructor registry.
//!
//! Maps a string discriminant to a constructor function. Names are unique
//! while registered and may be reused after they are unregistered. Used at
//! startup to pick implementations from configuration, never on a streaming
//! path.

use std::collections::BTreeMap;

/// Errors from registry lookups and updates. Both carry the offending name.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("constructor already registered: {0}")]
    Duplicate(String),

    #[error("no constructor registered for: {0}")]
    Unknown(String),
}

type Constructor<A, T> = Box<dyn Fn(A) -> T + Send + Sync>;

/// Constructors taking `A` and producing `T`, keyed by name.
pub struct Registry<A, T> {
    constructors: BTreeMap<String, Constructor<A, T>>,
}

impl<A, T> Registry<A, T> {
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Binds `name` to `constructor`. Fails if the name is already bound.
    pub fn register<F>(&mut self, name: &str, constructor: F) -> Result<(), RegistryError>
    where
        F: Fn(A) -> T + Send + Sync + 'static,
    {
        if self.constructors.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.constructors
            .insert(name.to_string(), Box::new(constructor));
        Ok(())
    }

    /// Removes the binding for `name`. Fails if nothing is bound.
    pub fn unregister(&mut self, name: &str) -> Result<(), RegistryError> {
        self.constructors
            .remove(name)
            .map(drop)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))
    }

    /// Runs the constructor bound to `name`.
    pub fn create(&self, name: &str, args: A) -> Result<T, RegistryError> {
        let constructor = self
            .constructors
            .get(name)
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?;
        Ok(constructor(args))
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }
}

impl<A, T> Default for Registry<A, T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister() {
        let mut registry: Registry<(), u32> = Registry::new();
        registry.register("foo", |()| 1).unwrap();
        registry.register("bar", |()| 2).unwrap();

        registry.unregister("foo").unwrap();
        registry.unregister("bar").unwrap();

        // Freed names can be bound again.
        registry.register("foo", |()| 3).unwrap();
        registry.register("bar", |()| 4).unwrap();
        assert_eq!(registry.create("foo", ()), Ok(3));
    }

    #[test]
    fn register_duplicate_fails() {
        let mut registry: Registry<(), u32> = Registry::new();
        registry.register("foo", |()| 1).unwrap();
        registry.register("bar", |()| 2).unwrap();

        let err = registry.register("foo", |()| 3).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("foo".into()));
        assert!(err.to_string().contains("foo"));
        assert_eq!(registry.create("foo", ()), Ok(1));
    }

    #[test]
    fn unregister_unknown_fails() {
        let mut registry: Registry<(), u32> = Registry::new();
        let err = registry.unregister("foo").unwrap_err();
        assert_eq!(err, RegistryError::Unknown("foo".into()));
    }

    #[test]
    fn create_runs_bound_constructor() {
        let mut registry: Registry<&str, String> = Registry::new();
        registry.register("upper", str::to_uppercase).unwrap();
        registry.register("lower", str::to_lowercase).unwrap();

        assert_eq!(registry.create("upper", "Foo"), Ok("FOO".to_string()));
        assert_eq!(registry.create("lower", "Foo"), Ok("foo".to_string()));
    }

    #[test]
    fn create_unregistered_fails() {
        let registry: Registry<(), u32> = Registry::new();
        let err = registry.create("foo", ()).unwrap_err();
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn names_empty_then_sorted() {
        let mut registry: Registry<(), u32> = Registry::new();
        assert!(registry.names().is_empty());

        registry.register("zeta", |()| 0).unwrap();
        registry.register("alpha", |()| 0).unwrap();
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}
