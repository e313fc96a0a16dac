//! In-process key-value store.

use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use latensee_core::{StoreClient, StoreError};

/// In-memory store speaking a small subset of the Redis command set.
///
/// Useful for dry runs and tests without a running server.
/// Data is lost when the connection is closed.
pub struct MemoryStore {
    data: RwLock<HashMap<String, String>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Read a key directly.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .ok()
            .and_then(|data| data.get(key).cloned())
    }

    fn run(&self, name: &str, args: &[String]) -> Result<(), StoreError> {
        let internal = |e: &dyn std::fmt::Display| StoreError::Command(format!("ERR {e}"));

        match (name, args) {
            ("PING", [] | [_]) => Ok(()),
            ("ECHO", [_]) => Ok(()),
            ("GET", [key]) | ("EXISTS", [key, ..]) => {
                let _found = self
                    .data
                    .read()
                    .map_err(|e| internal(&e))?
                    .contains_key(key);
                Ok(())
            }
            ("SET", [key, value, ..]) => {
                self.data
                    .write()
                    .map_err(|e| internal(&e))?
                    .insert(key.clone(), value.clone());
                Ok(())
            }
            ("DEL", [_, ..]) => {
                let mut data = self.data.write().map_err(|e| internal(&e))?;
                for key in args {
                    data.remove(key);
                }
                Ok(())
            }
            ("INCR", [key]) => {
                let mut data = self.data.write().map_err(|e| internal(&e))?;
                let current = match data.get(key) {
                    Some(value) => value.parse::<i64>().map_err(|_| {
                        StoreError::Command(
                            "ERR value is not an integer or out of range".to_string(),
                        )
                    })?,
                    None => 0,
                };
                let next = current.checked_add(1).ok_or_else(|| {
                    StoreError::Command("ERR increment or decrement would overflow".to_string())
                })?;
                data.insert(key.clone(), next.to_string());
                Ok(())
            }
            ("PING" | "ECHO" | "GET" | "EXISTS" | "SET" | "DEL" | "INCR", _) => {
                Err(StoreError::Command(format!(
                    "ERR wrong number of arguments for '{}' command",
                    name.to_ascii_lowercase()
                )))
            }
            _ => Err(StoreError::Command(format!("ERR unknown command '{name}'"))),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreClient for MemoryStore {
    async fn execute(&self, args: &[String]) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let Some((name, rest)) = args.split_first() else {
            return Err(StoreError::Command("ERR empty command".to_string()));
        };

        self.run(&name.to_ascii_uppercase(), rest)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut data) = self.data.write() {
            data.clear();
        }
    }
}
