//! Profile directory - cached display-name resolution

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::debug;
use uniconsult_backend::{Backend, Profile};

/// Read-only view over the `profiles` table with a small in-memory cache.
/// Lookups are batched by distinct id so resolving a message list costs one
/// backend round-trip, not one per message.
pub struct ProfileDirectory {
    backend: Arc<dyn Backend>,
    cache: Mutex<HashMap<String, Profile>>,
}

impl ProfileDirectory {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Display names for the given ids. Unknown ids are simply absent from
    /// the result; callers fall back to the raw id.
    pub async fn names_for(&self, ids: &[String]) -> Result<HashMap<String, String>> {
        let distinct: HashSet<&String> = ids.iter().collect();
        let mut names = HashMap::new();
        let mut missing = Vec::new();

        {
            let cache = self.cache.lock().await;
            for id in distinct {
                match cache.get(id) {
                    Some(profile) => {
                        names.insert(id.clone(), profile.full_name.clone());
                    }
                    None => missing.push(id.clone()),
                }
            }
        }

        if !missing.is_empty() {
            debug!(count = missing.len(), "fetching profiles from backend");
            let fetched = self.backend.profiles_by_ids(&missing).await?;
            let mut cache = self.cache.lock().await;
            for profile in fetched {
                names.insert(profile.id.clone(), profile.full_name.clone());
                cache.insert(profile.id.clone(), profile);
            }
        }

        Ok(names)
    }

    /// Display name for a single id.
    pub async fn name_for(&self, id: &str) -> Result<Option<String>> {
        let key = id.to_string();
        let names = self.names_for(std::slice::from_ref(&key)).await?;
        Ok(names.get(id).cloned())
    }

    /// Merge a profile pushed by the change feed into the cache.
    pub async fn note(&self, profile: Profile) {
        let mut cache = self.cache.lock().await;
        cache.insert(profile.id.clone(), profile);
    }

    /// Approved students of a teacher, for starting new conversations.
    pub async fn approved_students(&self, teacher_id: &str) -> Result<Vec<Profile>> {
        let students = self.backend.approved_students_of(teacher_id).await?;
        let mut cache = self.cache.lock().await;
        for student in &students {
            cache.insert(student.id.clone(), student.clone());
        }
        Ok(students)
    }
}
