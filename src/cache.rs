use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, warn};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

use crate::entity::comment;
use crate::error::{db_error, AppError};

const ENTRY_TTL: Duration = Duration::from_secs(10 * 60);
const MAX_ENTRIES: usize = 1024;

struct Entry {
    rows: Arc<Vec<comment::Model>>,
    fetched_at: Instant,
}

/// Per-post snapshot of comment rows. Entries are dropped whenever a comment
/// of that post is written and expire after [`ENTRY_TTL`] regardless.
///
/// Every invalidation bumps a generation counter. A fill only lands if no
/// invalidation happened while its query was in flight, so a snapshot taken
/// before a write can never be stored after it.
pub struct CommentCache {
    entries: RwLock<HashMap<i32, Entry>>,
    generation: AtomicU64,
    ttl: Duration,
    capacity: usize,
}

impl Default for CommentCache {
    fn default() -> Self {
        Self::with_limits(ENTRY_TTL, MAX_ENTRIES)
    }
}

impl CommentCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub async fn rows_for_post(
        &self,
        db: &DatabaseConnection,
        post_id: i32,
    ) -> Result<Arc<Vec<comment::Model>>, AppError> {
        if let Some(rows) = self.get(post_id) {
            return Ok(rows);
        }

        let ticket = self.ticket();
        let rows = comment::Entity::find()
            .filter(comment::Column::PostId.eq(post_id))
            .order_by_asc(comment::Column::Created)
            .order_by_asc(comment::Column::Id)
            .all(db)
            .await
            .map_err(db_error)?;
        let rows = Arc::new(rows);
        self.store(post_id, ticket, rows.clone());
        Ok(rows)
    }

    pub fn invalidate(&self, post_id: i32) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut map) = self.entries.write() {
            if map.remove(&post_id).is_some() {
                debug!("comment cache invalidated post={}", post_id);
            }
        }
    }

    fn ticket(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Stores `rows` unless an invalidation happened since `ticket` was taken.
    fn store(&self, post_id: i32, ticket: u64, rows: Arc<Vec<comment::Model>>) -> bool {
        let mut map = match self.entries.write() {
            Ok(map) => map,
            Err(_) => {
                warn!("comment cache lock poisoned, serving uncached rows");
                return false;
            }
        };
        // checked under the write lock so a concurrent invalidate is ordered
        if self.ticket() != ticket {
            debug!("comment cache fill for post={} skipped, rows went stale", post_id);
            return false;
        }

        let now = Instant::now();
        if map.len() >= self.capacity {
            let ttl = self.ttl;
            map.retain(|_, e| now.duration_since(e.fetched_at) < ttl);
        }
        if map.len() >= self.capacity {
            let oldest = map.iter().min_by_key(|(_, e)| e.fetched_at).map(|(id, _)| *id);
            if let Some(id) = oldest {
                map.remove(&id);
            }
        }
        map.insert(post_id, Entry { rows, fetched_at: now });
        true
    }

    fn get(&self, post_id: i32) -> Option<Arc<Vec<comment::Model>>> {
        let map = self.entries.read().ok()?;
        let entry = map.get(&post_id)?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.rows.clone())
    }

    #[cfg(test)]
    pub fn is_cached(&self, post_id: i32) -> bool {
        self.get(post_id).is_some()
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }
}
