use super::{MessageStore, StorageError};
use crate::models::{Message, NewMessage, SyncStats, UpsertResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct UserMessages {
    /// Insertion order of provider ids.
    order: Vec<String>,
    rows: HashMap<String, Message>,
}

/// Process-local message store with the same semantics as the Postgres one.
#[derive(Default)]
pub struct MemoryMessageStore {
    users: RwLock<HashMap<String, UserMessages>>,
    unavailable: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a lost connection: every call fails until re-enabled.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[rocket::async_trait]
impl MessageStore for MemoryMessageStore {
    async fn upsert_messages(
        &self,
        user_id: &str,
        messages: &[NewMessage],
    ) -> Result<UpsertResult, StorageError> {
        self.check_available()?;

        let mut users = self.users.write();
        let bucket = users.entry(user_id.to_string()).or_default();
        let mut result = UpsertResult::default();

        for message in messages {
            if bucket.rows.contains_key(&message.provider_message_id) {
                result.skipped_duplicate_count += 1;
                continue;
            }

            let row = Message::from_new(user_id, message.clone(), Utc::now());
            bucket.order.push(row.provider_message_id.clone());
            bucket.rows.insert(row.provider_message_id.clone(), row);
            result.inserted_count += 1;
        }

        Ok(result)
    }

    async fn known_ids(
        &self,
        user_id: &str,
        provider_message_ids: &[String],
    ) -> Result<HashSet<String>, StorageError> {
        self.check_available()?;

        let users = self.users.read();
        let Some(bucket) = users.get(user_id) else {
            return Ok(HashSet::new());
        };

        Ok(provider_message_ids
            .iter()
            .filter(|id| bucket.rows.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn list_unprocessed(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.check_available()?;

        let users = self.users.read();
        let Some(bucket) = users.get(user_id) else {
            return Ok(Vec::new());
        };

        Ok(bucket
            .order
            .iter()
            .filter_map(|id| bucket.rows.get(id))
            .filter(|row| !row.processed)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_processed(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<(), StorageError> {
        self.check_available()?;

        let mut users = self.users.write();
        if let Some(row) = users
            .get_mut(user_id)
            .and_then(|bucket| bucket.rows.get_mut(provider_message_id))
        {
            if !row.processed {
                row.processed = true;
                row.embedded_at = Some(Utc::now());
            }
        }

        Ok(())
    }

    async fn reset_processed(&self, user_id: &str) -> Result<u64, StorageError> {
        self.check_available()?;

        let mut users = self.users.write();
        let Some(bucket) = users.get_mut(user_id) else {
            return Ok(0);
        };

        let mut reset = 0;
        for row in bucket.rows.values_mut().filter(|row| row.processed) {
            row.processed = false;
            row.embedded_at = None;
            reset += 1;
        }
        Ok(reset)
    }

    async fn get_message(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>, StorageError> {
        self.check_available()?;

        Ok(self
            .users
            .read()
            .get(user_id)
            .and_then(|bucket| bucket.rows.get(provider_message_id))
            .cloned())
    }

    async fn compute_stats(&self, user_id: &str) -> Result<SyncStats, StorageError> {
        self.check_available()?;

        let users = self.users.read();
        let Some(bucket) = users.get(user_id) else {
            return Ok(SyncStats::default());
        };

        let total = bucket.rows.len() as i64;
        let processed = bucket.rows.values().filter(|row| row.processed).count() as i64;

        Ok(SyncStats {
            total_emails_count: total,
            processed_emails_count: processed,
            unprocessed_emails_count: total - processed,
            last_sync_date: bucket.rows.values().map(|row| row.created_at).max(),
        })
    }

    async fn clear_all(&self, user_id: &str) -> Result<u64, StorageError> {
        self.check_available()?;

        Ok(self
            .users
            .write()
            .remove(user_id)
            .map(|bucket| bucket.rows.len() as u64)
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str) -> NewMessage {
        NewMessage {
            provider_message_id: id.to_string(),
            subject: format!("subject {id}"),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn duplicate_ids_are_skipped_first_write_wins() {
        let store = MemoryMessageStore::new();
        let first = store
            .upsert_messages("u1", &[message("m1"), message("m2")])
            .await
            .unwrap();
        assert_eq!(first.inserted_count, 2);

        let mut replacement = message("m1");
        replacement.subject = "changed".to_string();
        let second = store
            .upsert_messages("u1", &[replacement, message("m3"), message("m3")])
            .await
            .unwrap();
        assert_eq!(second.inserted_count, 1);
        assert_eq!(second.skipped_duplicate_count, 2);

        let stored = store.get_message("u1", "m1").await.unwrap().unwrap();
        assert_eq!(stored.subject, "subject m1");
        assert_eq!(store.compute_stats("u1").await.unwrap().total_emails_count, 3);
    }

    #[tokio::test]
    async fn unprocessed_rows_come_back_oldest_first() {
        let store = MemoryMessageStore::new();
        store
            .upsert_messages("u1", &[message("a"), message("b"), message("c")])
            .await
            .unwrap();
        store.mark_processed("u1", "a").await.unwrap();

        let ids: Vec<String> = store
            .list_unprocessed("u1", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|row| row.provider_message_id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "c".to_string()]);

        let limited = store.list_unprocessed("u1", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].provider_message_id, "b");
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent() {
        let store = MemoryMessageStore::new();
        store.upsert_messages("u1", &[message("a")]).await.unwrap();
        store.mark_processed("u1", "a").await.unwrap();
        let first = store.get_message("u1", "a").await.unwrap().unwrap();

        store.mark_processed("u1", "a").await.unwrap();
        let second = store.get_message("u1", "a").await.unwrap().unwrap();

        assert!(second.processed);
        assert_eq!(first.embedded_at, second.embedded_at);
    }

    #[tokio::test]
    async fn reset_processed_requeues_embedded_rows() {
        let store = MemoryMessageStore::new();
        store
            .upsert_messages("u1", &[message("a"), message("b")])
            .await
            .unwrap();
        store.mark_processed("u1", "a").await.unwrap();

        assert_eq!(store.reset_processed("u1").await.unwrap(), 1);
        let stats = store.compute_stats("u1").await.unwrap();
        assert_eq!(stats.unprocessed_emails_count, 2);
        assert!(store.get_message("u1", "a").await.unwrap().unwrap().embedded_at.is_none());
    }

    #[tokio::test]
    async fn users_are_isolated_and_clear_is_scoped() {
        let store = MemoryMessageStore::new();
        store.upsert_messages("u1", &[message("a")]).await.unwrap();
        store.upsert_messages("u2", &[message("a")]).await.unwrap();

        assert_eq!(store.clear_all("u1").await.unwrap(), 1);
        assert_eq!(store.compute_stats("u1").await.unwrap(), SyncStats::default());
        assert_eq!(store.compute_stats("u2").await.unwrap().total_emails_count, 1);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryMessageStore::new();
        store.set_unavailable(true);
        let err = store.upsert_messages("u1", &[message("a")]).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
    }
}
