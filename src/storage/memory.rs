use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use super::{Page, Record, RecordStore, ReloadListener};
use crate::error::{GatewayError, Result};

/// In-process record store backed by an ordered map
pub struct MemoryStore<T: Record> {
    name: String,
    rows: RwLock<BTreeMap<String, T>>,
    listeners: RwLock<Vec<Arc<dyn ReloadListener<T>>>>,
}

impl<T: Record> MemoryStore<T> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rows: RwLock::new(BTreeMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn notify_reload(&self, record: &T) {
        // listeners run outside the row lock so they can read back
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_reload(record);
        }
    }

    fn notify_delete(&self, id: &str) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_delete(id);
        }
    }
}

fn paginate<T>(items: Vec<T>, offset: usize, limit: usize) -> Page<T> {
    let total = items.len();
    let items = items.into_iter().skip(offset).take(limit).collect();
    Page { items, total }
}

impl<T: Record> RecordStore<T> for MemoryStore<T> {
    fn get(&self, id: &str) -> Result<Option<T>> {
        Ok(self.rows.read().get(id).cloned())
    }

    fn put(&self, record: T) -> Result<()> {
        self.rows
            .write()
            .insert(record.id().to_string(), record.clone());
        debug!("[{}] put {}", self.name, record.id());
        self.notify_reload(&record);
        Ok(())
    }

    fn insert(&self, record: T) -> Result<()> {
        {
            let mut rows = self.rows.write();
            if rows.contains_key(record.id()) {
                return Err(GatewayError::AlreadyExists(format!(
                    "{} already has id {}",
                    self.name,
                    record.id()
                )));
            }
            rows.insert(record.id().to_string(), record.clone());
        }
        self.notify_reload(&record);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let removed = self.rows.write().remove(id).is_some();
        if removed {
            self.notify_delete(id);
        }
        Ok(removed)
    }

    fn starts_with(&self, prefix: &str, offset: usize, limit: usize) -> Result<Page<T>> {
        let rows = self.rows.read();
        let matched: Vec<T> = rows
            .range(prefix.to_string()..)
            .take_while(|(id, _)| id.starts_with(prefix))
            .map(|(_, record)| record.clone())
            .collect();
        Ok(paginate(matched, offset, limit))
    }

    fn search(
        &self,
        begin: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        offset: usize,
        limit: usize,
    ) -> Result<Page<T>> {
        let mut matched: Vec<T> = self
            .rows
            .read()
            .values()
            .filter(|r| begin.map_or(true, |b| r.update_time() >= b))
            .filter(|r| end.map_or(true, |e| r.update_time() < e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            a.update_time()
                .cmp(&b.update_time())
                .then_with(|| a.id().cmp(b.id()))
        });
        Ok(paginate(matched, offset, limit))
    }

    fn subscribe(&self, listener: Arc<dyn ReloadListener<T>>) {
        self.listeners.write().push(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parking_lot::Mutex;

    #[derive(Clone, Debug, PartialEq)]
    struct Row {
        id: String,
        at: DateTime<Utc>,
    }

    impl Record for Row {
        fn id(&self) -> &str {
            &self.id
        }
        fn update_time(&self) -> DateTime<Utc> {
            self.at
        }
    }

    fn row(id: &str, at: DateTime<Utc>) -> Row {
        Row {
            id: id.to_string(),
            at,
        }
    }

    #[derive(Default)]
    struct Recorder {
        reloaded: Mutex<Vec<String>>,
        deleted: Mutex<Vec<String>>,
    }

    impl ReloadListener<Row> for Recorder {
        fn on_reload(&self, record: &Row) {
            self.reloaded.lock().push(record.id.clone());
        }
        fn on_delete(&self, id: &str) {
            self.deleted.lock().push(id.to_string());
        }
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let store = MemoryStore::new("rows");
        let now = Utc::now();
        store.insert(row("a", now)).unwrap();
        let err = store.insert(row("a", now)).unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyExists(_)));
        // upsert still works
        store.put(row("a", now)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_starts_with_pages() {
        let store = MemoryStore::new("rows");
        let now = Utc::now();
        for id in ["ak.1.a", "ak.1.b", "ak.2.a", "mk.1", "ak.1.c"] {
            store.put(row(id, now)).unwrap();
        }
        let page = store.starts_with("ak.1.", 0, 2).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(
            page.items.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["ak.1.a", "ak.1.b"]
        );
        let page = store.starts_with("ak.1.", 2, 2).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "ak.1.c");
    }

    #[test]
    fn test_search_time_range() {
        let store = MemoryStore::new("rows");
        let t0 = Utc::now();
        store.put(row("c", t0 + Duration::seconds(2))).unwrap();
        store.put(row("a", t0)).unwrap();
        store.put(row("b", t0 + Duration::seconds(1))).unwrap();

        let all = store.search(None, None, 0, 10).unwrap();
        assert_eq!(
            all.items.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        let ranged = store
            .search(Some(t0 + Duration::seconds(1)), Some(t0 + Duration::seconds(2)), 0, 10)
            .unwrap();
        assert_eq!(ranged.total, 1);
        assert_eq!(ranged.items[0].id, "b");
    }

    #[test]
    fn test_listeners_notified() {
        let store = MemoryStore::new("rows");
        let recorder = Arc::new(Recorder::default());
        store.subscribe(recorder.clone());
        store.put(row("x", Utc::now())).unwrap();
        assert!(store.delete("x").unwrap());
        assert!(!store.delete("x").unwrap());
        assert_eq!(*recorder.reloaded.lock(), vec!["x".to_string()]);
        assert_eq!(*recorder.deleted.lock(), vec!["x".to_string()]);
    }
}
