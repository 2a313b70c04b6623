//! `IndexedDB`-backed `PersistentStore`. Chosen over `localStorage` because
//! it alone supports a range scan by composite `(namespace, ts)` key
//! without loading the whole keyspace into memory first (see DESIGN.md for
//! the Open Question this resolves).
//!
//! IndexedDB's request API is entirely async and `PersistentStore`'s
//! methods are not, so this store keeps an in-memory mirror for the
//! synchronous reads/writes the trait demands and persists every mutation
//! to IndexedDB in the background via `wasm_bindgen_futures::spawn_local`.
//! `hydrate` loads whatever IndexedDB already holds into the mirror once,
//! at startup, before the store is handed to a `HistoryAdapter` — the same
//! warm-then-serve split the teacher's `storage.rs` uses for its own
//! localStorage-backed cache.

use crate::adapters::history::{InMemoryStore, PersistentStore};
use crate::error::{PubsubError, Result};
use crate::message::Message;
use js_sys::Promise;
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{IdbDatabase, IdbObjectStoreParameters, IdbTransactionMode};

const STORE_NAME: &str = "messages";
const DB_NAME: &str = "pubsub-mfe-history";
const DB_VERSION: u32 = 1;

fn record_key(namespace: &str, ts: u64, message_id: &str) -> String {
    format!("{namespace}:{ts:020}:{message_id}")
}

/// Opens (creating on first use) the database this adapter uses, wiring
/// `onupgradeneeded` to create the object store the first time a given
/// origin runs this code.
pub async fn open() -> Result<IdbDatabase> {
    let window = web_sys::window().ok_or_else(|| PubsubError::transport("no window available"))?;
    let factory = window
        .indexed_db()
        .map_err(|e| PubsubError::transport(format!("indexedDB unavailable: {e:?}")))?
        .ok_or_else(|| PubsubError::transport("indexedDB unavailable"))?;

    let open_request = factory
        .open_with_u32(DB_NAME, DB_VERSION)
        .map_err(|e| PubsubError::transport(format!("indexedDB.open failed: {e:?}")))?;

    let upgrade_request = open_request.clone();
    let onupgradeneeded = Closure::once(move |_event: web_sys::Event| {
        if let Ok(result) = upgrade_request.result() {
            if let Ok(db) = result.dyn_into::<IdbDatabase>() {
                if !db.object_store_names().contains(STORE_NAME) {
                    let mut params = IdbObjectStoreParameters::new();
                    params.key_path(Some(&JsValue::from_str("key")));
                    if let Ok(store) =
                        db.create_object_store_with_optional_parameters(STORE_NAME, &params)
                    {
                        let _ = store.create_index_with_str("namespace", "namespace");
                    }
                }
            }
        }
    });
    open_request.set_onupgradeneeded(Some(onupgradeneeded.as_ref().unchecked_ref()));

    let promise = Promise::new(&mut |resolve, reject| {
        let success_request = open_request.clone();
        let resolve_clone = resolve.clone();
        let onsuccess = Closure::once(move |_event: web_sys::Event| {
            let result = success_request.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve_clone.call1(&JsValue::UNDEFINED, &result);
        });
        open_request.set_onsuccess(Some(onsuccess.as_ref().unchecked_ref()));
        onsuccess.forget();

        let error_request = open_request.clone();
        let onerror = Closure::once(move |_event: web_sys::Event| {
            let err = error_request
                .error()
                .ok()
                .flatten()
                .map(JsValue::from)
                .unwrap_or(JsValue::UNDEFINED);
            let _ = reject.call1(&JsValue::UNDEFINED, &err);
        });
        open_request.set_onerror(Some(onerror.as_ref().unchecked_ref()));
        onerror.forget();
    });
    onupgradeneeded.forget();

    let result = JsFuture::from(promise)
        .await
        .map_err(|e| PubsubError::transport(format!("indexedDB.open failed: {e:?}")))?;

    result
        .dyn_into::<IdbDatabase>()
        .map_err(|_| PubsubError::transport("indexedDB.open resolved to an unexpected type"))
}

pub struct IndexedDbStore {
    db: Rc<IdbDatabase>,
    mirror: RefCell<InMemoryStore>,
}

impl IndexedDbStore {
    pub fn new(db: IdbDatabase) -> Self {
        Self {
            db: Rc::new(db),
            mirror: RefCell::new(InMemoryStore::default()),
        }
    }

    /// Load every record already persisted for `namespace` into the
    /// in-memory mirror. Call once before the store serves reads.
    pub async fn hydrate(&self, namespace: &str) -> Result<()> {
        let tx = self
            .db
            .transaction_with_str_and_mode(STORE_NAME, IdbTransactionMode::Readonly)
            .map_err(|e| PubsubError::transport(format!("transaction failed: {e:?}")))?;
        let store = tx
            .object_store(STORE_NAME)
            .map_err(|e| PubsubError::transport(format!("object store lookup failed: {e:?}")))?;
        let index = store
            .index("namespace")
            .map_err(|e| PubsubError::transport(format!("index lookup failed: {e:?}")))?;

        let request = index
            .get_all_with_key(&JsValue::from_str(namespace))
            .map_err(|e| PubsubError::transport(format!("getAll failed: {e:?}")))?;

        let promise = Promise::new(&mut |resolve, reject| {
            let success_request = request.clone();
            let onsuccess = Closure::once(move |_event: web_sys::Event| {
                let result = success_request.result().unwrap_or(JsValue::UNDEFINED);
                let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            });
            request.set_onsuccess(Some(onsuccess.as_ref().unchecked_ref()));
            onsuccess.forget();

            let error_request = request.clone();
            let onerror = Closure::once(move |_event: web_sys::Event| {
                let err = error_request
                    .error()
                    .ok()
                    .flatten()
                    .map(JsValue::from)
                    .unwrap_or(JsValue::UNDEFINED);
                let _ = reject.call1(&JsValue::UNDEFINED, &err);
            });
            request.set_onerror(Some(onerror.as_ref().unchecked_ref()));
            onerror.forget();
        });

        let result = JsFuture::from(promise)
            .await
            .map_err(|e| PubsubError::transport(format!("getAll failed: {e:?}")))?;

        let records: Vec<serde_json::Value> = serde_wasm_bindgen::from_value(result)
            .map_err(|e| PubsubError::transport(format!("record decode failed: {e}")))?;

        let mut mirror = self.mirror.borrow_mut();
        for record in records {
            let ts = record.get("ts").and_then(|v| v.as_u64()).unwrap_or(0);
            if let Some(message_value) = record.get("message") {
                if let Ok(message) = serde_json::from_value::<Message>(message_value.clone()) {
                    let _ = mirror.put(namespace, ts, &message);
                }
            }
        }
        Ok(())
    }

    fn persist_async(&self, namespace: &str, ts: u64, message: Message) {
        let db = self.db.clone();
        let namespace = namespace.to_string();
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(err) = write_record(&db, &namespace, ts, &message).await {
                crate::warn_log!("IndexedDB write failed: {}", err);
            }
        });
    }

    fn delete_async(&self, key: String) {
        let db = self.db.clone();
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(err) = delete_record(&db, &key).await {
                crate::warn_log!("IndexedDB delete failed: {}", err);
            }
        });
    }
}

async fn delete_record(db: &IdbDatabase, key: &str) -> Result<()> {
    let tx = db
        .transaction_with_str_and_mode(STORE_NAME, IdbTransactionMode::Readwrite)
        .map_err(|e| PubsubError::transport(format!("transaction failed: {e:?}")))?;
    let store = tx
        .object_store(STORE_NAME)
        .map_err(|e| PubsubError::transport(format!("object store lookup failed: {e:?}")))?;
    store
        .delete(&JsValue::from_str(key))
        .map_err(|e| PubsubError::transport(format!("delete failed: {e:?}")))?;
    Ok(())
}

async fn write_record(db: &IdbDatabase, namespace: &str, ts: u64, message: &Message) -> Result<()> {
    let tx = db
        .transaction_with_str_and_mode(STORE_NAME, IdbTransactionMode::Readwrite)
        .map_err(|e| PubsubError::transport(format!("transaction failed: {e:?}")))?;
    let store = tx
        .object_store(STORE_NAME)
        .map_err(|e| PubsubError::transport(format!("object store lookup failed: {e:?}")))?;

    let record = serde_json::json!({
        "key": record_key(namespace, ts, &message.id),
        "namespace": namespace,
        "ts": ts,
        "message": message,
    });
    let value = serde_wasm_bindgen::to_value(&record)
        .map_err(|e| PubsubError::transport(format!("record serialize failed: {e}")))?;
    store
        .put(&value)
        .map_err(|e| PubsubError::transport(format!("put failed: {e:?}")))?;
    Ok(())
}

impl PersistentStore for IndexedDbStore {
    fn put(&mut self, namespace: &str, ts: u64, message: &Message) -> Result<()> {
        self.mirror.borrow_mut().put(namespace, ts, message)?;
        self.persist_async(namespace, ts, message.clone());
        Ok(())
    }

    fn range(&self, namespace: &str, from_time: u64) -> Result<Vec<Message>> {
        self.mirror.borrow().range(namespace, from_time)
    }

    fn delete_before(&mut self, namespace: &str, before: u64) -> Result<usize> {
        let affected: Vec<Message> = self
            .mirror
            .borrow()
            .range(namespace, 0)?
            .into_iter()
            .filter(|m| m.ts < before)
            .collect();
        for message in &affected {
            self.delete_async(record_key(namespace, message.ts, &message.id));
        }
        self.mirror.borrow_mut().delete_before(namespace, before)
    }

    fn count(&self, namespace: &str) -> Result<usize> {
        self.mirror.borrow().count(namespace)
    }

    fn delete_oldest(&mut self, namespace: &str, n: usize) -> Result<usize> {
        let affected: Vec<Message> = self.mirror.borrow().range(namespace, 0)?.into_iter().take(n).collect();
        for message in &affected {
            self.delete_async(record_key(namespace, message.ts, &message.id));
        }
        self.mirror.borrow_mut().delete_oldest(namespace, n)
    }
}
