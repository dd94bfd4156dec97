use crate::domain::offline::OfflineTransaction;
use crate::domain::order::{Order, OrderNumber, SideEffects};
use crate::domain::ports::{OfflineStore, OrderLedger};
use crate::error::{PosError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family holding orders keyed by order number.
pub const CF_ORDERS: &str = "orders";
/// Column Family holding offline transactions keyed by transaction id.
pub const CF_OFFLINE: &str = "offline_transactions";

/// A persistent store implementation using RocksDB.
///
/// Serves as both the order ledger and the offline queue, one Column Family
/// each, values stored as JSON. Writes that must not overwrite an existing
/// record go through a single lock so the existence check and the put are
/// atomic with respect to each other.
///
/// `Clone` shares the underlying `Arc<DB>`.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_ORDERS, Options::default()),
            ColumnFamilyDescriptor::new(CF_OFFLINE, Options::default()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf_name: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db.put_cf(cf, key.as_bytes(), serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PosError::InternalError(Box::new(std::io::Error::other(format!(
                "Column family '{name}' not found"
            ))))
        })
    }
}

#[async_trait]
impl OrderLedger for RocksDBStore {
    async fn create_order(&self, order: Order) -> Result<Order> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read::<Order>(CF_ORDERS, order.order_number.as_str())? {
            return Ok(existing);
        }
        self.write(CF_ORDERS, order.order_number.as_str(), &order)?;
        Ok(order)
    }

    async fn get_order(&self, order_number: &OrderNumber) -> Result<Option<Order>> {
        self.read(CF_ORDERS, order_number.as_str())
    }

    async fn attach_side_effects(&self, order_number: &OrderNumber, effects: SideEffects) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut order: Order = self
            .read(CF_ORDERS, order_number.as_str())?
            .ok_or_else(|| PosError::NotFound(format!("order {order_number}")))?;
        order.side_effects = effects;
        self.write(CF_ORDERS, order_number.as_str(), &order)
    }

    async fn all_orders(&self) -> Result<Vec<Order>> {
        let mut orders: Vec<Order> = self.scan(CF_ORDERS)?;
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl OfflineStore for RocksDBStore {
    async fn append(&self, tx: OfflineTransaction) -> Result<OfflineTransaction> {
        let _guard = self.write_lock.lock().await;
        if let Some(existing) = self.read::<OfflineTransaction>(CF_OFFLINE, &tx.id)? {
            return Ok(existing);
        }
        self.write(CF_OFFLINE, &tx.id, &tx)?;
        Ok(tx)
    }

    async fn get(&self, id: &str) -> Result<Option<OfflineTransaction>> {
        self.read(CF_OFFLINE, id)
    }

    async fn pending(&self) -> Result<Vec<OfflineTransaction>> {
        let all: Vec<OfflineTransaction> = self.scan(CF_OFFLINE)?;
        Ok(all.into_iter().filter(|tx| !tx.synced).collect())
    }

    async fn mark_synced(&self, id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx: OfflineTransaction = self
            .read(CF_OFFLINE, id)?
            .ok_or_else(|| PosError::NotFound(format!("offline transaction {id}")))?;
        tx.synced = true;
        self.write(CF_OFFLINE, id, &tx)
    }
}
