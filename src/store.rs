//! 记录存储 (Record Store)
//!
//! 持久化协作者的契约：按 ID 幂等写入、按 ID 读取。
//! 两个内容相同的并发请求会算出同一个 ID，谁先写入谁赢，
//! 后到的那个拿回已存在的记录，而不是报错 (幂等 upsert)。

use crate::record::RecordId;
use crate::signer::SignedRecord;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

const RECORDS_TREE: &str = "records";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("stored record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// 幂等写入的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Insertion {
    /// 这次写入成功，返回的就是刚写的记录
    Inserted(SignedRecord),
    /// 同一个 ID 已经确证过，返回的是已有记录
    AlreadyVerified(SignedRecord),
}

impl Insertion {
    pub fn record(&self) -> &SignedRecord {
        match self {
            Self::Inserted(r) | Self::AlreadyVerified(r) => r,
        }
    }

    pub fn into_record(self) -> SignedRecord {
        match self {
            Self::Inserted(r) | Self::AlreadyVerified(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

pub trait RecordStore: Send + Sync {
    /// 不存在则写入；已存在则返回已有记录，绝不覆盖
    fn insert_if_absent(&self, entry: SignedRecord) -> Result<Insertion, StoreError>;

    fn get(&self, id: &RecordId) -> Result<Option<SignedRecord>, StoreError>;
}

/// 纯内存实现，进程退出即丢失。测试和嵌入式场景用。
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<RecordId, SignedRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordStore for MemoryRecordStore {
    fn insert_if_absent(&self, entry: SignedRecord) -> Result<Insertion, StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        if let Some(existing) = records.get(&entry.record.id) {
            return Ok(Insertion::AlreadyVerified(existing.clone()));
        }
        records.insert(entry.record.id.clone(), entry.clone());
        Ok(Insertion::Inserted(entry))
    }

    fn get(&self, id: &RecordId) -> Result<Option<SignedRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(id).cloned())
    }
}

/// sled 实现
///
/// 值是 `SignedRecord` 的 JSON。写入用 compare-and-swap (期望旧值为空)，
/// 所以并发写同一个 ID 时只有一个会成功，不需要额外加锁。
#[derive(Debug, Clone)]
pub struct SledRecordStore {
    records: sled::Tree,
}

impl SledRecordStore {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            records: db.open_tree(RECORDS_TREE)?,
        })
    }
}

impl RecordStore for SledRecordStore {
    fn insert_if_absent(&self, entry: SignedRecord) -> Result<Insertion, StoreError> {
        let key = entry.record.id.as_str().as_bytes();
        let value = serde_json::to_vec(&entry)?;

        match self
            .records
            .compare_and_swap(key, None as Option<&[u8]>, Some(value))?
        {
            Ok(()) => {
                self.records.flush()?;
                Ok(Insertion::Inserted(entry))
            }
            // 期望旧值为空却失败，current 必然非空
            Err(cas) => match cas.current {
                Some(current) => Ok(Insertion::AlreadyVerified(serde_json::from_slice(&current)?)),
                None => Err(StoreError::Backend(sled::Error::ReportableBug(
                    "compare_and_swap failed without a current value".into(),
                ))),
            },
        }
    }

    fn get(&self, id: &RecordId) -> Result<Option<SignedRecord>, StoreError> {
        match self.records.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
