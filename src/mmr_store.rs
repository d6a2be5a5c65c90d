//! 模块：审计日志 (Audit Log)
//!
//! **职责**: 给每一条"新写入"的确证记录留一个不可篡改的存在性证明。
//! 底层是 Merkle Mountain Range：只追加、不修改历史，计算 Root 只需要各座山峰的山顶。
//!
//! - 叶子 = blake3(记录的规范化字节)
//! - 叶子同时落在 sled 的 `audit_leaves` 树里，进程重启时按顺序重放，重建出同一个 Root

use crate::record::RecordId;
use crate::signer::SignedRecord;
use ckb_merkle_mountain_range::{util::MemStore, Merge, MerkleProof, MMR};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;

const LEAVES_TREE: &str = "audit_leaves";

type Hash32 = [u8; 32];

/// 合并策略：$H_{parent} = blake3(H_{left} || H_{right})$
pub struct MergeBlake3;

impl Merge for MergeBlake3 {
    type Item = Hash32;

    fn merge(lhs: &Self::Item, rhs: &Self::Item) -> ckb_merkle_mountain_range::Result<Self::Item> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(lhs);
        hasher.update(rhs);
        Ok(*hasher.finalize().as_bytes())
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("MMR error: {0}")]
    Mmr(String),

    #[error("audit backend error: {0}")]
    Backend(#[from] sled::Error),

    #[error("audit codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("corrupt audit leaf: {0}")]
    Corrupt(String),

    #[error("no audit leaf at index {0}")]
    UnknownLeaf(u64),

    #[error("audit persistence task failed: {0}")]
    Task(String),
}

fn mmr_err(e: ckb_merkle_mountain_range::Error) -> AuditError {
    AuditError::Mmr(e.to_string())
}

/// 持久化的叶子条目
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeafEntry {
    record_id: RecordId,
    leaf: String,
}

/// 追加回执
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReceipt {
    /// 第几片叶子 (从 0 开始)，对外用这个做索引
    pub index: u64,
    /// 叶子在 MMR 中的位置 (内部坐标)
    pub position: u64,
    pub root: String,
}

/// 包含性证明
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditProof {
    pub index: u64,
    pub position: u64,
    pub record_id: RecordId,
    pub leaf: String,
    pub root: String,
    pub mmr_size: u64,
    /// 证明路径 (兄弟节点 + 其它山峰)，Hex
    pub proof: Vec<String>,
}

impl AuditProof {
    /// 客户端侧的验证逻辑：用证明路径重算 Root，与声称的 Root 比较
    pub fn verify(&self) -> Result<bool, AuditError> {
        let root = decode_hash(&self.root)?;
        let leaf = decode_hash(&self.leaf)?;
        let items = self
            .proof
            .iter()
            .map(|h| decode_hash(h))
            .collect::<Result<Vec<_>, _>>()?;
        let proof = MerkleProof::<Hash32, MergeBlake3>::new(self.mmr_size, items);
        proof.verify(root, vec![(self.position, leaf)]).map_err(mmr_err)
    }
}

fn leaf_of(signed: &SignedRecord) -> Result<Hash32, AuditError> {
    Ok(*blake3::hash(&signed.record.canonical_bytes()?).as_bytes())
}

fn decode_hash(s: &str) -> Result<Hash32, AuditError> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out).map_err(|_| AuditError::Corrupt(s.to_string()))?;
    Ok(out)
}

/// MMR 状态
struct LogState {
    /// **[⚠️ 纯内存]**: MMR 节点只在内存里，持久化的是叶子序列，启动时重放。
    store: MemStore<Hash32>,
    /// MMR 树大小：MMR 位运算路由的坐标系，丢了它就分不清哪是山顶
    mmr_size: u64,
    /// 第 i 片叶子 → (位置, 哈希, 记录 ID)
    leaves: Vec<(u64, Hash32, RecordId)>,
    by_record: HashMap<RecordId, u64>,
}

impl LogState {
    fn new() -> Self {
        Self {
            store: MemStore::default(),
            mmr_size: 0,
            leaves: Vec::new(),
            by_record: HashMap::new(),
        }
    }

    fn push(&mut self, record_id: RecordId, leaf: Hash32) -> Result<AuditReceipt, AuditError> {
        let mut mmr = MMR::<Hash32, MergeBlake3, _>::new(self.mmr_size, &self.store);
        let position = mmr.push(leaf).map_err(mmr_err)?;
        let mmr_size = mmr.mmr_size();
        let root = mmr.get_root().map_err(mmr_err)?;
        mmr.commit().map_err(mmr_err)?;

        self.mmr_size = mmr_size;
        let index = self.leaves.len() as u64;
        self.by_record.insert(record_id.clone(), index);
        self.leaves.push((position, leaf, record_id));

        Ok(AuditReceipt {
            index,
            position,
            root: hex::encode(root),
        })
    }

    fn proof(&self, index: u64) -> Result<AuditProof, AuditError> {
        let (position, leaf, record_id) = usize::try_from(index)
            .ok()
            .and_then(|i| self.leaves.get(i))
            .cloned()
            .ok_or(AuditError::UnknownLeaf(index))?;

        let mmr = MMR::<Hash32, MergeBlake3, _>::new(self.mmr_size, &self.store);
        let root = mmr.get_root().map_err(mmr_err)?;
        let proof = mmr.gen_proof(vec![position]).map_err(mmr_err)?;

        Ok(AuditProof {
            index,
            position,
            record_id,
            leaf: hex::encode(leaf),
            root: hex::encode(root),
            mmr_size: self.mmr_size,
            proof: proof.proof_items().iter().map(hex::encode).collect(),
        })
    }
}

/// 审计日志
///
/// 这是整个服务里唯一的共享可变结构，用异步互斥锁保护。
/// 只有赢得幂等写入的那个请求会来追加。
pub struct AuditLog {
    state: Mutex<LogState>,
    persisted: Option<sled::Tree>,
}

impl AuditLog {
    /// 纯内存日志 (测试用)
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LogState::new()),
            persisted: None,
        }
    }

    /// 打开 sled 中的日志，并按顺序重放已有叶子
    pub fn open(db: &sled::Db) -> Result<Self, AuditError> {
        let tree = db.open_tree(LEAVES_TREE)?;
        let mut state = LogState::new();
        for item in tree.iter() {
            let (_, value) = item?;
            let entry: LeafEntry = serde_json::from_slice(&value)?;
            let leaf = decode_hash(&entry.leaf)?;
            state.push(entry.record_id, leaf)?;
        }
        tracing::info!(leaves = state.leaves.len(), "audit log replayed");
        Ok(Self {
            state: Mutex::new(state),
            persisted: Some(tree),
        })
    }

    /// 追加一条新记录
    pub async fn append(&self, signed: &SignedRecord) -> Result<AuditReceipt, AuditError> {
        let leaf = leaf_of(signed)?;
        let mut state = self.state.lock().await;
        self.append_locked(&mut state, signed.record.id.clone(), leaf).await
    }

    /// 记录已在日志中就返回它的索引，否则补记一片叶子
    pub async fn ensure_logged(&self, signed: &SignedRecord) -> Result<u64, AuditError> {
        let leaf = leaf_of(signed)?;
        let mut state = self.state.lock().await;
        if let Some(&index) = state.by_record.get(&signed.record.id) {
            return Ok(index);
        }
        let receipt = self
            .append_locked(&mut state, signed.record.id.clone(), leaf)
            .await?;
        tracing::debug!(id = %signed.record.id, index = receipt.index, "record appended to audit log");
        Ok(receipt.index)
    }

    /// 先落盘再进内存 MMR；持锁期间完成，保证叶子顺序与索引一致
    async fn append_locked(
        &self,
        state: &mut LogState,
        record_id: RecordId,
        leaf: Hash32,
    ) -> Result<AuditReceipt, AuditError> {
        if let Some(tree) = self.persisted.clone() {
            let index = state.leaves.len() as u64;
            let value = serde_json::to_vec(&LeafEntry {
                record_id: record_id.clone(),
                leaf: hex::encode(leaf),
            })?;
            // insert + fsync 都是阻塞 IO，不能占着运行时的工作线程
            tokio::task::spawn_blocking(move || -> Result<(), AuditError> {
                tree.insert(index.to_be_bytes(), value)?;
                tree.flush()?;
                Ok(())
            })
            .await
            .map_err(|e| AuditError::Task(e.to_string()))??;
        }

        state.push(record_id, leaf)
    }

    /// 某条记录在日志中的索引
    pub async fn index_of(&self, id: &RecordId) -> Option<u64> {
        self.state.lock().await.by_record.get(id).copied()
    }

    pub async fn proof(&self, index: u64) -> Result<AuditProof, AuditError> {
        self.state.lock().await.proof(index)
    }

    pub async fn len(&self) -> u64 {
        self.state.lock().await.leaves.len() as u64
    }

    pub async fn root(&self) -> Result<Option<String>, AuditError> {
        let state = self.state.lock().await;
        if state.leaves.is_empty() {
            return Ok(None);
        }
        let mmr = MMR::<Hash32, MergeBlake3, _>::new(state.mmr_size, &state.store);
        Ok(Some(hex::encode(mmr.get_root().map_err(mmr_err)?)))
    }
}
