//! 访问请求状态机
//!
//! 设备提交名称后进入 `pending`，由主机一侧批准或拒绝：
//!
//! ```text
//! pending ──approve──▶ approved
//!    │
//!    └────reject────▶ rejected ──(5s)──▶ 移除
//! ```
//!
//! 状态只会从 `pending` 转出，不会回退。已拒绝的请求保留一个短暂的宽限期，
//! 让客户端最后一次轮询仍能看到 `rejected`。已批准的请求保留在有界缓存中，
//! 被淘汰的请求同时撤销其地址的批准。

use crate::error::{AppError, Result};
use crate::ident;
use crate::logging::ActivityLog;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// 已拒绝请求的保留时间
pub const REJECTED_GRACE: Duration = Duration::from_secs(5);

/// 最多保留的已批准请求数
pub const APPROVED_RETENTION: usize = 256;

/// 访问请求状态；`Unknown` 只出现在查询结果中
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Pending,
    Approved,
    Rejected,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub id: String,
    pub address: String,
    pub device_name: String,
    pub requested_at: DateTime<Utc>,
    pub status: AccessStatus,
}

/// `GET /pending-requests` 中的一项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub request_id: String,
    pub ip: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
}

struct Entry {
    seq: u64,
    request: AccessRequest,
}

#[derive(Default)]
struct AccessTable {
    next_seq: u64,
    requests: HashMap<String, Entry>,
    approved_order: VecDeque<String>,
    approved_addresses: HashSet<String>,
}

impl AccessTable {
    /// 移除一条已批准请求；该地址没有其他保留的批准记录时一并撤销
    fn evict_approved(&mut self, request_id: &str) {
        let Some(entry) = self.requests.remove(request_id) else {
            return;
        };
        let address = entry.request.address;
        let still_approved = self.approved_order.iter().any(|id| {
            self.requests
                .get(id)
                .is_some_and(|e| e.request.address == address)
        });
        if !still_approved {
            self.approved_addresses.remove(&address);
        }
        debug!("Evicted approved request {} ({})", request_id, address);
    }
}

pub struct AccessRequests {
    table: Mutex<AccessTable>,
    activity: Arc<ActivityLog>,
    rejected_grace: Duration,
    approved_retention: usize,
}

impl AccessRequests {
    pub fn new(activity: Arc<ActivityLog>) -> Self {
        Self::with_policy(activity, REJECTED_GRACE, APPROVED_RETENTION)
    }

    pub fn with_policy(
        activity: Arc<ActivityLog>,
        rejected_grace: Duration,
        approved_retention: usize,
    ) -> Self {
        Self {
            table: Mutex::new(AccessTable::default()),
            activity,
            rejected_grace,
            approved_retention: approved_retention.max(1),
        }
    }

    /// 提交访问请求，名称去除首尾空白后不能为空
    pub fn submit(&self, address: &str, device_name: &str) -> Result<AccessRequest> {
        let device_name = device_name.trim();
        if device_name.is_empty() {
            return Err(AppError::Validation("Device name is required".into()));
        }

        let request = AccessRequest {
            id: ident::new_id(),
            address: address.to_string(),
            device_name: device_name.to_string(),
            requested_at: Utc::now(),
            status: AccessStatus::Pending,
        };

        {
            let mut table = self.table.lock();
            let seq = table.next_seq;
            table.next_seq += 1;
            table.requests.insert(
                request.id.clone(),
                Entry {
                    seq,
                    request: request.clone(),
                },
            );
        }

        self.activity.info(format!(
            "Access request from: {} ({})",
            request.device_name, request.address
        ));
        Ok(request)
    }

    pub fn status(&self, request_id: &str) -> AccessStatus {
        self.table
            .lock()
            .requests
            .get(request_id)
            .map_or(AccessStatus::Unknown, |e| e.request.status)
    }

    /// 待审批的请求（按提交顺序）
    pub fn list_pending(&self) -> Vec<PendingRequest> {
        let table = self.table.lock();
        let mut pending: Vec<&Entry> = table
            .requests
            .values()
            .filter(|e| e.request.status == AccessStatus::Pending)
            .collect();
        pending.sort_by_key(|e| e.seq);
        pending
            .into_iter()
            .map(|e| PendingRequest {
                request_id: e.request.id.clone(),
                ip: e.request.address.clone(),
                device_name: e.request.device_name.clone(),
                timestamp: e.request.requested_at,
            })
            .collect()
    }

    /// 批准请求，并把设备地址加入已批准集合
    ///
    /// 重复批准是幂等的；批准一个已拒绝的请求返回 `Conflict`。
    pub fn approve(&self, request_id: &str) -> Result<AccessStatus> {
        let approved = {
            let mut table = self.table.lock();
            let entry = table
                .requests
                .get_mut(request_id)
                .ok_or_else(|| AppError::NotFound("Request not found".into()))?;

            match entry.request.status {
                AccessStatus::Approved => return Ok(AccessStatus::Approved),
                AccessStatus::Rejected => {
                    return Err(AppError::Conflict("Request already rejected".into()));
                }
                AccessStatus::Pending | AccessStatus::Unknown => {}
            }

            entry.request.status = AccessStatus::Approved;
            let approved = entry.request.clone();

            table.approved_addresses.insert(approved.address.clone());
            table.approved_order.push_back(approved.id.clone());
            while table.approved_order.len() > self.approved_retention {
                if let Some(oldest) = table.approved_order.pop_front() {
                    table.evict_approved(&oldest);
                }
            }
            approved
        };

        self.activity.info(format!(
            "Access approved for: {} ({})",
            approved.device_name, approved.address
        ));
        Ok(AccessStatus::Approved)
    }

    /// 拒绝请求，宽限期结束后移除记录
    ///
    /// 重复拒绝是幂等的；拒绝一个已批准的请求返回 `Conflict`。
    pub fn reject(self: &Arc<Self>, request_id: &str) -> Result<AccessStatus> {
        let rejected = {
            let mut table = self.table.lock();
            let entry = table
                .requests
                .get_mut(request_id)
                .ok_or_else(|| AppError::NotFound("Request not found".into()))?;

            match entry.request.status {
                AccessStatus::Rejected => return Ok(AccessStatus::Rejected),
                AccessStatus::Approved => {
                    return Err(AppError::Conflict("Request already approved".into()));
                }
                AccessStatus::Pending | AccessStatus::Unknown => {}
            }

            entry.request.status = AccessStatus::Rejected;
            entry.request.clone()
        };

        self.activity.info(format!(
            "Access rejected for: {} ({})",
            rejected.device_name, rejected.address
        ));

        let this = Arc::downgrade(self);
        let grace = self.rejected_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(this) = this.upgrade() {
                this.purge_rejected(&rejected.id);
            }
        });

        Ok(AccessStatus::Rejected)
    }

    /// 该地址是否有仍在保留中的已批准请求
    pub fn is_approved(&self, address: &str) -> bool {
        self.table.lock().approved_addresses.contains(address)
    }

    fn purge_rejected(&self, request_id: &str) {
        let mut table = self.table.lock();
        if table
            .requests
            .get(request_id)
            .is_some_and(|e| e.request.status == AccessStatus::Rejected)
        {
            table.requests.remove(request_id);
            debug!("Purged rejected request {}", request_id);
        }
    }
}
