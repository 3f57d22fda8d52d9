//! 设备在线跟踪
//!
//! 每个入站请求都会以客户端地址为键更新一条设备记录（回环地址除外），
//! 后台任务每分钟清理一次超过 5 分钟未出现的设备。

pub mod user_agent;

use crate::logging::ActivityLog;
use chrono::{DateTime, Utc};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub use user_agent::{UNKNOWN_DEVICE, classify};

/// 设备清理周期
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// 设备多久未出现后视为离线
pub const DEVICE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct DeviceRecord {
    /// 与 `address` 相同，作为键使用
    pub id: String,
    pub address: String,
    pub user_agent: String,
    pub display_name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub request_count: u64,
}

/// `GET /devices` 返回的设备快照（不含原始 User-Agent）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    pub id: String,
    pub ip: String,
    pub device_name: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub requests: u64,
}

impl From<&DeviceRecord> for DeviceSummary {
    fn from(device: &DeviceRecord) -> Self {
        Self {
            id: device.id.clone(),
            ip: device.address.clone(),
            device_name: device.display_name.clone(),
            connected_at: device.first_seen,
            last_seen: device.last_seen,
            requests: device.request_count,
        }
    }
}

/// 去掉 IPv4 映射 IPv6 前缀 (`::ffff:`)
pub fn normalize_address(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("::ffff:")
        .or_else(|| trimmed.strip_prefix("::FFFF:"))
        .unwrap_or(trimmed)
        .to_string()
}

fn is_stale(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    (now - last_seen)
        .to_std()
        .is_ok_and(|silence| silence > DEVICE_TTL)
}

pub fn is_loopback(address: &str) -> bool {
    match address.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => address.eq_ignore_ascii_case("localhost"),
    }
}

pub struct DeviceTracker {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    activity: Arc<ActivityLog>,
}

impl DeviceTracker {
    pub fn new(activity: Arc<ActivityLog>) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            activity,
        }
    }

    /// 记录一次来自 `address` 的请求；返回该地址是否被跟踪
    pub fn observe(&self, address: &str, user_agent: Option<&str>) -> bool {
        self.observe_at(address, user_agent, Utc::now())
    }

    pub fn observe_at(&self, address: &str, user_agent: Option<&str>, now: DateTime<Utc>) -> bool {
        let address = normalize_address(address);
        if address.is_empty() || is_loopback(&address) {
            return false;
        }

        let connected = {
            let mut devices = self.devices.lock();
            if let Some(device) = devices.get_mut(&address) {
                device.last_seen = now;
                device.request_count += 1;
                None
            } else {
                let user_agent = user_agent.unwrap_or("Unknown").to_string();
                let device = DeviceRecord {
                    id: address.clone(),
                    address: address.clone(),
                    display_name: classify(&user_agent).to_string(),
                    user_agent,
                    first_seen: now,
                    last_seen: now,
                    request_count: 1,
                };
                let message = format!(
                    "New device connected: {} ({})",
                    device.display_name, device.address
                );
                devices.insert(address.clone(), device);
                Some(message)
            }
        };

        if let Some(message) = connected {
            self.activity.info(message);
        }
        true
    }

    /// 当前在线设备（按首次出现时间排序）
    pub fn list(&self) -> Vec<DeviceSummary> {
        let mut devices: Vec<DeviceSummary> =
            self.devices.lock().values().map(DeviceSummary::from).collect();
        devices.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.ip.cmp(&b.ip)));
        devices
    }

    pub fn get(&self, address: &str) -> Option<DeviceRecord> {
        self.devices.lock().get(&normalize_address(address)).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.lock().is_empty()
    }

    /// 移除过期设备，返回移除数量
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<DeviceRecord> = {
            let mut devices = self.devices.lock();
            let stale: Vec<String> = devices
                .values()
                .filter(|d| is_stale(d.last_seen, now))
                .map(|d| d.id.clone())
                .collect();
            stale.iter().filter_map(|id| devices.remove(id)).collect()
        };

        for device in &expired {
            self.activity.info(format!(
                "Device disconnected: {} ({})",
                device.display_name, device.address
            ));
        }
        expired.len()
    }

    /// 启动周期性清理任务
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let tracker = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // 第一次 tick 立即返回
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(tracker) = tracker.upgrade() else {
                    break;
                };
                let removed = tracker.sweep();
                if removed > 0 {
                    debug!("Device sweep removed {} stale device(s)", removed);
                }
            }
        })
    }
}
