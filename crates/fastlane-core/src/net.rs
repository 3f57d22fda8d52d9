//! 本机局域网地址探测

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

pub const FALLBACK_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// 主要的非回环 IPv4 地址
///
/// 通过对外部地址 "connect" 一个 UDP 套接字获得路由选择的本地地址，
/// 不会发送任何数据包。
pub fn local_ipv4() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

/// 对外公布的主机地址，探测失败时为 `127.0.0.1`
pub fn lan_host() -> IpAddr {
    local_ipv4().unwrap_or(FALLBACK_HOST)
}
