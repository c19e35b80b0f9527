//! 네트워크 인터페이스 선택
//!
//! 멀티캐스트에 쓸 IPv4 NIC 목록을 고르고 주기적으로 다시 검사해서
//! 장애 조치(failover) 여부를 판단함

use std::net::{IpAddr, Ipv4Addr};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// 가상 인터페이스 이름 접두사
const VIRTUAL_PREFIXES: &[&str] = &[
    "docker", "veth", "virbr", "vmnet", "vboxnet", "br-", "tun", "tap", "utun", "lxc", "zt",
];

/// NIC 정보
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicInfo {
    /// 인터페이스 이름
    pub name: String,

    /// IPv4 주소
    pub addr: Ipv4Addr,

    /// OS 인터페이스 인덱스
    pub index: Option<u32>,

    pub loopback: bool,

    /// 링크가 올라와 있음
    pub up: bool,
}

impl NicInfo {
    pub fn new(name: impl Into<String>, addr: Ipv4Addr) -> Self {
        Self {
            name: name.into(),
            addr,
            index: None,
            loopback: addr.is_loopback(),
            up: true,
        }
    }

    /// 멀티캐스트용으로 쓸 수 있는 인터페이스인지
    ///
    /// 링크 로컬(169.254/16) 주소는 DHCP 실패 등으로 설정되지 않은 NIC로 간주
    pub fn is_usable(&self) -> bool {
        if !self.up {
            return false;
        }
        if self.loopback || self.addr.is_loopback() || self.addr.is_link_local() {
            return false;
        }
        if self.addr.is_unspecified() {
            return false;
        }
        let name = self.name.to_ascii_lowercase();
        !VIRTUAL_PREFIXES.iter().any(|p| name.starts_with(p))
    }

    /// 이름 또는 IPv4 문자열과 일치하는지
    pub fn matches(&self, wanted: &str) -> bool {
        match wanted.parse::<Ipv4Addr>() {
            Ok(addr) => self.addr == addr,
            Err(_) => self.name == wanted,
        }
    }
}

/// 후보 목록에서 사용할 인터페이스 선택
///
/// 선호 인터페이스가 지정되면 그것 하나만, 없으면 사용 가능한 전부
pub fn select_interfaces(candidates: &[NicInfo], preferred: Option<&str>) -> Result<Vec<NicInfo>> {
    match preferred {
        Some(wanted) => {
            let nic = candidates
                .iter()
                .find(|n| n.matches(wanted))
                .ok_or_else(|| Error::InterfaceNotFound(wanted.to_string()))?;

            // 루프백은 명시적으로 지정한 경우에만 허용 (테스트용)
            if !nic.is_usable() && !(nic.loopback && nic.up) {
                return Err(Error::InterfaceNotFound(wanted.to_string()));
            }
            Ok(vec![nic.clone()])
        }
        None => {
            let usable: Vec<NicInfo> = candidates.iter().filter(|n| n.is_usable()).cloned().collect();
            if usable.is_empty() {
                return Err(Error::NoUsableInterface);
            }
            Ok(usable)
        }
    }
}

/// 시스템 인터페이스 조회 후 선택
pub fn probe_interfaces(preferred: Option<&str>) -> Result<Vec<NicInfo>> {
    let candidates: Vec<NicInfo> = if_addrs::get_if_addrs()?
        .into_iter()
        .filter_map(|iface| match iface.ip() {
            IpAddr::V4(addr) => Some(NicInfo {
                loopback: iface.is_loopback(),
                up: is_oper_up(&iface.name),
                index: iface.index,
                name: iface.name,
                addr,
            }),
            IpAddr::V6(_) => None,
        })
        .collect();

    debug!("IPv4 인터페이스 {}개 발견", candidates.len());
    select_interfaces(&candidates, preferred)
}

/// 링크 동작 상태
///
/// if-addrs는 상태를 주지 않으므로 Linux에서는 sysfs operstate를 읽음.
/// 루프백과 일부 터널은 `unknown`으로 보고하므로 명시적으로 내려간 경우만 false
#[cfg(target_os = "linux")]
fn is_oper_up(name: &str) -> bool {
    match std::fs::read_to_string(format!("/sys/class/net/{}/operstate", name)) {
        Ok(state) => !matches!(state.trim(), "down" | "lowerlayerdown" | "notpresent"),
        // 별칭 인터페이스(eth0:1 등)는 항목이 없음
        Err(_) => true,
    }
}

#[cfg(not(target_os = "linux"))]
fn is_oper_up(_name: &str) -> bool {
    true
}

/// 인터페이스 재검사 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceChange {
    Unchanged,
    /// 활성 목록이 바뀜 (새 목록)
    Changed(Vec<NicInfo>),
    /// 사용 가능한 인터페이스 없음
    Lost,
}

/// 활성 인터페이스 관리자
pub struct InterfaceManager {
    preferred: Option<String>,
    active: RwLock<Vec<NicInfo>>,
}

impl InterfaceManager {
    pub fn new(preferred: Option<String>) -> Self {
        Self {
            preferred,
            active: RwLock::new(Vec::new()),
        }
    }

    /// 최초 선택
    pub fn select(&self) -> Result<Vec<NicInfo>> {
        let nics = probe_interfaces(self.preferred.as_deref())?;
        info!(
            "멀티캐스트 인터페이스: {}",
            nics.iter()
                .map(|n| format!("{}({})", n.name, n.addr))
                .collect::<Vec<_>>()
                .join(", ")
        );
        *self.active.write() = nics.clone();
        Ok(nics)
    }

    /// 시스템 재조회 후 변경 여부 판단
    pub fn refresh(&self) -> InterfaceChange {
        let probed = probe_interfaces(self.preferred.as_deref());
        self.apply(probed)
    }

    /// 외부에서 받은 인터페이스 목록으로 재선택
    pub fn refresh_from(&self, candidates: &[NicInfo]) -> InterfaceChange {
        self.apply(select_interfaces(candidates, self.preferred.as_deref()))
    }

    /// 조회 결과 반영
    pub fn apply(&self, probed: Result<Vec<NicInfo>>) -> InterfaceChange {
        let mut active = self.active.write();
        match probed {
            Ok(nics) if *active == nics => InterfaceChange::Unchanged,
            Ok(nics) => {
                info!("인터페이스 변경: {}개 → {}개", active.len(), nics.len());
                *active = nics.clone();
                InterfaceChange::Changed(nics)
            }
            Err(e) => {
                if active.is_empty() {
                    debug!("인터페이스 여전히 없음: {}", e);
                    return InterfaceChange::Unchanged;
                }
                warn!("사용 가능한 인터페이스 사라짐: {}", e);
                active.clear();
                InterfaceChange::Lost
            }
        }
    }

    pub fn active(&self) -> Vec<NicInfo> {
        self.active.read().clone()
    }

    /// 활성 인터페이스 주소 (로컬 IP 판별용)
    pub fn local_ips(&self) -> Vec<IpAddr> {
        self.active.read().iter().map(|n| IpAddr::V4(n.addr)).collect()
    }

    pub fn is_active(&self) -> bool {
        !self.active.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nics() -> Vec<NicInfo> {
        vec![
            NicInfo::new("lo", Ipv4Addr::LOCALHOST),
            NicInfo::new("eth0", Ipv4Addr::new(192, 168, 1, 5)),
            NicInfo::new("docker0", Ipv4Addr::new(172, 17, 0, 1)),
            NicInfo::new("wlan0", Ipv4Addr::new(10, 0, 0, 7)),
            NicInfo::new("eth1", Ipv4Addr::new(169, 254, 3, 4)),
            NicInfo::new("vboxnet0", Ipv4Addr::new(192, 168, 56, 1)),
        ]
    }

    #[test]
    fn test_usable_filter() {
        let names: Vec<_> = select_interfaces(&nics(), None)
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["eth0", "wlan0"]);
    }

    #[test]
    fn test_preferred_by_name_and_ip() {
        let by_name = select_interfaces(&nics(), Some("wlan0")).unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].addr, Ipv4Addr::new(10, 0, 0, 7));

        let by_ip = select_interfaces(&nics(), Some("192.168.1.5")).unwrap();
        assert_eq!(by_ip[0].name, "eth0");

        // 명시한 루프백은 허용
        let lo = select_interfaces(&nics(), Some("lo")).unwrap();
        assert!(lo[0].loopback);
    }

    #[test]
    fn test_preferred_missing_or_unusable() {
        assert!(matches!(
            select_interfaces(&nics(), Some("eth9")),
            Err(Error::InterfaceNotFound(_))
        ));
        assert!(matches!(
            select_interfaces(&nics(), Some("docker0")),
            Err(Error::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn test_no_usable() {
        let only_virtual = vec![
            NicInfo::new("lo", Ipv4Addr::LOCALHOST),
            NicInfo::new("veth12", Ipv4Addr::new(172, 18, 0, 2)),
        ];
        assert!(matches!(
            select_interfaces(&only_virtual, None),
            Err(Error::NoUsableInterface)
        ));
    }

    #[test]
    fn test_down_interface_discarded() {
        let mut eth0 = NicInfo::new("eth0", Ipv4Addr::new(192, 168, 1, 5));
        eth0.up = false;
        let wlan0 = NicInfo::new("wlan0", Ipv4Addr::new(10, 0, 0, 7));
        assert!(!eth0.is_usable());

        let picked = select_interfaces(&[eth0.clone(), wlan0.clone()], None).unwrap();
        assert_eq!(picked, vec![wlan0]);

        // 지정해도 내려간 인터페이스는 사용 안 함
        assert!(matches!(
            select_interfaces(&[eth0.clone()], Some("eth0")),
            Err(Error::InterfaceNotFound(_))
        ));
        assert!(matches!(
            select_interfaces(&[eth0], None),
            Err(Error::NoUsableInterface)
        ));
    }

    #[test]
    fn test_manager_failover_transitions() {
        let manager = InterfaceManager::new(None);
        let eth0 = vec![NicInfo::new("eth0", Ipv4Addr::new(192, 168, 1, 5))];

        assert_eq!(manager.apply(Ok(eth0.clone())), InterfaceChange::Changed(eth0.clone()));
        assert_eq!(manager.apply(Ok(eth0.clone())), InterfaceChange::Unchanged);
        assert!(manager.is_active());

        assert_eq!(manager.apply(Err(Error::NoUsableInterface)), InterfaceChange::Lost);
        assert!(!manager.is_active());
        // 계속 없으면 Lost 반복하지 않음
        assert_eq!(manager.apply(Err(Error::NoUsableInterface)), InterfaceChange::Unchanged);

        let wlan = vec![NicInfo::new("wlan0", Ipv4Addr::new(10, 0, 0, 7))];
        assert_eq!(manager.refresh_from(&nics()[1..2]), InterfaceChange::Changed(eth0));
        assert_eq!(manager.apply(Ok(wlan.clone())), InterfaceChange::Changed(wlan));
        assert_eq!(
            manager.local_ips(),
            vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))]
        );
    }
}
