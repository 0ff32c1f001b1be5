//! Fast enricher #4: per-IP and per-/24 velocity (spec.md §4.1.1.4).

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Mutex;

const SUBNET_WINDOW: Duration = Duration::minutes(5);
const SUBNET_ALERT_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct VelocityResult {
    pub rapid_fire: bool,
    pub sub_second_dupe: bool,
    pub subnet_alert: bool,
}

#[derive(Default)]
struct IpHistory {
    hits: Vec<DateTime<Utc>>,
}

#[derive(Default)]
struct SubnetHistory {
    hits: Vec<(DateTime<Utc>, IpAddr)>,
}

pub struct VelocityTracker {
    by_ip: Mutex<HashMap<IpAddr, IpHistory>>,
    by_subnet: Mutex<HashMap<String, SubnetHistory>>,
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self {
            by_ip: Mutex::new(HashMap::new()),
            by_subnet: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, ip: IpAddr) -> VelocityResult {
        let now = Utc::now();
        let (rapid_fire, sub_second_dupe) = self.observe_ip(ip, now);
        let subnet_alert = self.observe_subnet(ip, now);
        VelocityResult {
            rapid_fire,
            sub_second_dupe,
            subnet_alert,
        }
    }

    fn observe_ip(&self, ip: IpAddr, now: DateTime<Utc>) -> (bool, bool) {
        let mut map = self.by_ip.lock().unwrap();
        let entry = map.entry(ip).or_default();
        entry.hits.retain(|t| now - *t <= Duration::seconds(15));

        // rapid-fire: >=2 hits within 15s (before pushing the current one,
        // the prior hit must already be inside the window)
        let rapid_fire = !entry.hits.is_empty();
        // sub-second duplicate: gap < 1s since the most recent prior hit
        let sub_second_dupe = entry
            .hits
            .last()
            .map(|t| now - *t < Duration::seconds(1))
            .unwrap_or(false);

        entry.hits.push(now);
        (rapid_fire, sub_second_dupe)
    }

    fn observe_subnet(&self, ip: IpAddr, now: DateTime<Utc>) -> bool {
        let subnet_key = subnet_24_key(ip);
        let mut map = self.by_subnet.lock().unwrap();
        let entry = map.entry(subnet_key).or_default();
        entry.hits.retain(|(t, _)| now - *t <= SUBNET_WINDOW);
        entry.hits.push((now, ip));

        let distinct: HashSet<IpAddr> = entry.hits.iter().map(|(_, i)| *i).collect();
        distinct.len() >= SUBNET_ALERT_THRESHOLD
    }

    pub fn prune_expired(&self) {
        let now = Utc::now();
        let mut by_ip = self.by_ip.lock().unwrap();
        by_ip.retain(|_, h| {
            h.hits.retain(|t| now - *t <= Duration::seconds(15));
            !h.hits.is_empty()
        });
        let mut by_subnet = self.by_subnet.lock().unwrap();
        by_subnet.retain(|_, h| {
            h.hits.retain(|(t, _)| now - *t <= SUBNET_WINDOW);
            !h.hits.is_empty()
        });
    }
}

fn subnet_24_key(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        IpAddr::V6(v6) => format!("{}::/64", v6.segments()[0]),
    }
}

pub fn spawn_sweeper(tracker: std::sync::Arc<VelocityTracker>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            ticker.tick().await;
            tracker.prune_expired();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_hit_within_15s_is_rapid_fire() {
        let tracker = VelocityTracker::new();
        let ip = "1.2.3.4".parse().unwrap();
        let first = tracker.observe(ip);
        assert!(!first.rapid_fire);
        let second = tracker.observe(ip);
        assert!(second.rapid_fire);
    }

    #[test]
    fn subnet_alert_fires_at_three_distinct_ips_in_one_slash24() {
        let tracker = VelocityTracker::new();
        tracker.observe("10.0.0.1".parse().unwrap());
        tracker.observe("10.0.0.2".parse().unwrap());
        let result = tracker.observe("10.0.0.3".parse().unwrap());
        assert!(result.subnet_alert);
    }

    #[test]
    fn different_subnets_do_not_trigger_each_other() {
        let tracker = VelocityTracker::new();
        tracker.observe("10.0.0.1".parse().unwrap());
        tracker.observe("10.0.1.1".parse().unwrap());
        let result = tracker.observe("10.0.2.1".parse().unwrap());
        assert!(!result.subnet_alert);
    }
}
