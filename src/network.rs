use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
    time::{Duration, Instant},
};

use sysinfo::Networks;

/// An interface whose byte counters have not moved for this long no longer
/// counts as attached.
const ACTIVITY_WINDOW: Duration = Duration::from_secs(60);

/// Platform view of network attachment. No reachability request is made; a
/// false positive simply surfaces as a failed transfer.
pub trait NetworkStatus: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Reports connected when a non-loopback interface has moved traffic within
/// the last [`ACTIVITY_WINDOW`].
pub struct SystemNetworkStatus {
    inner: Mutex<SystemNetworks>,
}

struct SystemNetworks {
    networks: Networks,
    activity: TrafficActivity,
}

impl SystemNetworkStatus {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SystemNetworks {
                networks: Networks::new_with_refreshed_list(),
                activity: TrafficActivity::default(),
            }),
        }
    }
}

impl Default for SystemNetworkStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkStatus for SystemNetworkStatus {
    fn is_connected(&self) -> bool {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let SystemNetworks { networks, activity } = &mut *guard;
        networks.refresh_list();
        networks.refresh();

        let totals = networks
            .iter()
            .filter(|(name, _)| !is_loopback(name))
            .map(|(name, data)| {
                (
                    name.as_str(),
                    data.total_received() + data.total_transmitted(),
                )
            });
        activity.observe(totals, Instant::now())
    }
}

/// Remembers when each interface last moved bytes.
#[derive(Debug, Default)]
struct TrafficActivity {
    interfaces: HashMap<String, InterfaceTraffic>,
}

#[derive(Debug)]
struct InterfaceTraffic {
    total: u64,
    last_moved: Option<Instant>,
}

impl TrafficActivity {
    /// Records the current byte totals and reports whether any interface moved
    /// traffic within the window. Interfaces first seen with traffic count as
    /// active; interfaces that vanished are forgotten.
    fn observe<'a>(&mut self, totals: impl Iterator<Item = (&'a str, u64)>, now: Instant) -> bool {
        let mut seen = HashMap::new();

        for (name, total) in totals {
            let last_moved = match self.interfaces.remove(name) {
                Some(previous) if previous.total == total => previous.last_moved,
                Some(_) => Some(now),
                None => (total > 0).then_some(now),
            };
            seen.insert(name.to_string(), InterfaceTraffic { total, last_moved });
        }
        self.interfaces = seen;

        self.interfaces.values().any(|traffic| {
            traffic
                .last_moved
                .is_some_and(|moved| now.duration_since(moved) <= ACTIVITY_WINDOW)
        })
    }
}

fn is_loopback(interface: &str) -> bool {
    interface == "lo" || interface.starts_with("lo0") || interface.starts_with("loopback")
}

/// Fixed answer that can be flipped at runtime, for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticNetworkStatus {
    connected: AtomicBool,
}

impl StaticNetworkStatus {
    pub fn new(connected: bool) -> Self {
        Self {
            connected: AtomicBool::new(connected),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl NetworkStatus for StaticNetworkStatus {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
