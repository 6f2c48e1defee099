//! In-memory stand-ins for the kernel, the packet filter and sibling
//! daemons.
//!
//! The fakes keep just enough state to observe reconciliation: link names,
//! hardware addresses, bridge membership, link state, addresses, routes,
//! the committed ruleset and counter values. Every successful mutation is
//! appended to a log; failures can be injected per operation and link.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use router_cfgmgr_common::{CfgMgrError, CfgMgrResult, IpcSignal, ProcessNotifier};
use router_netconfigd::nft::render::render_batch;
use router_netconfigd::nft::{Batch, CounterValue, PacketFilter, Table};
use router_netconfigd::{Link, NetControl, OperState, Route};
use router_types::{AddressFamily, IpPrefix, MacAddress};

/// A link as the fake kernel stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeLink {
    /// Interface index.
    pub index: u32,
    /// Current name.
    pub name: String,
    /// Current hardware address.
    pub mac: Option<MacAddress>,
    /// Administrative state.
    pub up: bool,
    /// Bridge this link is enslaved to.
    pub master: Option<String>,
    /// True for bridge devices.
    pub bridge: bool,
    /// Configured addresses, in insertion order.
    pub addresses: Vec<IpPrefix>,
}

/// Everything the fake kernel knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelState {
    /// Links, in creation order.
    pub links: Vec<FakeLink>,
    /// Routes, one per destination.
    pub routes: Vec<Route>,
}

impl KernelState {
    /// Looks up a link by name.
    pub fn link(&self, name: &str) -> Option<&FakeLink> {
        self.links.iter().find(|l| l.name == name)
    }

    fn link_mut(&mut self, name: &str) -> CfgMgrResult<&mut FakeLink> {
        self.links
            .iter_mut()
            .find(|l| l.name == name)
            .ok_or_else(|| rtnetlink_error("link", name, "Cannot find device"))
    }

    fn contains(&self, name: &str) -> bool {
        self.links.iter().any(|l| l.name == name)
    }
}

/// A successful change made through [`FakeNetControl`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AddBridge(String),
    SetName { from: String, to: String },
    SetHardwareAddr { link: String, mac: MacAddress },
    SetMaster { link: String, master: String },
    SetUp(String),
    ReplaceAddress { link: String, address: IpPrefix },
    DeleteAddress { link: String, address: IpPrefix },
    ReplaceRoute(Route),
}

fn rtnetlink_error(op: &str, link: &str, message: &str) -> CfgMgrError {
    CfgMgrError::ShellCommandFailed {
        command: format!("fake {} {}", op, link),
        exit_code: 2,
        output: format!("RTNETLINK answers: {}", message),
    }
}

#[derive(Debug, Default)]
struct KernelInner {
    state: KernelState,
    log: Vec<Mutation>,
    failures: HashSet<(String, String)>,
    next_index: u32,
}

impl KernelInner {
    fn check(&self, op: &str, link: &str) -> CfgMgrResult<()> {
        let key = |l: &str| (op.to_string(), l.to_string());
        if self.failures.contains(&key(link)) || self.failures.contains(&key("*")) {
            return Err(rtnetlink_error(op, link, "Operation not permitted"));
        }
        Ok(())
    }

    fn push_link(&mut self, name: &str, mac: Option<MacAddress>, bridge: bool) {
        self.next_index += 1;
        self.state.links.push(FakeLink {
            index: self.next_index,
            name: name.to_string(),
            mac,
            up: false,
            master: None,
            bridge,
            addresses: Vec::new(),
        });
    }
}

/// In-memory [`NetControl`].
#[derive(Debug, Default)]
pub struct FakeNetControl {
    inner: Mutex<KernelInner>,
}

impl FakeNetControl {
    /// Creates a kernel without links.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a physical link that is down and unaddressed.
    pub fn with_link(self, name: &str, mac: &str) -> Self {
        self.add_link(name, mac.parse().ok());
        self
    }

    /// Adds a physical link that is down and unaddressed.
    pub fn add_link(&self, name: &str, mac: Option<MacAddress>) {
        self.inner.lock().push_link(name, mac, false);
    }

    /// Adds an address directly, without logging a mutation.
    pub fn seed_address(&self, link: &str, address: IpPrefix) {
        let mut inner = self.inner.lock();
        if let Ok(l) = inner.state.link_mut(link) {
            l.addresses.push(address);
        }
    }

    /// Makes `op` fail for `link`. `"*"` matches every link; `links` fails
    /// with link `"*"`.
    pub fn fail(&self, op: &str, link: &str) {
        self.inner
            .lock()
            .failures
            .insert((op.to_string(), link.to_string()));
    }

    /// Returns a copy of the current state.
    pub fn state(&self) -> KernelState {
        self.inner.lock().state.clone()
    }

    /// Returns the mutations made so far.
    pub fn mutations(&self) -> Vec<Mutation> {
        self.inner.lock().log.clone()
    }

    /// Forgets the mutations made so far.
    pub fn clear_mutations(&self) {
        self.inner.lock().log.clear();
    }
}

#[async_trait]
impl NetControl for FakeNetControl {
    async fn links(&self) -> CfgMgrResult<Vec<Link>> {
        let inner = self.inner.lock();
        inner.check("links", "*")?;
        Ok(inner
            .state
            .links
            .iter()
            .map(|l| Link {
                index: l.index,
                name: l.name.clone(),
                mac: l.mac,
                oper_state: if l.up { OperState::Up } else { OperState::Down },
                master: l.master.clone(),
            })
            .collect())
    }

    async fn add_bridge(&self, name: &str) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("add_bridge", name)?;
        if inner.state.contains(name) {
            return Err(rtnetlink_error("add_bridge", name, "File exists"));
        }
        // Random locally administered address until a port is added.
        let mac = MacAddress::new([0x02, 0, 0, 0, 0xbb, (inner.next_index + 1) as u8]);
        inner.push_link(name, Some(mac), true);
        inner.log.push(Mutation::AddBridge(name.to_string()));
        Ok(())
    }

    async fn set_name(&self, link: &str, new_name: &str) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("set_name", link)?;
        if inner.state.contains(new_name) {
            return Err(rtnetlink_error("set_name", link, "File exists"));
        }
        inner.state.link_mut(link)?.name = new_name.to_string();
        for other in &mut inner.state.links {
            if other.master.as_deref() == Some(link) {
                other.master = Some(new_name.to_string());
            }
        }
        for route in &mut inner.state.routes {
            if route.dev == link {
                route.dev = new_name.to_string();
            }
        }
        inner.log.push(Mutation::SetName {
            from: link.to_string(),
            to: new_name.to_string(),
        });
        Ok(())
    }

    async fn set_hardware_addr(&self, link: &str, mac: MacAddress) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("set_hardware_addr", link)?;
        inner.state.link_mut(link)?.mac = Some(mac);
        inner.log.push(Mutation::SetHardwareAddr {
            link: link.to_string(),
            mac,
        });
        Ok(())
    }

    async fn set_master(&self, link: &str, master: &str) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("set_master", link)?;
        if link == master {
            return Err(rtnetlink_error("set_master", link, "Invalid argument"));
        }
        match inner.state.link(master) {
            Some(l) if l.bridge => {}
            Some(_) => return Err(rtnetlink_error("set_master", master, "Operation not supported")),
            None => return Err(rtnetlink_error("set_master", master, "Cannot find device")),
        }
        let first_port = !inner
            .state
            .links
            .iter()
            .any(|l| l.master.as_deref() == Some(master));

        let port = inner.state.link_mut(link)?;
        port.master = Some(master.to_string());
        let port_mac = port.mac;

        // A bridge takes over the address of its first port.
        if first_port {
            inner.state.link_mut(master)?.mac = port_mac;
        }
        inner.log.push(Mutation::SetMaster {
            link: link.to_string(),
            master: master.to_string(),
        });
        Ok(())
    }

    async fn set_up(&self, link: &str) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("set_up", link)?;
        inner.state.link_mut(link)?.up = true;
        inner.log.push(Mutation::SetUp(link.to_string()));
        Ok(())
    }

    async fn addresses(&self, link: &str, family: AddressFamily) -> CfgMgrResult<Vec<IpPrefix>> {
        let mut inner = self.inner.lock();
        inner.check("addresses", link)?;
        Ok(inner
            .state
            .link_mut(link)?
            .addresses
            .iter()
            .filter(|a| a.family() == family)
            .copied()
            .collect())
    }

    async fn replace_address(&self, link: &str, address: IpPrefix) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("replace_address", link)?;
        let l = inner.state.link_mut(link)?;
        if !l.addresses.contains(&address) {
            l.addresses.push(address);
        }
        inner.log.push(Mutation::ReplaceAddress {
            link: link.to_string(),
            address,
        });
        Ok(())
    }

    async fn delete_address(&self, link: &str, address: IpPrefix) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("delete_address", link)?;
        let l = inner.state.link_mut(link)?;
        let before = l.addresses.len();
        l.addresses.retain(|a| *a != address);
        if l.addresses.len() == before {
            return Err(rtnetlink_error(
                "delete_address",
                link,
                "Cannot assign requested address",
            ));
        }
        inner.log.push(Mutation::DeleteAddress {
            link: link.to_string(),
            address,
        });
        Ok(())
    }

    async fn replace_route(&self, route: &Route) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        inner.check("replace_route", &route.dev)?;
        if !inner.state.contains(&route.dev) {
            return Err(rtnetlink_error("replace_route", &route.dev, "Cannot find device"));
        }
        let routes = &mut inner.state.routes;
        match routes.iter_mut().find(|r| r.destination == route.destination) {
            Some(existing) => *existing = route.clone(),
            None => routes.push(route.clone()),
        }
        inner.log.push(Mutation::ReplaceRoute(route.clone()));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct FilterInner {
    committed: Option<Batch>,
    script: Option<String>,
    counters: HashMap<(Table, String), CounterValue>,
    commits: usize,
    fail_commit: Option<String>,
    fail_counters: bool,
}

/// In-memory [`PacketFilter`].
///
/// Commits replace the whole ruleset, counters included, and are rejected
/// if the batch cannot be rendered, like `nft -f` would.
#[derive(Debug, Default)]
pub struct FakePacketFilter {
    inner: Mutex<FilterInner>,
}

impl FakePacketFilter {
    /// Creates an empty packet filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the last committed batch.
    pub fn committed(&self) -> Option<Batch> {
        self.inner.lock().committed.clone()
    }

    /// Returns the script of the last committed batch.
    pub fn script(&self) -> Option<String> {
        self.inner.lock().script.clone()
    }

    /// Returns the number of successful commits.
    pub fn commit_count(&self) -> usize {
        self.inner.lock().commits
    }

    /// Returns the live value of a counter.
    pub fn counter_value(&self, table: &Table, name: &str) -> Option<CounterValue> {
        self.inner
            .lock()
            .counters
            .get(&(table.clone(), name.to_string()))
            .copied()
    }

    /// Simulates traffic hitting an installed counter.
    pub fn bump_counter(&self, table: &Table, name: &str, packets: u64, bytes: u64) {
        if let Some(value) = self
            .inner
            .lock()
            .counters
            .get_mut(&(table.clone(), name.to_string()))
        {
            value.packets += packets;
            value.bytes += bytes;
        }
    }

    /// Makes every commit fail with `message`.
    pub fn fail_commit(&self, message: &str) {
        self.inner.lock().fail_commit = Some(message.to_string());
    }

    /// Makes counter reads fail.
    pub fn fail_counters(&self) {
        self.inner.lock().fail_counters = true;
    }
}

#[async_trait]
impl PacketFilter for FakePacketFilter {
    async fn counter(&self, table: &Table, name: &str) -> CfgMgrResult<Option<CounterValue>> {
        let inner = self.inner.lock();
        if inner.fail_counters {
            return Err(CfgMgrError::netfilter("list counter", "Operation not permitted"));
        }
        Ok(inner
            .counters
            .get(&(table.clone(), name.to_string()))
            .copied())
    }

    async fn commit(&self, batch: &Batch) -> CfgMgrResult<()> {
        let mut inner = self.inner.lock();
        if let Some(message) = &inner.fail_commit {
            return Err(CfgMgrError::netfilter("commit", message.clone()));
        }
        let script = render_batch(batch)?;

        inner.counters = batch
            .counters()
            .map(|c| ((c.table.clone(), c.name.clone()), c.value))
            .collect();
        inner.committed = Some(batch.clone());
        inner.script = Some(script);
        inner.commits += 1;
        Ok(())
    }
}

/// [`ProcessNotifier`] that records signals instead of sending them.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, IpcSignal)>>,
    running: Option<HashSet<String>>,
}

impl RecordingNotifier {
    /// Creates a notifier for which every process is running.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a notifier for which only `processes` are running.
    pub fn with_running(processes: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            running: Some(processes.iter().map(|p| p.to_string()).collect()),
        }
    }

    /// Returns the signals delivered so far, in order.
    pub fn sent(&self) -> Vec<(String, IpcSignal)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ProcessNotifier for RecordingNotifier {
    async fn notify(&self, process: &str, signal: IpcSignal) -> CfgMgrResult<()> {
        if let Some(running) = &self.running {
            if !running.contains(process) {
                return Err(CfgMgrError::notify(process, "no running process"));
            }
        }
        self.sent.lock().push((process.to_string(), signal));
        Ok(())
    }
}
