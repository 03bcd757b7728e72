//! DPI client registry
//!
//! A DPI plugin decodes flow attributes (DNS names, SNI, app markers) out of
//! the packet stream; client plugins subscribe to individual attributes and
//! return a verdict per observed value. The registry keeps, per plugin, the
//! attribute → subscriber multimap, drives the plugin's own register/
//! unregister callbacks exactly once per attribute lifetime, and reduces
//! subscriber verdicts through a weighted action ladder.

pub mod tags;

use std::cmp::Ordering;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, trace};

use crate::flow::acc::AccHandle;
use skylink_msgbus::Msg;

/// Verdict a client returns for an observed attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clear,
    Ignored,
    Passthru,
    Inspect,
    Drop,
}

impl Verdict {
    /// Raw code as exchanged with plugins.
    pub fn code(self) -> i32 {
        match self {
            Verdict::Clear => 0,
            Verdict::Ignored => 1,
            Verdict::Passthru => 2,
            Verdict::Inspect => 3,
            Verdict::Drop => 4,
        }
    }

    /// Codes outside the ladder do not combine and map to `None`.
    pub fn from_code(code: i32) -> Option<Verdict> {
        match code {
            0 => Some(Verdict::Clear),
            1 => Some(Verdict::Ignored),
            2 => Some(Verdict::Passthru),
            3 => Some(Verdict::Inspect),
            4 => Some(Verdict::Drop),
            _ => None,
        }
    }

    /// Combination weight; the highest weight wins.
    pub fn weight(self) -> u32 {
        match self {
            Verdict::Clear => 0,
            Verdict::Ignored => 10,
            Verdict::Passthru => 20,
            Verdict::Inspect => 30,
            Verdict::Drop => 40,
        }
    }
}

/// Packet context handed to subscribers along with the attribute value.
#[derive(Default)]
pub struct PacketInfo {
    /// Accumulator of the flow the attribute was seen on, when known.
    pub acc: Option<AccHandle>,
}

/// A DPI plugin session.
pub trait DpiPlugin {
    fn name(&self) -> &str;

    /// Client-dispatch capability. A plugin that does not implement it
    /// cannot accept subscribers; the registry refuses to be built on it.
    fn client_support(&self) -> Option<&dyn ClientSupport>;
}

/// The capability a plugin must expose to host subscribers.
pub trait ClientSupport {
    /// Start producing values for an attribute. Called exactly once when the
    /// attribute gains its first subscriber.
    fn register_attr(&self, attr: &str);

    /// Stop producing values for an attribute. Called exactly once when the
    /// attribute loses its last subscriber.
    fn unregister_attr(&self, attr: &str);

    /// Ordering of the attribute table.
    fn attr_cmp(&self, a: &str, b: &str) -> Ordering {
        a.cmp(b)
    }
}

/// A client plugin subscribing to flow attributes.
pub trait DpiClient {
    fn name(&self) -> &str;

    /// Process one observed attribute value, returning a raw verdict code.
    fn process_attr(&self, attr: &str, value: &Msg, pkt_info: &PacketInfo) -> i32;
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("plugin {0} does not support clients")]
    NoClientSupport(String),
}

struct Subscriber {
    name: String,
    client: Rc<dyn DpiClient>,
}

struct AttrClients {
    attr: String,
    subs: Vec<Subscriber>,
}

/// Attribute → subscriber multimap of one DPI plugin.
pub struct ClientRegistry {
    plugin: Rc<dyn DpiPlugin>,
    attrs: Vec<AttrClients>,
}

impl ClientRegistry {
    /// Build the registry for a plugin. Refused when the plugin lacks the
    /// client-dispatch capability.
    pub fn new(plugin: Rc<dyn DpiPlugin>) -> Result<ClientRegistry, RegistryError> {
        if plugin.client_support().is_none() {
            return Err(RegistryError::NoClientSupport(plugin.name().to_string()));
        }
        Ok(ClientRegistry {
            plugin,
            attrs: Vec::new(),
        })
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    fn support(&self) -> &dyn ClientSupport {
        // checked at construction
        match self.plugin.client_support() {
            Some(s) => s,
            None => unreachable!("registry built without client support"),
        }
    }

    fn find_attr(&self, attr: &str) -> Result<usize, usize> {
        let support = self.support();
        self.attrs
            .binary_search_by(|entry| support.attr_cmp(&entry.attr, attr))
    }

    /// Subscribe a client to an attribute.
    ///
    /// The plugin's own attribute registration fires only on the empty →
    /// non-empty transition of the subscriber set.
    pub fn register_client(&mut self, client: Rc<dyn DpiClient>, attr: &str) {
        let idx = match self.find_attr(attr) {
            Ok(idx) => idx,
            Err(idx) => {
                self.attrs.insert(
                    idx,
                    AttrClients {
                        attr: attr.to_string(),
                        subs: Vec::new(),
                    },
                );
                self.support().register_attr(attr);
                debug!(plugin = self.plugin.name(), attr, "attribute registered");
                idx
            }
        };

        let entry = &mut self.attrs[idx];
        let sub = Subscriber {
            name: client.name().to_string(),
            client,
        };
        // deterministic dispatch order: sorted by subscriber name
        let pos = entry
            .subs
            .partition_point(|s| s.name.as_str() <= sub.name.as_str());
        trace!(
            plugin = self.plugin.name(),
            attr,
            client = %sub.name,
            "subscriber added"
        );
        entry.subs.insert(pos, sub);
    }

    /// Drop every subscription of a client on an attribute. The plugin's
    /// attribute unregistration fires when the set becomes empty.
    pub fn unregister_client(&mut self, client_name: &str, attr: &str) {
        let idx = match self.find_attr(attr) {
            Ok(idx) => idx,
            Err(_) => return,
        };

        let entry = &mut self.attrs[idx];
        entry.subs.retain(|s| s.name != client_name);
        if !entry.subs.is_empty() {
            return;
        }

        let removed = self.attrs.remove(idx);
        self.support().unregister_attr(&removed.attr);
        debug!(
            plugin = self.plugin.name(),
            attr = %removed.attr,
            "attribute unregistered"
        );
    }

    /// Tear down every attribute, unregistering each from the plugin once.
    pub fn unregister_all(&mut self) {
        let attrs: Vec<AttrClients> = self.attrs.drain(..).collect();
        for entry in attrs {
            self.support().unregister_attr(&entry.attr);
        }
    }

    pub fn attr_count(&self) -> usize {
        self.attrs.len()
    }

    pub fn subscriber_count(&self, attr: &str) -> usize {
        match self.find_attr(attr) {
            Ok(idx) => self.attrs[idx].subs.len(),
            Err(_) => 0,
        }
    }

    /// Fan an observed attribute value out to its subscribers and combine
    /// their verdicts: the highest ladder weight wins, codes outside the
    /// ladder are skipped, and no subscriber at all means `Ignored`.
    pub fn call_client(&self, attr: &str, value: &Msg, pkt_info: &PacketInfo) -> Verdict {
        let mut verdict = Verdict::Ignored;

        let idx = match self.find_attr(attr) {
            Ok(idx) => idx,
            Err(_) => return verdict,
        };

        for sub in &self.attrs[idx].subs {
            let code = sub.client.process_attr(attr, value, pkt_info);
            let candidate = match Verdict::from_code(code) {
                Some(v) => v,
                None => {
                    trace!(client = %sub.name, code, "verdict outside ladder, skipped");
                    continue;
                }
            };
            if candidate.weight() > verdict.weight() {
                trace!(
                    client = %sub.name,
                    previous = ?verdict,
                    new = ?candidate,
                    "verdict escalated"
                );
                verdict = candidate;
            }
        }

        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct PluginCalls {
        registered: RefCell<Vec<String>>,
        unregistered: RefCell<Vec<String>>,
    }

    struct TestPlugin {
        name: String,
        calls: Rc<PluginCalls>,
    }

    impl DpiPlugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }
        fn client_support(&self) -> Option<&dyn ClientSupport> {
            Some(self)
        }
    }

    impl ClientSupport for TestPlugin {
        fn register_attr(&self, attr: &str) {
            self.calls.registered.borrow_mut().push(attr.to_string());
        }
        fn unregister_attr(&self, attr: &str) {
            self.calls.unregistered.borrow_mut().push(attr.to_string());
        }
    }

    struct MutePlugin;
    impl DpiPlugin for MutePlugin {
        fn name(&self) -> &str {
            "mute"
        }
        fn client_support(&self) -> Option<&dyn ClientSupport> {
            None
        }
    }

    struct TestClient {
        name: String,
        code: i32,
    }

    impl DpiClient for TestClient {
        fn name(&self) -> &str {
            &self.name
        }
        fn process_attr(&self, _attr: &str, _value: &Msg, _pkt: &PacketInfo) -> i32 {
            self.code
        }
    }

    fn registry() -> (ClientRegistry, Rc<PluginCalls>) {
        let calls = Rc::new(PluginCalls::default());
        let plugin = Rc::new(TestPlugin {
            name: "dns".into(),
            calls: calls.clone(),
        });
        (ClientRegistry::new(plugin).unwrap(), calls)
    }

    fn client(name: &str, code: i32) -> Rc<dyn DpiClient> {
        Rc::new(TestClient {
            name: name.into(),
            code,
        })
    }

    #[test]
    fn test_plugin_without_capability_refused() {
        assert!(ClientRegistry::new(Rc::new(MutePlugin)).is_err());
    }

    #[test]
    fn test_attr_registered_exactly_once() {
        let (mut reg, calls) = registry();
        reg.register_client(client("a", 2), "dns.q");
        reg.register_client(client("b", 2), "dns.q");
        reg.register_client(client("c", 2), "dns.q");
        assert_eq!(calls.registered.borrow().as_slice(), ["dns.q"]);
        assert_eq!(reg.subscriber_count("dns.q"), 3);

        reg.unregister_client("a", "dns.q");
        reg.unregister_client("b", "dns.q");
        assert!(calls.unregistered.borrow().is_empty());

        reg.unregister_client("c", "dns.q");
        assert_eq!(calls.unregistered.borrow().as_slice(), ["dns.q"]);
        assert_eq!(reg.attr_count(), 0);

        // a fresh first subscriber registers again
        reg.register_client(client("a", 2), "dns.q");
        assert_eq!(calls.registered.borrow().as_slice(), ["dns.q", "dns.q"]);
    }

    #[test]
    fn test_unregister_unknown_attr_is_noop() {
        let (mut reg, calls) = registry();
        reg.unregister_client("a", "never.registered");
        assert!(calls.unregistered.borrow().is_empty());
    }

    #[test]
    fn test_unregister_all_sweeps_each_attr_once() {
        let (mut reg, calls) = registry();
        reg.register_client(client("a", 2), "dns.q");
        reg.register_client(client("a", 2), "tls.sni");
        reg.register_client(client("b", 2), "tls.sni");
        reg.unregister_all();
        let mut unregistered = calls.unregistered.borrow().clone();
        unregistered.sort();
        assert_eq!(unregistered, ["dns.q", "tls.sni"]);
        assert_eq!(reg.attr_count(), 0);
    }

    #[test]
    fn test_ladder_max_wins() {
        let (mut reg, _calls) = registry();
        reg.register_client(client("a", Verdict::Passthru.code()), "dns.q");
        reg.register_client(client("b", Verdict::Inspect.code()), "dns.q");
        reg.register_client(client("c", Verdict::Drop.code()), "dns.q");

        let verdict = reg.call_client("dns.q", &Msg::from("example.com"), &PacketInfo::default());
        assert_eq!(verdict, Verdict::Drop);
    }

    #[test]
    fn test_ladder_skips_unknown_codes() {
        let (mut reg, _calls) = registry();
        reg.register_client(client("a", 99), "dns.q");
        reg.register_client(client("b", -3), "dns.q");
        reg.register_client(client("c", Verdict::Passthru.code()), "dns.q");

        let verdict = reg.call_client("dns.q", &Msg::from("example.com"), &PacketInfo::default());
        assert_eq!(verdict, Verdict::Passthru);
    }

    #[test]
    fn test_no_subscriber_defaults_to_ignored() {
        let (reg, _calls) = registry();
        let verdict = reg.call_client("dns.q", &Msg::Null, &PacketInfo::default());
        assert_eq!(verdict, Verdict::Ignored);
    }

    #[test]
    fn test_clear_never_downgrades_default() {
        let (mut reg, _calls) = registry();
        reg.register_client(client("a", Verdict::Clear.code()), "dns.q");
        let verdict = reg.call_client("dns.q", &Msg::Null, &PacketInfo::default());
        // clear weighs less than the ignored default
        assert_eq!(verdict, Verdict::Ignored);
    }
}
