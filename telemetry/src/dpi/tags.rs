//! Tag-driven subscription management
//!
//! Client plugins do not list attributes directly: their configuration names
//! a policy tag, and the tag's values are the attributes to subscribe to.
//! Tag definitions arrive and change at runtime, so the manager watches the
//! tags its clients reference and converts value-level deltas into
//! register/unregister calls. A client may reference a tag before it exists;
//! the reference is remembered and resolved on the next definition event.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, info, trace};

use crate::dpi::{ClientRegistry, DpiClient, DpiPlugin, PacketInfo, Verdict};
use skylink_msgbus::Msg;

/// Recognized configuration of a DPI client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name of the DPI plugin session providing attribute values.
    pub dpi_plugin: String,
    /// Tag whose values are the attributes to subscribe to.
    pub flow_attributes: Option<String>,
}

struct PluginSession {
    registry: ClientRegistry,
}

struct ClientSession {
    client: Rc<dyn DpiClient>,
    config: ClientConfig,
}

/// Session table binding DPI plugins, their client plugins and the policy
/// tags driving subscriptions.
#[derive(Default)]
pub struct DpiManager {
    plugins: BTreeMap<String, PluginSession>,
    clients: BTreeMap<String, ClientSession>,
    /// tag name → client session name
    watched_tags: BTreeMap<String, String>,
    /// currently defined tags and their values
    tags: BTreeMap<String, Vec<String>>,
}

impl DpiManager {
    pub fn new() -> DpiManager {
        DpiManager::default()
    }

    /// Add a DPI plugin session and resolve any clients already configured
    /// against it.
    ///
    /// Plugins without the client-dispatch capability are rejected.
    pub fn add_plugin(&mut self, plugin: Rc<dyn DpiPlugin>) -> bool {
        let name = plugin.name().to_string();
        let registry = match ClientRegistry::new(plugin) {
            Ok(registry) => registry,
            Err(err) => {
                debug!(plugin = %name, error = %err, "plugin refused");
                return false;
            }
        };
        self.plugins.insert(name.clone(), PluginSession { registry });
        self.register_clients(&name);
        true
    }

    /// Remove a plugin session, unregistering every live attribute.
    pub fn remove_plugin(&mut self, name: &str) {
        if let Some(mut session) = self.plugins.remove(name) {
            session.registry.unregister_all();
        }
    }

    /// Add a DPI client session.
    ///
    /// The named plugin may not be configured yet; registration resumes when
    /// it shows up. Likewise a referenced tag that is not defined yet is
    /// watched and resolved on its definition.
    pub fn add_client(&mut self, client: Rc<dyn DpiClient>, config: ClientConfig) {
        let name = client.name().to_string();
        info!(client = %name, plugin = %config.dpi_plugin, "dpi client session added");
        self.clients
            .insert(name.clone(), ClientSession { client, config });
        self.update_client(&name);
    }

    /// Remove a client session, dropping its subscriptions and tag watch.
    pub fn remove_client(&mut self, name: &str) {
        let session = match self.clients.remove(name) {
            Some(s) => s,
            None => return,
        };
        if let Some(tag) = session.config.flow_attributes.as_deref() {
            let values = self.tags.get(tag).cloned().unwrap_or_default();
            if let Some(plugin) = self.plugins.get_mut(&session.config.dpi_plugin) {
                for value in &values {
                    plugin.registry.unregister_client(name, value);
                }
            }
            // the watch only goes away with its owner
            if self.watched_tags.get(tag).map(String::as_str) == Some(name) {
                self.watched_tags.remove(tag);
            }
        }
    }

    /// Re-run the registration path for every client naming this plugin.
    pub fn register_clients(&mut self, plugin_name: &str) {
        let client_names: Vec<String> = self
            .clients
            .iter()
            .filter(|(_, s)| s.config.dpi_plugin == plugin_name)
            .map(|(name, _)| name.clone())
            .collect();
        for name in client_names {
            self.update_client(&name);
        }
    }

    /// Resolve one client's configuration into live subscriptions.
    fn update_client(&mut self, client_name: &str) {
        let (client, config) = match self.clients.get(client_name) {
            Some(s) => (s.client.clone(), s.config.clone()),
            None => return,
        };

        // remember the tag regardless; definitions may come later. The
        // first client to name a tag owns the watch; later clients naming
        // the same tag are refused and the original binding stands.
        let tag = match config.flow_attributes {
            Some(tag) => tag,
            None => return,
        };
        self.watched_tags
            .entry(tag.clone())
            .or_insert_with(|| client_name.to_string());

        let plugin = match self.plugins.get_mut(&config.dpi_plugin) {
            Some(p) => p,
            // plugin session not configured yet; registration resumes later
            None => return,
        };

        if let Some(values) = self.tags.get(&tag) {
            for value in values {
                plugin.registry.register_client(client.clone(), value);
            }
        }
    }

    /// Install or replace a tag definition, converting the value delta into
    /// subscription updates.
    pub fn define_tag(&mut self, tag: &str, values: Vec<String>) {
        let previous = self.tags.insert(tag.to_string(), values.clone());
        let previous = previous.unwrap_or_default();

        let removed: Vec<String> = previous
            .iter()
            .filter(|v| !values.contains(v))
            .cloned()
            .collect();
        let added: Vec<String> = values
            .iter()
            .filter(|v| !previous.contains(v))
            .cloned()
            .collect();
        self.process_tag_update(tag, &removed, &added, &[]);
    }

    /// Apply a tag value delta to the subscriptions of the watching client.
    pub fn process_tag_update(
        &mut self,
        tag: &str,
        removed: &[String],
        added: &[String],
        _updated: &[String],
    ) {
        let client_name = match self.watched_tags.get(tag) {
            Some(name) => name.clone(),
            None => {
                trace!(tag, "nothing to process for tag");
                return;
            }
        };
        let (client, plugin_name) = match self.clients.get(&client_name) {
            Some(s) => (s.client.clone(), s.config.dpi_plugin.clone()),
            None => return,
        };
        let plugin = match self.plugins.get_mut(&plugin_name) {
            Some(p) => p,
            None => return,
        };

        for value in removed {
            info!(tag, value = %value, client = %client_name, "unregistering tag value");
            plugin.registry.unregister_client(&client_name, value);
        }
        for value in added {
            info!(tag, value = %value, client = %client_name, "registering tag value");
            plugin.registry.register_client(client.clone(), value);
        }
    }

    /// Dispatch an observed attribute value through a plugin's registry.
    pub fn call_client(
        &self,
        plugin_name: &str,
        attr: &str,
        value: &Msg,
        pkt_info: &PacketInfo,
    ) -> Verdict {
        match self.plugins.get(plugin_name) {
            Some(p) => p.registry.call_client(attr, value, pkt_info),
            None => Verdict::Ignored,
        }
    }

    pub fn registry(&self, plugin_name: &str) -> Option<&ClientRegistry> {
        self.plugins.get(plugin_name).map(|p| &p.registry)
    }
}
