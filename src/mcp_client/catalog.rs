//! Server descriptor catalog: the static name → descriptor mapping.
//!
//! Built once from configuration and shared read-only (`Arc<ServerCatalog>`)
//! by the client and every transport created from it.

use std::collections::{BTreeMap, HashMap};

use super::types::ServerConfig;

/// Read-only lookup of configured servers.
#[derive(Debug, Clone, Default)]
pub struct ServerCatalog {
    servers: BTreeMap<String, ServerConfig>,
}

impl ServerCatalog {
    /// Build a catalog from a name-keyed map. Each descriptor's `name` is
    /// set to its key.
    pub fn new(servers: HashMap<String, ServerConfig>) -> Self {
        let servers = servers
            .into_iter()
            .map(|(name, mut config)| {
                config.name = name.clone();
                (name, config)
            })
            .collect();
        Self { servers }
    }

    /// Build a catalog from descriptors that already carry their names.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ServerConfig>) -> Self {
        let servers = descriptors
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();
        Self { servers }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.servers.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    /// All configured server names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ServerConfig)> {
        self.servers.iter()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ServerCatalog {
        let mut servers = HashMap::new();
        servers.insert("zeta".to_string(), ServerConfig::stdio("", "npx", &[]));
        servers.insert(
            "alpha".to_string(),
            ServerConfig::sse("", "https://example.com/sse"),
        );
        ServerCatalog::new(servers)
    }

    #[test]
    fn test_exists_iff_key() {
        let catalog = catalog();
        for name in catalog.names() {
            assert!(catalog.exists(&name));
        }
        assert!(!catalog.exists("missing"));
        assert!(!catalog.exists(""));
    }

    #[test]
    fn test_names_sorted_and_descriptor_named() {
        let catalog = catalog();
        assert_eq!(catalog.names(), vec!["alpha", "zeta"]);
        assert_eq!(catalog.get("zeta").unwrap().name, "zeta");
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn test_from_descriptors() {
        let catalog = ServerCatalog::from_descriptors([ServerConfig::stdio("echo", "echo", &[])]);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.exists("echo"));
    }
}
