//! Ordered capability registries for security protocols and multiplexers.

use std::fmt;
use std::sync::Arc;

use libp2p::{noise, tls, yamux};
use peerscope_identity::Keypair;

use crate::RegistryError;

pub const NOISE_PROTOCOL: &str = "/noise";
pub const TLS_PROTOCOL: &str = "/tls/1.0.0";
pub const YAMUX_PROTOCOL: &str = "/yamux/1.0.0";

/// A configured security upgrade.
#[derive(Clone)]
pub enum SecurityConfig {
    Noise(noise::Config),
    Tls(tls::Config),
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Noise(_) => f.write_str("Noise"),
            Self::Tls(_) => f.write_str("Tls"),
        }
    }
}

/// A configured stream multiplexer.
#[derive(Clone)]
pub enum MuxerConfig {
    Yamux(yamux::Config),
}

/// Builds a capability for the local keypair.
pub type Factory<T> = Arc<dyn Fn(&Keypair) -> Result<T, RegistryError> + Send + Sync>;

/// A built capability and the name it is negotiated under.
///
/// Used as the upgrade's protocol info, so the selected entry carries its
/// own configuration into the handshake.
#[derive(Clone)]
pub struct Capability<T> {
    pub name: String,
    pub config: T,
}

impl<T> AsRef<str> for Capability<T> {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl<T> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Ordered `(protocol name, factory)` pairs.
///
/// Registration order is preference order when proposing.
pub struct CapabilityRegistry<T> {
    kind: &'static str,
    entries: Vec<(String, Factory<T>)>,
}

pub type SecurityRegistry = CapabilityRegistry<SecurityConfig>;
pub type MuxerRegistry = CapabilityRegistry<MuxerConfig>;

impl<T> CapabilityRegistry<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&Keypair) -> Result<T, RegistryError> + Send + Sync + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if !name.starts_with('/') || name.contains('\n') {
            return Err(RegistryError::InvalidName(name));
        }
        if self.contains(&name) {
            return Err(RegistryError::Duplicate {
                kind: self.kind,
                name,
            });
        }
        self.entries.push((name, Arc::new(factory)));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    /// Names in preference order.
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Fails if nothing is registered.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.is_empty() {
            return Err(RegistryError::Empty(self.kind));
        }
        Ok(())
    }

    /// Run every factory, keeping preference order.
    pub fn build(&self, keypair: &Keypair) -> Result<Vec<Capability<T>>, RegistryError> {
        self.validate()?;
        self.entries
            .iter()
            .map(|(name, factory)| {
                Ok(Capability {
                    name: name.clone(),
                    config: factory(keypair)?,
                })
            })
            .collect()
    }
}

impl SecurityRegistry {
    /// Registry of built-in security protocols, by name, in the given order.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, RegistryError> {
        let mut registry = Self::new("security protocol");
        for name in names {
            registry.register_builtin(name.as_ref())?;
        }
        Ok(registry)
    }

    /// Register `/noise` or `/tls/1.0.0` under its own name.
    pub fn register_builtin(&mut self, name: &str) -> Result<(), RegistryError> {
        match name {
            NOISE_PROTOCOL => self.register(name, |keypair: &Keypair| {
                noise::Config::new(keypair)
                    .map(SecurityConfig::Noise)
                    .map_err(|e| build_error(NOISE_PROTOCOL, e))
            }),
            TLS_PROTOCOL => self.register(name, |keypair: &Keypair| {
                tls::Config::new(keypair)
                    .map(SecurityConfig::Tls)
                    .map_err(|e| build_error(TLS_PROTOCOL, e))
            }),
            _ => Err(RegistryError::Unknown {
                kind: self.kind,
                name: name.to_string(),
            }),
        }
    }
}

impl MuxerRegistry {
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, RegistryError> {
        let mut registry = Self::new("stream multiplexer");
        for name in names {
            registry.register_builtin(name.as_ref())?;
        }
        Ok(registry)
    }

    /// Register `/yamux/1.0.0` under its own name.
    pub fn register_builtin(&mut self, name: &str) -> Result<(), RegistryError> {
        match name {
            YAMUX_PROTOCOL => self.register(name, |_: &Keypair| {
                Ok(MuxerConfig::Yamux(yamux::Config::default()))
            }),
            _ => Err(RegistryError::Unknown {
                kind: self.kind,
                name: name.to_string(),
            }),
        }
    }
}

fn build_error(name: &str, e: impl fmt::Display) -> RegistryError {
    RegistryError::Build {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

impl<T> Clone for CapabilityRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            entries: self.entries.clone(),
        }
    }
}

impl<T> fmt::Debug for CapabilityRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

/// `/noise`, then `/tls/1.0.0`.
pub fn default_security() -> SecurityRegistry {
    let mut registry = SecurityRegistry::new("security protocol");
    for name in [NOISE_PROTOCOL, TLS_PROTOCOL] {
        if let Err(e) = registry.register_builtin(name) {
            tracing::error!(%name, error = %e, "Built-in security protocol rejected");
        }
    }
    registry
}

/// `/yamux/1.0.0`.
pub fn default_muxers() -> MuxerRegistry {
    let mut registry = MuxerRegistry::new("stream multiplexer");
    if let Err(e) = registry.register_builtin(YAMUX_PROTOCOL) {
        tracing::error!(name = YAMUX_PROTOCOL, error = %e, "Built-in multiplexer rejected");
    }
    registry
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_default_preference_order() {
        assert_eq!(default_security().names(), vec![NOISE_PROTOCOL, TLS_PROTOCOL]);
        assert_eq!(default_muxers().names(), vec![YAMUX_PROTOCOL]);
    }

    #[test]
    fn test_build_keeps_order() {
        let keypair = Keypair::generate_ed25519();
        let registry = SecurityRegistry::from_names(&[TLS_PROTOCOL, NOISE_PROTOCOL]).unwrap();
        let built = registry.build(&keypair).unwrap();

        let names: Vec<&str> = built.iter().map(AsRef::as_ref).collect();
        assert_eq!(names, vec![TLS_PROTOCOL, NOISE_PROTOCOL]);
        assert_matches!(built.first().map(|c| &c.config), Some(SecurityConfig::Tls(_)));
    }

    #[test]
    fn test_duplicate_unknown_and_invalid_names() {
        let mut registry = SecurityRegistry::new("security protocol");
        assert_matches!(registry.validate(), Err(RegistryError::Empty(_)));

        registry.register_builtin(NOISE_PROTOCOL).unwrap();
        assert_matches!(
            registry.register_builtin(NOISE_PROTOCOL),
            Err(RegistryError::Duplicate { kind: "security protocol", .. })
        );
        assert_matches!(
            registry.register_builtin("/sts/1.0.0"),
            Err(RegistryError::Unknown { .. })
        );
        assert_matches!(
            registry.register("no-slash", |_: &Keypair| Err(RegistryError::Empty("x"))),
            Err(RegistryError::InvalidName(_))
        );
        assert!(registry.validate().is_ok());

        assert_matches!(
            MuxerRegistry::from_names(&["/mplex/6.7.0"]),
            Err(RegistryError::Unknown { kind: "stream multiplexer", .. })
        );
    }

    #[test]
    fn test_custom_name_for_builtin_config() {
        let mut registry = MuxerRegistry::new("stream multiplexer");
        registry
            .register("/yamux/custom", |_: &Keypair| {
                Ok(MuxerConfig::Yamux(yamux::Config::default()))
            })
            .unwrap();
        let built = registry.build(&Keypair::generate_ed25519()).unwrap();
        assert_eq!(built.first().map(|c| c.name.as_str()), Some("/yamux/custom"));
    }
}
