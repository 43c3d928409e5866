//! Host-name resolution. The engine needs a socket address before it can
//! open a socket and start probing, but how that address is obtained is
//! deliberately pluggable: this module defines the seam and ships one
//! default implementation backed by the system's DNS configuration.

use std::net::IpAddr;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

/// The address-family preference passed to the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressStyle {
    Any,
    V4,
    V6,
}

/// A pluggable name resolver. The engine calls this once, at start, and
/// treats any error as terminal (`ErrorKind::ResolutionFailed`).
pub trait Resolver {
    fn resolve(&self, host_name: &str, style: AddressStyle) -> anyhow::Result<Vec<IpAddr>>;
}

/// The default resolver, backed by `hickory_resolver::TokioAsyncResolver`.
/// The engine's hop loop is synchronous, so this drives the one async
/// lookup call through a throwaway current-thread `tokio` runtime rather
/// than requiring the whole engine to run inside one (see DESIGN.md).
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for SystemResolver {
    fn resolve(&self, host_name: &str, style: AddressStyle) -> anyhow::Result<Vec<IpAddr>> {
        // An address literal never touches the resolver.
        if let Ok(addr) = host_name.parse::<IpAddr>() {
            return Ok(vec![addr]);
        }

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let lookup = rt.block_on(self.resolver.lookup_ip(host_name))?;

        let addrs: Vec<IpAddr> = lookup
            .iter()
            .filter(|addr| match style {
                AddressStyle::Any => true,
                AddressStyle::V4 => addr.is_ipv4(),
                AddressStyle::V6 => addr.is_ipv6(),
            })
            .collect();

        if addrs.is_empty() {
            anyhow::bail!("no address of the requested family for {host_name}");
        }
        Ok(addrs)
    }
}

/// Picks one address from a resolved list per the preference rules of spec
/// §6: "prefer v4 on dual-stack responses, for compatibility" when `Any`.
pub fn pick_preferred(addrs: &[IpAddr], style: AddressStyle) -> Option<IpAddr> {
    match style {
        AddressStyle::V4 => addrs.iter().find(|a| a.is_ipv4()).copied(),
        AddressStyle::V6 => addrs.iter().find(|a| a.is_ipv6()).copied(),
        AddressStyle::Any => addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied(),
    }
}
