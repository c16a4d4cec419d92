//! Proxy-header trust.
//!
//! When the immediate peer is trusted, the first `X-Forwarded-For` entry
//! becomes the perceived client and the first `X-Forwarded-Proto` entry the
//! scheme. Anything unparseable leaves the socket values in place.

use http::{HeaderMap, Request};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context, Poll};
use stevedore_shared::{StevedoreError, StevedoreResult};
use tower::Service;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Which peers may set forwarded headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustedProxyPolicy {
    /// Forwarded headers are ignored.
    #[default]
    Disabled,
    /// Every peer is trusted.
    AnyPeer,
    /// Only peers inside these ranges are trusted.
    Peers(Vec<PeerRange>),
}

impl TrustedProxyPolicy {
    /// Parse a comma-separated allow list; `*` trusts every peer.
    pub fn from_allow_list(list: &str) -> StevedoreResult<Self> {
        let entries: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();
        if entries.is_empty() {
            return Err(StevedoreError::Config("forwarded allow list is empty".into()));
        }
        if entries.contains(&"*") {
            return Ok(TrustedProxyPolicy::AnyPeer);
        }
        entries
            .into_iter()
            .map(str::parse)
            .collect::<StevedoreResult<Vec<PeerRange>>>()
            .map(TrustedProxyPolicy::Peers)
    }

    pub fn trusts(&self, peer: IpAddr) -> bool {
        match self {
            TrustedProxyPolicy::Disabled => false,
            TrustedProxyPolicy::AnyPeer => true,
            TrustedProxyPolicy::Peers(ranges) => ranges.iter().any(|r| r.contains(peer)),
        }
    }
}

impl fmt::Display for TrustedProxyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustedProxyPolicy::Disabled => f.write_str("disabled"),
            TrustedProxyPolicy::AnyPeer => f.write_str("any peer"),
            TrustedProxyPolicy::Peers(ranges) => {
                let ranges: Vec<String> = ranges.iter().map(ToString::to_string).collect();
                write!(f, "peers {}", ranges.join(","))
            }
        }
    }
}

/// An address range in CIDR notation; a bare address is a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerRange {
    network: IpAddr,
    prefix: u8,
}

impl PeerRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, canonical_ip(ip)) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(self.prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for PeerRange {
    type Err = StevedoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StevedoreError::Config(format!("invalid forwarded allow entry '{}'", s));
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };
        let network = canonical_ip(addr.parse::<IpAddr>().map_err(|_| invalid())?);
        let max = if network.is_ipv4() { 32 } else { 128 };
        let prefix = match prefix {
            Some(p) => p.parse::<u8>().ok().filter(|p| *p <= max).ok_or_else(invalid)?,
            None => max,
        };
        Ok(Self { network, prefix })
    }
}

impl fmt::Display for PeerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn canonical_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(v6)),
        v4 => v4,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The client as perceived after proxy-header processing. Attached to every
/// request as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    pub addr: SocketAddr,
    /// The socket peer, whether or not it was trusted.
    pub peer: SocketAddr,
    pub scheme: Scheme,
    /// `addr` came from `X-Forwarded-For`.
    pub forwarded: bool,
}

impl ClientInfo {
    pub fn resolve(
        policy: &TrustedProxyPolicy,
        peer: SocketAddr,
        local_scheme: Scheme,
        headers: &HeaderMap,
    ) -> Self {
        let mut info = ClientInfo {
            addr: peer,
            peer,
            scheme: local_scheme,
            forwarded: false,
        };
        if !policy.trusts(peer.ip()) {
            return info;
        }

        if let Some(addr) = first_entry(headers, X_FORWARDED_FOR).and_then(parse_forwarded_addr) {
            info.addr = addr;
            info.forwarded = true;
        }
        if let Some(scheme) = first_entry(headers, X_FORWARDED_PROTO).and_then(Scheme::parse) {
            info.scheme = scheme;
        }
        info
    }
}

fn first_entry<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let raw = headers.get(name)?.to_str().ok()?;
    let first = raw.split(',').next()?.trim();
    (!first.is_empty()).then_some(first)
}

// Forwarded entries carry no usable port; port 0 marks that.
fn parse_forwarded_addr(value: &str) -> Option<SocketAddr> {
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(SocketAddr::new(canonical_ip(ip), 0));
    }
    value
        .parse::<SocketAddr>()
        .ok()
        .map(|addr| SocketAddr::new(canonical_ip(addr.ip()), addr.port()))
}

/// Tower middleware attaching [`ClientInfo`] for one connection.
#[derive(Debug, Clone)]
pub struct ProxyHeaders<S> {
    inner: S,
    policy: Arc<TrustedProxyPolicy>,
    peer: SocketAddr,
    scheme: Scheme,
}

impl<S> ProxyHeaders<S> {
    pub fn new(inner: S, policy: Arc<TrustedProxyPolicy>, peer: SocketAddr, scheme: Scheme) -> Self {
        Self {
            inner,
            policy,
            peer,
            scheme,
        }
    }
}

impl<S, B> Service<Request<B>> for ProxyHeaders<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        let info = ClientInfo::resolve(&self.policy, self.peer, self.scheme, req.headers());
        req.extensions_mut().insert(info);
        self.inner.call(req)
    }
}
