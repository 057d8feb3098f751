//! Scope key resolution.
//!
//! [`resolve_key`] derives the identifier a policy's budget is tracked
//! against from a snapshot of request attributes. It is a pure function:
//! two requests that agree on every dimension the policy's scope names
//! produce the same key, and requests differing in any scoped dimension
//! produce different keys.
//!
//! Keys are prefixed with the policy name so two policies sharing a
//! dimension never collide in the state store.

use crate::domain::policy::{Dimension, Policy, Scope};

/// Separator between key segments. Chosen as a control character so it
/// cannot appear in identities, IPs, or route names.
const SEP: char = '\u{1f}';

/// Snapshot of the request attributes a scope can isolate on.
///
/// Every field is optional; the resolver handles absent dimensions with a
/// documented fallback rather than failing the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    identity: Option<String>,
    ip: Option<String>,
    endpoint: Option<String>,
    tier: Option<String>,
}

impl RequestContext {
    /// Create an empty (anonymous) context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the authenticated identity (user id, API key).
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    /// Set the client IP address.
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Set the route or endpoint name.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the subscription tier or role.
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    /// The authenticated identity, if any.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// The client IP, if known.
    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }

    /// The route name, if known.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// The subscription tier, if known.
    pub fn tier(&self) -> Option<&str> {
        self.tier.as_deref()
    }
}

/// The opaque identifier a budget is tracked against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(String);

impl ScopeKey {
    /// View the key as a string, e.g. for use as an external store key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Derive the scope key for a request under a policy.
///
/// Dimensions the scope does not name are ignored, so e.g. a `PerIdentity`
/// policy deliberately collapses all routes and addresses of one identity
/// into a single budget.
///
/// # Anonymous requests
///
/// When an identity-scoped policy meets a request without an identity, the
/// resolver falls back to the client IP, and failing that to a shared
/// anonymous bucket. The same fallback chain applies to each absent
/// dimension (IP-less requests share one `ip` bucket, and so on); absence
/// never fails the request.
pub fn resolve_key(policy: &Policy, ctx: &RequestContext) -> ScopeKey {
    let mut key = String::with_capacity(policy.name().len() + 32);
    key.push_str(policy.name());

    match policy.scope() {
        Scope::Global => {}
        Scope::PerIdentity => push_dimension(&mut key, Dimension::Identity, ctx),
        Scope::PerIp => push_dimension(&mut key, Dimension::Ip, ctx),
        Scope::PerEndpoint => push_dimension(&mut key, Dimension::Endpoint, ctx),
        Scope::Composite(dims) => {
            for dim in dims {
                push_dimension(&mut key, *dim, ctx);
            }
        }
    }

    ScopeKey(key)
}

fn push_dimension(key: &mut String, dim: Dimension, ctx: &RequestContext) {
    let (tag, value) = match dim {
        Dimension::Identity => ("id", ctx.identity().or(ctx.ip())),
        Dimension::Ip => ("ip", ctx.ip()),
        Dimension::Endpoint => ("ep", ctx.endpoint()),
        Dimension::Tier => ("tier", ctx.tier()),
    };

    let value = value.unwrap_or_else(|| {
        tracing::debug!(dimension = tag, "context dimension absent, using shared bucket");
        "anonymous"
    });

    key.push(SEP);
    key.push_str(tag);
    key.push('=');
    key.push_str(value);
}
