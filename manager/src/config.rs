use cidr::AnyIpCidr;
use std::{fmt::Debug, net::IpAddr, time::Duration};
use trillium::HeaderName;
use trillium_cookies::cookie::SameSite;

const MIN_TOKEN_LENGTH: usize = 16;

#[derive(Debug, Clone, Default)]
pub(crate) enum TrustProxy {
    #[default]
    Always,
    Never,
    Cidr(Vec<AnyIpCidr>),
}

impl TrustProxy {
    pub(crate) fn is_trusted(&self, ip: Option<IpAddr>) -> bool {
        match (self, ip) {
            (TrustProxy::Always, _) => true,
            (TrustProxy::Cidr(cidrs), Some(ip)) => cidrs.iter().any(|c| c.contains(&ip)),
            _ => false,
        }
    }
}

/**
# Session manager configuration

Build one with [`SessionConfig::new`] and the `with_*` methods, then
hand it to [`SessionManager::new`](crate::SessionManager::new). The
configuration cannot be changed after that.

# Defaults

* cookie name: "go_session"
* idle timeout: one hour
* absolute lifetime (max age): one day
* cookie domain: none
* secure: disabled
* http only: disabled
* same site: lax
* csrf verification: enabled
* csrf header / form field: "x-xsrf-token" / "csrf_token"
* regenerate on authentication: enabled
* expiry sweep interval: one hour
* expiry sweep operation timeout: five minutes
* token length: 32 bytes
* forwarding headers: trusted from any peer
* fingerprint headers: none

```
use std::time::Duration;
use trillium_cookies::cookie::SameSite;
use trillium_session_manager::SessionConfig;

let config = SessionConfig::new()
    .with_cookie_name("app.sid")
    .with_timeout(Duration::from_secs(15 * 60))
    .with_max_age(Duration::from_secs(8 * 60 * 60))
    .with_cookie_domain("example.com")
    .with_secure(true)
    .with_http_only(true)
    .with_same_site(SameSite::Strict)
    .with_cleanup_interval(Duration::from_secs(10 * 60))
    .with_trusted_proxies(["10.0.0.0/8"])
    .with_fingerprint_headers(["accept-language"]);

assert_eq!(config.cookie_name(), "app.sid");
```
*/
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub(crate) cookie_name: String,
    pub(crate) timeout: Duration,
    pub(crate) max_age: Duration,
    pub(crate) cookie_domain: Option<String>,
    pub(crate) secure: bool,
    pub(crate) http_only: bool,
    pub(crate) same_site: SameSite,
    pub(crate) csrf_enabled: bool,
    pub(crate) csrf_header: HeaderName<'static>,
    pub(crate) csrf_field: String,
    pub(crate) regenerate_on_auth: bool,
    pub(crate) cleanup_interval: Duration,
    pub(crate) sweep_timeout: Duration,
    pub(crate) token_length: usize,
    pub(crate) trust_proxy: TrustProxy,
    pub(crate) fingerprint_headers: Vec<HeaderName<'static>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "go_session".into(),
            timeout: Duration::from_secs(60 * 60),
            max_age: Duration::from_secs(24 * 60 * 60),
            cookie_domain: None,
            secure: false,
            http_only: false,
            same_site: SameSite::Lax,
            csrf_enabled: true,
            csrf_header: HeaderName::from("x-xsrf-token"),
            csrf_field: "csrf_token".into(),
            regenerate_on_auth: true,
            cleanup_interval: Duration::from_secs(60 * 60),
            sweep_timeout: Duration::from_secs(5 * 60),
            token_length: 32,
            trust_proxy: TrustProxy::default(),
            fingerprint_headers: vec![],
        }
    }
}

impl SessionConfig {
    /// constructs a configuration with the defaults listed above
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the session cookie.
    ///
    /// If you are running multiple applications on the same domain,
    /// you will need different values for each application.
    pub fn with_cookie_name(mut self, cookie_name: impl AsRef<str>) -> Self {
        cookie_name.as_ref().clone_into(&mut self.cookie_name);
        self
    }

    /// Sets the idle timeout. A session that sees no activity for
    /// longer than this is expired, regardless of its max age.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the absolute lifetime of a session, measured from its
    /// creation. This is also used as the session cookie's expiry.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Sets the domain of the session and csrf cookies.
    pub fn with_cookie_domain(mut self, cookie_domain: impl AsRef<str>) -> Self {
        self.cookie_domain = Some(cookie_domain.as_ref().to_owned());
        self
    }

    /// Sets the `Secure` attribute on emitted cookies.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Sets the `HttpOnly` attribute on emitted cookies. Note that a
    /// http-only `XSRF-TOKEN` cookie cannot be read by client-side
    /// scripts.
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    /// Sets the same site policy for emitted cookies. See [incrementally
    /// better cookies](https://tools.ietf.org/html/draft-west-cookie-incrementalism-01)
    /// for more information about this setting
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    /// Disables csrf verification. [`CsrfHandler`](crate::CsrfHandler)
    /// will pass every request through.
    pub fn without_csrf(mut self) -> Self {
        self.csrf_enabled = false;
        self
    }

    /// Sets the request header that carries the csrf token.
    pub fn with_csrf_header(mut self, header: impl Into<HeaderName<'static>>) -> Self {
        self.csrf_header = header.into();
        self
    }

    /// Sets the form field consulted when the csrf header is absent.
    pub fn with_csrf_field(mut self, field: impl AsRef<str>) -> Self {
        field.as_ref().clone_into(&mut self.csrf_field);
        self
    }

    /// Disables id regeneration in
    /// [`SessionManager::authenticate`](crate::SessionManager::authenticate).
    /// This leaves applications open to session fixation and is not
    /// recommended.
    pub fn without_regenerate_on_auth(mut self) -> Self {
        self.regenerate_on_auth = false;
        self
    }

    /// Sets how often expired sessions are purged from the store. A
    /// zero duration disables the background sweep.
    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }

    /// Sets how long a single sweep may wait on the store before the
    /// attempt is abandoned.
    pub fn with_sweep_timeout(mut self, sweep_timeout: Duration) -> Self {
        self.sweep_timeout = sweep_timeout;
        self
    }

    /// Sets the number of random bytes in generated session ids.
    /// Values below 16 are raised to 16.
    pub fn with_token_length(mut self, token_length: usize) -> Self {
        self.token_length = token_length.max(MIN_TOKEN_LENGTH);
        self
    }

    /**
    Only honor `cf-connecting-ip`, `x-forwarded-for` and `x-real-ip`
    when the peer address falls within one of the provided ips or
    cidr ranges. Requests from any other peer are identified by their
    peer address alone.

    # Panics

    Panics if any entry is not a valid ip address or cidr range.

    ```
    # use trillium_session_manager::SessionConfig;
    let config = SessionConfig::new().with_trusted_proxies(["10.1.10.1", "192.168.0.0/16"]);
    ```
    */
    pub fn with_trusted_proxies<'a>(mut self, proxies: impl IntoIterator<Item = &'a str>) -> Self {
        self.trust_proxy = TrustProxy::Cidr(
            proxies
                .into_iter()
                .map(|proxy| {
                    proxy
                        .parse()
                        .unwrap_or_else(|e| panic!("invalid trusted proxy {proxy:?}: {e}"))
                })
                .collect(),
        );
        self
    }

    /// Never honor forwarding headers; the client ip is always the
    /// peer address.
    pub fn without_forwarded_headers(mut self) -> Self {
        self.trust_proxy = TrustProxy::Never;
        self
    }

    /// Binds sessions to a fingerprint derived from the named request
    /// headers, in addition to the ip address and user agent. With no
    /// headers configured, the fingerprint is empty.
    pub fn with_fingerprint_headers<H>(mut self, headers: impl IntoIterator<Item = H>) -> Self
    where
        H: Into<HeaderName<'static>>,
    {
        self.fingerprint_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    /// the session cookie name
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// the idle timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// the absolute session lifetime
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// whether csrf verification is enabled
    pub fn csrf_enabled(&self) -> bool {
        self.csrf_enabled
    }

    /// the background sweep interval; zero when disabled
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }
}
