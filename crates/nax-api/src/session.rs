// HTTP session against the device's web server
//
// Cookie + anti-forgery token login, best-effort logout, and plain
// GET/POST access to the configuration tree. The login page sets the
// `TRACKID` session cookie in the client's jar; the credential POST
// returns the `CREST-XSRF-TOKEN` header, which is echoed back as
// `X-CREST-XSRF-TOKEN` on every later call (including the WebSocket
// upgrade).

use std::sync::{Arc, RwLock};

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{ORIGIN, REFERER};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Login page; GET harvests the session cookie, POST submits credentials.
pub const LOGIN_PATH: &str = "/userlogin.html";
/// Logout endpoint (response ignored).
pub const LOGOUT_PATH: &str = "/logout";
/// Session cookie set by the login page.
pub const SESSION_COOKIE: &str = "TRACKID";
/// Anti-forgery token header returned by a successful login.
pub const TOKEN_HEADER: &str = "CREST-XSRF-TOKEN";
/// Request header carrying the anti-forgery token back to the device.
pub const TOKEN_REQUEST_HEADER: &str = "X-CREST-XSRF-TOKEN";

/// An authenticated (or authenticating) HTTP session with one device.
///
/// Holds the credentials captured during [`login`](Self::login): the
/// session cookie lives in the client's jar, the anti-forgery token in
/// `csrf_token`. Both die with the session; a re-login builds a new one.
pub struct Session {
    http: reqwest::Client,
    base_url: Url,
    csrf_token: RwLock<Option<String>>,
    cookie_jar: Arc<Jar>,
}

impl Session {
    /// Create a new session from a `TransportConfig`.
    ///
    /// A fresh cookie jar is always installed so that sessions never share
    /// cookies. `base_url` is the device root, e.g. `https://192.168.1.58`.
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let config = transport.clone().with_cookie_jar();
        let cookie_jar = config
            .cookie_jar
            .clone()
            .unwrap_or_else(|| Arc::new(Jar::default()));
        let http = config.build_client()?;
        Ok(Self {
            http,
            base_url,
            csrf_token: RwLock::new(None),
            cookie_jar,
        })
    }

    /// The device base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The `Origin` value presented on login and on the WebSocket upgrade.
    pub fn origin(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }

    /// Whether a login has succeeded and the token is still held.
    pub fn is_logged_in(&self) -> bool {
        self.csrf_token().is_some()
    }

    /// The anti-forgery token captured at login.
    pub fn csrf_token(&self) -> Option<String> {
        self.csrf_token.read().expect("CSRF lock poisoned").clone()
    }

    /// Extract the `Cookie` header value for the WebSocket upgrade.
    ///
    /// Returns e.g. `"TRACKID=abc123"` if the jar holds cookies for the
    /// device URL.
    pub fn cookie_header(&self) -> Option<String> {
        let cookies = self.cookie_jar.cookies(&self.base_url)?;
        cookies.to_str().ok().map(String::from)
    }

    fn has_session_cookie(&self) -> bool {
        self.cookie_header().is_some_and(|header| {
            header
                .split(';')
                .any(|pair| pair.trim().starts_with(&format!("{SESSION_COOKIE}=")))
        })
    }

    // ── Login / logout ───────────────────────────────────────────────

    /// Authenticate with the device.
    ///
    /// 1. `GET /userlogin.html` to obtain the `TRACKID` cookie.
    /// 2. `POST /userlogin.html` with form fields `login` / `passwd`,
    ///    `Origin` and `Referer` headers, and that cookie.
    ///
    /// Any non-2xx response, or a 2xx without the anti-forgery header, is
    /// an [`Error::Authentication`]. Network failures and timeouts come
    /// back as [`Error::Transport`], which reports
    /// [`is_connectivity`](Error::is_connectivity).
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<(), Error> {
        let url = self.base_url.join(LOGIN_PATH)?;

        debug!("requesting login page at {}", url);
        let page = self.http.get(url.clone()).send().await?;
        trace!(status = %page.status(), "login page response");

        if !self.has_session_cookie() {
            return Err(Error::Authentication {
                message: format!("{SESSION_COOKIE} cookie missing in login page response"),
            });
        }

        debug!("submitting credentials for {}", username);
        let resp = self
            .http
            .post(url.clone())
            .header(ORIGIN, self.origin())
            .header(REFERER, url.as_str())
            .form(&[("login", username), ("passwd", password.expose_secret())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let body = body.trim();
            let message = if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.chars().take(200).collect()
            };
            return Err(Error::Authentication { message });
        }

        let token = resp
            .headers()
            .get(TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
            .ok_or_else(|| Error::Authentication {
                message: "Token missing in login response".into(),
            })?;

        self.set_csrf_token(Some(token));
        info!(url = %self.base_url, "logged in");
        Ok(())
    }

    /// End the session. Best effort: the logout request's outcome is
    /// ignored and the token is always discarded.
    pub async fn logout(&self) {
        if self.is_logged_in() {
            match self.base_url.join(LOGOUT_PATH) {
                Ok(url) => {
                    debug!("logging out at {}", url);
                    let request = self.apply_csrf(self.http.get(url));
                    if let Err(e) = request.send().await {
                        debug!(error = %e, "logout request failed (ignored)");
                    }
                }
                Err(e) => debug!(error = %e, "invalid logout URL (ignored)"),
            }
        }
        self.set_csrf_token(None);
    }

    // ── CSRF token management ─────────────────────────────────────────

    fn set_csrf_token(&self, token: Option<String>) {
        *self.csrf_token.write().expect("CSRF lock poisoned") = token;
    }

    fn apply_csrf(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let guard = self.csrf_token.read().expect("CSRF lock poisoned");
        match guard.as_deref() {
            Some(token) => builder.header(TOKEN_REQUEST_HEADER, token),
            None => builder,
        }
    }

    // ── Tree access over plain HTTP ──────────────────────────────────

    /// `GET <base><path>` where `path` is slash-delimited (`/Device/...`).
    ///
    /// Returns the decoded JSON body, or the body as a JSON string if the
    /// device answered with something that is not JSON.
    pub async fn get_path(&self, path: &str) -> Result<Value, Error> {
        if !self.is_logged_in() {
            return Err(Error::NotLoggedIn);
        }
        let url = self.base_url.join(path)?;
        debug!("GET {}", url);

        let resp = self.apply_csrf(self.http.get(url)).send().await?;
        read_body(resp).await
    }

    /// `POST <base><path>` with a JSON body shaped as nested objects
    /// mirroring the path.
    pub async fn post_path(&self, path: &str, body: &Value) -> Result<Value, Error> {
        if !self.is_logged_in() {
            return Err(Error::NotLoggedIn);
        }
        let url = self.base_url.join(path)?;
        debug!("POST {}", url);

        let resp = self.apply_csrf(self.http.post(url).json(body)).send().await?;
        read_body(resp).await
    }
}

async fn read_body(resp: reqwest::Response) -> Result<Value, Error> {
    let status = resp.status();
    let url = resp.url().to_string();
    let text = resp.text().await?;

    if !status.is_success() {
        return Err(Error::Http {
            status: status.as_u16(),
            url,
            body: text.chars().take(200).collect(),
        });
    }

    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}
