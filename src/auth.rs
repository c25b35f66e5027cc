//! OAuth credentials for the Drive API
//!
//! A cached token is used until shortly before it expires, then renewed with
//! its refresh token. Without a usable token the installed application flow
//! runs: the consent URL is logged and the redirect is served on a loopback
//! port by a short-lived axum server. Tokens are written to the token file in the layout of the Google
//! Python auth libraries, so existing token files keep working.

use std::{
    fs, io,
    net::{Ipv4Addr, TcpListener},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::{Query, State},
    http,
    routing::get,
};
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use reqwest::{StatusCode, blocking::Client, redirect::Policy};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use url::Url;
use uuid::Uuid;

use crate::{
    config::Config,
    drive::{DriveClient, check_status},
    error::{RemoteError, SyncError},
    remote::RemoteStore,
};

pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are renewed before use
const EXPIRY_SKEW_SECS: i64 = 60;

/// How long to wait for the browser redirect
const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// How long open browser connections may delay stopping the redirect server
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Source of authenticated remote store clients
pub trait CredentialProvider {
    type Client: RemoteStore;

    /// Produce a client with valid credentials
    fn obtain(&mut self) -> Result<Self::Client, SyncError>;

    /// Renew the credentials
    fn refresh(&mut self) -> Result<(), SyncError>;
}

/// OAuth client registration, the `installed` or `web` entry of the secrets file
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

impl ClientSecret {
    pub fn load(path: &Path) -> Result<Self, RemoteError> {
        let file: ClientSecretsFile = serde_json::from_str(&fs::read_to_string(path)?)
            .map_err(|e| RemoteError::Protocol(format!("{}: {e}", path.display())))?;

        file.installed.or(file.web).ok_or_else(|| {
            RemoteError::Protocol(format!(
                "{} has neither an 'installed' nor a 'web' client",
                path.display()
            ))
        })
    }
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.into()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.into()
}

/// Token as persisted in the token file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl StoredToken {
    /// Read the token file, a missing file is not an error
    pub fn load(path: &Path) -> io::Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(io::Error::other),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string(self).map_err(io::Error::other)?;
        fs::write(path, json)
    }

    /// Whether the access token can still be used at `now`
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expiry
            .is_none_or(|expiry| now + TimeDelta::seconds(EXPIRY_SKEW_SECS) < expiry)
    }

    fn from_response(response: TokenResponse, secret: &ClientSecret, now: DateTime<Utc>) -> Self {
        let mut token = Self {
            token: String::new(),
            refresh_token: None,
            token_uri: secret.token_uri.clone(),
            client_id: secret.client_id.clone(),
            client_secret: secret.client_secret.clone(),
            scopes: vec![DRIVE_SCOPE.into()],
            expiry: None,
        };
        token.apply(response, now);
        token
    }

    /// Take over a token endpoint response, keeping the refresh token if none was sent
    fn apply(&mut self, response: TokenResponse, now: DateTime<Utc>) {
        self.token = response.access_token;
        self.expiry = response
            .expires_in
            .map(|secs| now + TimeDelta::seconds(secs));
        if response.refresh_token.is_some() {
            self.refresh_token = response.refresh_token;
        }
    }
}

/// Installed application OAuth credentials backed by a token file
pub struct OAuthCredentials {
    http: Client,
    secrets_file: PathBuf,
    token_file: PathBuf,
    chunk_size: usize,
    token: Option<StoredToken>,
}

impl OAuthCredentials {
    pub fn new(
        secrets_file: PathBuf,
        token_file: PathBuf,
        chunk_size: usize,
    ) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::none())
            .connect_timeout(Duration::from_secs(30))
            .timeout(None)
            .build()?;

        Ok(Self {
            http,
            secrets_file,
            token_file,
            chunk_size,
            token: None,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        Self::new(
            config.credentials_file.clone(),
            config.token_file.clone(),
            config.chunk_size,
        )
    }

    fn load_cached(&mut self) {
        if self.token.is_some() {
            return;
        }
        match StoredToken::load(&self.token_file) {
            Ok(token) => self.token = token,
            Err(e) => warn!(
                "Ignoring unreadable token file {}: {e}",
                self.token_file.display()
            ),
        }
    }

    fn try_refresh(&mut self) -> Result<(), RemoteError> {
        let Some(token) = self.token.as_mut() else {
            return Err(RemoteError::Protocol("no cached token".into()));
        };
        let Some(refresh_token) = token.refresh_token.as_deref() else {
            return Err(RemoteError::Protocol("cached token has no refresh token".into()));
        };

        let response = self
            .http
            .post(&token.token_uri)
            .form(&[
                ("client_id", token.client_id.as_str()),
                ("client_secret", token.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()?;
        let response: TokenResponse = check_status(response)?.json()?;

        token.apply(response, Utc::now());
        token.save(&self.token_file)?;
        debug!("Refreshed access token, valid until {:?}", token.expiry);

        Ok(())
    }

    /// Refresh the token, authorizing again if there is no usable refresh token
    fn renew(&mut self) -> Result<(), RemoteError> {
        let refreshable = self
            .token
            .as_ref()
            .is_some_and(|token| token.refresh_token.is_some());
        if !refreshable {
            return self.authorize();
        }

        match self.try_refresh() {
            Err(RemoteError::Status { status, body })
                if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED =>
            {
                warn!("Refresh token was rejected ({status}: {body}), authorizing again");
                self.authorize()
            }
            result => result,
        }
    }

    fn authorize(&mut self) -> Result<(), RemoteError> {
        let secret = ClientSecret::load(&self.secrets_file)?;

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let redirect_uri = format!("http://localhost:{}/", listener.local_addr()?.port());
        let state = Uuid::new_v4().simple().to_string();

        let url = authorization_url(&secret, &redirect_uri, &state)?;
        info!("Please visit this URL to authorize this application: {url}");

        let code = wait_for_code(listener, &state, AUTHORIZATION_TIMEOUT)?;

        let response = self
            .http
            .post(&secret.token_uri)
            .form(&[
                ("client_id", secret.client_id.as_str()),
                ("client_secret", secret.client_secret.as_str()),
                ("code", code.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()?;
        let response: TokenResponse = check_status(response)?.json()?;

        let token = StoredToken::from_response(response, &secret, Utc::now());
        token.save(&self.token_file)?;
        info!("Authorization complete, token saved to {}", self.token_file.display());

        self.token = Some(token);
        Ok(())
    }
}

impl CredentialProvider for OAuthCredentials {
    type Client = DriveClient;

    fn obtain(&mut self) -> Result<DriveClient, SyncError> {
        self.load_cached();

        let valid = self
            .token
            .as_ref()
            .is_some_and(|token| token.is_valid(Utc::now()));
        if !valid {
            self.renew().map_err(authentication_error)?;
        }

        let token = self
            .token
            .as_ref()
            .ok_or_else(|| SyncError::Authentication("no token after authorization".into()))?;

        Ok(DriveClient::new(
            self.http.clone(),
            &token.token,
            self.chunk_size,
        ))
    }

    fn refresh(&mut self) -> Result<(), SyncError> {
        self.load_cached();
        self.renew().map_err(authentication_error)
    }
}

fn authentication_error(e: RemoteError) -> SyncError {
    SyncError::Authentication(e.to_string())
}

/// Consent page URL for the Drive scope
fn authorization_url(
    secret: &ClientSecret,
    redirect_uri: &str,
    state: &str,
) -> Result<Url, RemoteError> {
    Url::parse_with_params(
        &secret.auth_uri,
        &[
            ("response_type", "code"),
            ("client_id", secret.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", DRIVE_SCOPE),
            ("state", state),
            ("access_type", "offline"),
            ("prompt", "consent"),
        ],
    )
    .map_err(|e| RemoteError::Protocol(format!("invalid auth_uri '{}': {e}", secret.auth_uri)))
}

/// Serve redirects on `listener` until one carries the authorization code
fn wait_for_code(
    listener: TcpListener,
    state: &str,
    timeout: Duration,
) -> Result<String, RemoteError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve_redirect(listener, state, timeout))
}

#[derive(Clone)]
struct RedirectState {
    state: Arc<str>,
    codes: mpsc::Sender<Result<String, RemoteError>>,
}

async fn serve_redirect(
    listener: TcpListener,
    state: &str,
    timeout: Duration,
) -> Result<String, RemoteError> {
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;

    let (codes, mut received) = mpsc::channel(1);
    let (stop, stopped) = oneshot::channel::<()>();
    let app = Router::new()
        .route("/", get(redirect_handler))
        .with_state(RedirectState {
            state: state.into(),
            codes,
        });
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stopped.await;
            })
            .await
    });

    let result = match tokio::time::timeout(timeout, received.recv()).await {
        Ok(Some(result)) => result,
        Ok(None) => Err(RemoteError::Protocol(
            "redirect server stopped before receiving a code".into(),
        )),
        Err(_) => Err(RemoteError::Protocol(
            "timed out waiting for the authorization redirect".into(),
        )),
    };

    let _ = stop.send(());
    if tokio::time::timeout(SHUTDOWN_GRACE, server).await.is_err() {
        debug!("Closing redirect server with connections still open");
    }

    result
}

async fn redirect_handler(
    State(redirect): State<RedirectState>,
    Query(params): Query<Vec<(String, String)>>,
) -> (http::StatusCode, &'static str) {
    let result = redirect_code(&params, &redirect.state);
    let response = match &result {
        Ok(Some(_)) => (
            http::StatusCode::OK,
            "The authentication flow has completed. You may close this window.",
        ),
        Ok(None) => (http::StatusCode::NOT_FOUND, "Not found."),
        Err(_) => (
            http::StatusCode::BAD_REQUEST,
            "Authorization failed, see the log.",
        ),
    };

    if let Some(result) = result.transpose() {
        let _ = redirect.codes.try_send(result);
    }
    response
}

/// Extract the authorization code from the query of a redirect
///
/// Requests without `code` or `error` yield `None`.
fn redirect_code(
    params: &[(String, String)],
    state: &str,
) -> Result<Option<String>, RemoteError> {
    let mut code = None;
    let mut returned_state = None;
    for (key, value) in params {
        match key.as_str() {
            "code" => code = Some(value.clone()),
            "state" => returned_state = Some(value.as_str()),
            "error" => {
                return Err(RemoteError::Protocol(format!(
                    "authorization denied: {value}"
                )));
            }
            _ => {}
        }
    }

    let Some(code) = code else {
        return Ok(None);
    };
    if returned_state != Some(state) {
        return Err(RemoteError::Protocol(
            "authorization redirect with mismatching state".into(),
        ));
    }

    Ok(Some(code))
}
