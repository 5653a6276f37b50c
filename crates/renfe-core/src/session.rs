//! Session lifecycle for one scrape
//!
//! A scrape walks four protocol steps in order:
//!
//! 1. submit the search form and prime the page context with an unscoped
//!    id request (`Init -> HandshakeDone`)
//! 2. obtain a session token (`HandshakeDone -> IdIssued`)
//! 3. register the search with the session (`IdIssued -> SessionCreated`)
//! 4. request the train list (`SessionCreated -> SearchSubmitted`)
//!
//! Any failing step moves the session to `Failed`. Each request waits on the
//! shared [`RateLimiter`] and is retried on network failures only. The
//! session owns its cookie jar and tokens, and wipes them on every exit.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER};
use serde::Serialize;
use tracing::{debug, warn};

use crate::client::{wipe, CookieJar, Endpoints, RequestBody, Transport};
use crate::error::{RenfeError, Result};
use crate::ids;
use crate::limiter::RateLimiter;
use crate::protocol::{self, decode_call, Batch, CallOutcome, Framing, Value};
use crate::redact::Redactor;
use crate::types::SearchRequest;

/// Cookies that carry session identity
pub const SENSITIVE_COOKIES: &[&str] = &["DWRSESSIONID", "JSESSIONID", "Search"];

/// Attempts per step, counting the first one
pub const MAX_ATTEMPTS: u32 = 3;

/// Call id of the single call in each batch
const CALL_ID: &str = "0";

/// Progress of a protocol session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Init,
    HandshakeDone,
    IdIssued,
    SessionCreated,
    SearchSubmitted,
    Failed,
}

/// Identity and state of one protocol session
///
/// Never shared between scrapes. Dropping it wipes cookies and tokens.
pub struct ProtocolSession {
    state: SessionState,
    search_id: String,
    dwr_token: Option<String>,
    script_session_id: Option<String>,
    next_batch_id: u32,
    cookies: CookieJar,
    created_at: DateTime<Utc>,
}

impl Default for ProtocolSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolSession {
    /// Start a session with a fresh search id
    pub fn new() -> Self {
        Self {
            state: SessionState::Init,
            search_id: ids::new_search_id(),
            dwr_token: None,
            script_session_id: None,
            next_batch_id: 0,
            cookies: CookieJar::new(),
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn search_id(&self) -> &str {
        &self.search_id
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Whether a session token or script session id is still held
    pub fn has_tokens(&self) -> bool {
        self.dwr_token.is_some() || self.script_session_id.is_some()
    }

    /// Batch ids are sequential from 0 within a session
    fn take_batch_id(&mut self) -> u32 {
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        id
    }

    /// Remove every cookie and wipe the token fields.
    pub fn secure_cleanup(&mut self) {
        for name in SENSITIVE_COOKIES {
            if self.cookies.remove(name) {
                debug!(cookie = name, "removed session cookie");
            }
        }
        self.cookies.clear();
        if let Some(mut token) = self.dwr_token.take() {
            wipe(&mut token);
        }
        if let Some(mut script_session_id) = self.script_session_id.take() {
            wipe(&mut script_session_id);
        }
    }
}

impl std::fmt::Debug for ProtocolSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("state", &self.state)
            .field("created_at", &self.created_at)
            .field("next_batch_id", &self.next_batch_id)
            .field("has_tokens", &self.has_tokens())
            .field("cookies", &self.cookies)
            .finish_non_exhaustive()
    }
}

impl Drop for ProtocolSession {
    fn drop(&mut self) {
        self.secure_cleanup();
    }
}

/// Drives a [`ProtocolSession`] through the protocol steps
pub struct SessionManager<'a> {
    transport: &'a Transport,
    limiter: &'a RateLimiter,
    endpoints: &'a Endpoints,
    framing: &'a Framing,
    redactor: Redactor,
    session: ProtocolSession,
}

impl<'a> SessionManager<'a> {
    pub fn new(
        transport: &'a Transport,
        limiter: &'a RateLimiter,
        endpoints: &'a Endpoints,
        framing: &'a Framing,
        redactor: Redactor,
    ) -> Self {
        Self {
            transport,
            limiter,
            endpoints,
            framing,
            redactor,
            session: ProtocolSession::new(),
        }
    }

    /// The session being driven
    pub fn session(&self) -> &ProtocolSession {
        &self.session
    }

    /// Run all four steps for `request` and return the decoded train list.
    ///
    /// Cookies and tokens are wiped before this returns, on success and on
    /// failure alike.
    ///
    /// # Errors
    /// - `RenfeError::Network` - a step failed on every attempt
    /// - `RenfeError::Protocol` - a reply did not match the protocol
    /// - `RenfeError::SessionExpired` - the server rejected the session
    pub async fn run(&mut self, request: &SearchRequest) -> Result<Value> {
        let result = self.run_steps(request).await;
        if let Err(err) = &result {
            debug!(state = ?self.session.state, error = %err, "session failed");
            self.session.state = SessionState::Failed;
        }
        self.session.secure_cleanup();
        let age = Utc::now() - self.session.created_at;
        debug!(state = ?self.session.state, age_ms = age.num_milliseconds(), "session closed");
        result
    }

    async fn run_steps(&mut self, request: &SearchRequest) -> Result<Value> {
        self.submit_search_form(request).await?;
        self.prime_page_context().await?;
        self.session.state = SessionState::HandshakeDone;

        self.obtain_token().await?;
        self.session.state = SessionState::IdIssued;

        self.register_search().await?;
        self.session.state = SessionState::SessionCreated;

        let trains = self.fetch_train_list(request).await?;
        self.session.state = SessionState::SearchSubmitted;
        Ok(trains)
    }

    async fn submit_search_form(&mut self, request: &SearchRequest) -> Result<()> {
        let cookie = search_cookie(request);
        debug!(search_id = %self.redactor.token(Some(self.session.search_id())), cookie = %self.redactor.cookie(&cookie), "starting search");
        self.session.cookies.set("Search", cookie);

        let date = request.date.format("%d/%m/%Y").to_string();
        let body = RequestBody::Form(search_form(request, &date));
        self.send("search_form", self.endpoints.search_page(), HeaderMap::new(), body)
            .await?;
        Ok(())
    }

    /// Unscoped id request; the server expects it before the scoped one.
    async fn prime_page_context(&mut self) -> Result<()> {
        let batch = protocol::generate_id(self.session.take_batch_id(), None);
        let text = self.send_batch("prime_page", self.endpoints.generate_id(), batch).await?;
        debug!(reply_len = text.len(), "page context primed");
        Ok(())
    }

    async fn obtain_token(&mut self) -> Result<()> {
        let batch_id = self.session.take_batch_id();
        let batch = protocol::generate_id(batch_id, Some(&self.session.search_id));
        let text = self.send_batch("generate_id", self.endpoints.generate_id(), batch).await?;

        let token = match self.outcome(&text, batch_id)? {
            Value::String(token) if !token.is_empty() => token,
            _ => return Err(RenfeError::protocol("token reply is not a string", text.len())),
        };
        debug!(token = %self.redactor.token(Some(&token)), "session token issued");

        self.session.cookies.set("DWRSESSIONID", token.clone());
        self.session.script_session_id = Some(ids::new_session_token(&token));
        self.session.dwr_token = Some(token);
        Ok(())
    }

    async fn register_search(&mut self) -> Result<()> {
        let batch_id = self.session.take_batch_id();
        let batch = protocol::update_session_objects(
            batch_id,
            &self.session.search_id,
            self.script_session_id()?,
        );
        let text = self
            .send_batch("update_session", self.endpoints.update_session(), batch)
            .await?;
        self.outcome(&text, batch_id)?;
        Ok(())
    }

    async fn fetch_train_list(&mut self, request: &SearchRequest) -> Result<Value> {
        let date = request.date.format("%d/%m/%Y").to_string();
        let batch_id = self.session.take_batch_id();
        let batch = protocol::trains_list(
            batch_id,
            &self.session.search_id,
            self.script_session_id()?,
            &date,
        );
        let text = self.send_batch("trains_list", self.endpoints.trains_list(), batch).await?;
        match self.outcome(&text, batch_id)? {
            trains @ Value::Map(_) => Ok(trains),
            _ => Err(RenfeError::protocol("train list is not an object", text.len())),
        }
    }

    fn script_session_id(&self) -> Result<&str> {
        self.session
            .script_session_id
            .as_deref()
            .ok_or_else(|| RenfeError::protocol("no script session id", 0))
    }

    /// Decode the reply to call 0 of `batch_id` and map exceptions to errors
    fn outcome(&self, text: &str, batch_id: u32) -> Result<Value> {
        match decode_call(text, self.framing, batch_id, CALL_ID)? {
            CallOutcome::Data(value) => Ok(value),
            exception if exception.is_session_failure() => {
                warn!("server reported an invalid session");
                Err(RenfeError::SessionExpired)
            }
            CallOutcome::Exception { class, .. } => {
                debug!(class = class.as_deref().unwrap_or("unknown"), "remote exception");
                Err(RenfeError::protocol("remote call raised an exception", text.len()))
            }
        }
    }

    async fn send_batch(&mut self, step: &'static str, url: String, batch: Batch) -> Result<String> {
        let mut headers = HeaderMap::new();
        let referer = format!(
            "{}{}?c={}",
            self.endpoints.base_url(),
            protocol::encode::ENLACES_PAGE,
            self.session.search_id
        );
        if let Ok(value) = HeaderValue::from_str(&referer) {
            headers.insert(REFERER, value);
        }
        if let Ok(value) = HeaderValue::from_str(self.endpoints.base_url()) {
            headers.insert(ORIGIN, value);
        }
        self.send(step, url, headers, RequestBody::Plain(batch.encode()))
            .await
    }

    /// Issue one step's request, retrying network failures.
    async fn send(
        &mut self,
        step: &'static str,
        url: String,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Result<String> {
        let mut attempt = 1;
        loop {
            let admission = self.limiter.admit().await;
            let result = self
                .transport
                .post_form(&url, headers.clone(), body.clone(), &self.session.cookies)
                .await;

            match result {
                Ok(response) => {
                    admission.succeeded();
                    for (name, value) in &response.cookies {
                        debug!(step, cookie = %name, value = %self.redactor.cookie(value), "cookie received");
                    }
                    self.session.cookies.merge(response.cookies);
                    debug!(step, attempt, body = %self.redactor.body(&response.body), "step completed");
                    return Ok(response.body);
                }
                Err(err) if err.is_retryable() => {
                    admission.failed();
                    if attempt >= MAX_ATTEMPTS {
                        warn!(step, attempt, error = %err, "step failed, giving up");
                        return Err(err);
                    }
                    debug!(step, attempt, error = %err, "step failed, retrying");
                    attempt += 1;
                }
                Err(err) => {
                    admission.release();
                    return Err(err);
                }
            }
        }
    }
}

/// Value of the `Search` cookie: origin, destination and passengers as JSON
fn search_cookie(request: &SearchRequest) -> String {
    let payload = serde_json::json!({
        "origen": { "code": request.origin.code, "name": request.origin.name },
        "destino": { "code": request.destination.code, "name": request.destination.name },
        "pasajerosAdultos": 1,
        "pasajerosNinos": 0,
        "pasajerosSpChild": 0,
    });
    urlencoding::encode(&payload.to_string()).into_owned()
}

/// Fields of the one-way, one-adult search form
fn search_form(request: &SearchRequest, date: &str) -> Vec<(String, String)> {
    [
        ("tipoBusqueda", "autocomplete"),
        ("currenLocation", "menuBusqueda"),
        ("vengoderenfecom", "SI"),
        ("desOrigen", request.origin.name.as_str()),
        ("desDestino", request.destination.name.as_str()),
        ("cdgoOrigen", request.origin.code.as_str()),
        ("cdgoDestino", request.destination.code.as_str()),
        ("idiomaBusqueda", "ES"),
        ("FechaIdaSel", date),
        ("FechaVueltaSel", ""),
        ("_fechaIdaVisual", date),
        ("_fechaVueltaVisual", ""),
        ("adultos_", "1"),
        ("ninos_", "0"),
        ("ninosMenores", "0"),
        ("codPromocional", ""),
        ("plazaH", "false"),
        ("sinEnlace", "false"),
        ("asistencia", "false"),
        ("franjaHoraI", ""),
        ("franjaHoraV", ""),
        ("Idioma", "es"),
        ("Pais", "ES"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Station;
    use chrono::NaiveDate;

    fn request() -> SearchRequest {
        SearchRequest::new(
            Station::new("60000", "MADRID"),
            Station::new("71801", "BARCELONA"),
            NaiveDate::from_ymd_opt(2025, 12, 1).unwrap(),
        )
    }

    #[test]
    fn test_new_session() {
        let session = ProtocolSession::new();
        assert_eq!(session.state(), SessionState::Init);
        assert!(session.search_id().starts_with('_'));
        assert!(session.cookies().is_empty());
        assert!(!session.has_tokens());
    }

    #[test]
    fn test_batch_ids_are_sequential() {
        let mut session = ProtocolSession::new();
        assert_eq!(session.take_batch_id(), 0);
        assert_eq!(session.take_batch_id(), 1);
        assert_eq!(session.take_batch_id(), 2);
    }

    #[test]
    fn test_secure_cleanup_wipes_everything() {
        let mut session = ProtocolSession::new();
        session.cookies.set("DWRSESSIONID", "tok");
        session.cookies.set("JSESSIONID", "abc");
        session.cookies.set("Search", "x");
        session.cookies.set("other", "y");
        session.dwr_token = Some("tok".to_string());
        session.script_session_id = Some("tok/a-b".to_string());

        session.secure_cleanup();

        assert!(session.cookies().is_empty());
        assert!(!session.has_tokens());
    }

    #[test]
    fn test_search_cookie_is_encoded_json() {
        let cookie = search_cookie(&request());
        let decoded = urlencoding::decode(&cookie).unwrap();
        let json: serde_json::Value = serde_json::from_str(&decoded).unwrap();
        assert_eq!(json["origen"]["code"], "60000");
        assert_eq!(json["destino"]["name"], "BARCELONA");
        assert_eq!(json["pasajerosAdultos"], 1);
        assert!(!cookie.contains(' '));
        assert!(!cookie.contains(';'));
    }

    #[test]
    fn test_search_form_fields() {
        let form = search_form(&request(), "01/12/2025");
        let get = |key: &str| {
            form.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("cdgoOrigen"), Some("60000"));
        assert_eq!(get("cdgoDestino"), Some("71801"));
        assert_eq!(get("FechaIdaSel"), Some("01/12/2025"));
        assert_eq!(get("FechaVueltaSel"), Some(""));
        assert_eq!(get("adultos_"), Some("1"));
    }
}
