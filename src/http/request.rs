//! Viewer request parsing

use url::form_urlencoded;

/// A parsed `GET /live` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ViewerRequest {
    /// Opaque client identifier
    pub device_id: String,
    /// Upstream source URL, percent-decoded
    pub source_url: String,
}

/// Why a request was refused with 400
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RequestError {
    Malformed,
    UnsupportedMethod(String),
    UnknownPath(String),
    MissingParam(&'static str),
    InvalidSourceUrl,
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestError::Malformed => write!(f, "malformed request"),
            RequestError::UnsupportedMethod(m) => write!(f, "unsupported method: {}", m),
            RequestError::UnknownPath(p) => write!(f, "unknown path: {}", p),
            RequestError::MissingParam(p) => write!(f, "missing or empty parameter: {}", p),
            RequestError::InvalidSourceUrl => write!(f, "rtspUrl is not a well-formed URL"),
        }
    }
}

/// Parse the head of a viewer request.
///
/// Only `GET /live?deviceId=..&rtspUrl=..` is accepted; both parameters are
/// required and non-empty, and `rtspUrl` must be a well-formed URL.
pub(crate) fn parse_viewer_request(head: &str) -> Result<ViewerRequest, RequestError> {
    let request_line = head.lines().next().ok_or(RequestError::Malformed)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or(RequestError::Malformed)?;
    let target = parts.next().ok_or(RequestError::Malformed)?;
    parts.next().ok_or(RequestError::Malformed)?; // HTTP version

    if method != "GET" {
        return Err(RequestError::UnsupportedMethod(method.to_string()));
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != "/live" {
        return Err(RequestError::UnknownPath(path.to_string()));
    }

    let mut device_id = None;
    let mut source_url = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if value.is_empty() {
            continue;
        }
        match key.as_ref() {
            "deviceId" => device_id = Some(value.into_owned()),
            "rtspUrl" => source_url = Some(value.into_owned()),
            _ => {}
        }
    }

    let device_id = device_id.ok_or(RequestError::MissingParam("deviceId"))?;
    let source_url = source_url.ok_or(RequestError::MissingParam("rtspUrl"))?;
    if url::Url::parse(&source_url).is_err() {
        return Err(RequestError::InvalidSourceUrl);
    }

    Ok(ViewerRequest {
        device_id,
        source_url,
    })
}
