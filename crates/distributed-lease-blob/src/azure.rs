//! Azure Blob Storage REST client authenticated with a shared access signature.

use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use distributed_lease_core::error::{LeaseError, LeaseResult};
use reqwest::header::{CONTENT_LENGTH, HeaderMap, HeaderName, HeaderValue, IF_NONE_MATCH};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::trace;
use url::Url;

use crate::client::{BlobPath, BlobProperties, BlobStore, LeaseState, LeaseStatus, StoreError};

/// REST API version sent with every request.
pub const API_VERSION: &str = "2021-08-06";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MIN_LEASE_PERIOD: Duration = Duration::from_secs(15);
const MAX_LEASE_PERIOD: Duration = Duration::from_secs(60);

const VERSION: &str = "x-ms-version";
const BLOB_TYPE: &str = "x-ms-blob-type";
const ERROR_CODE: &str = "x-ms-error-code";
const LEASE_ACTION: &str = "x-ms-lease-action";
const LEASE_DURATION: &str = "x-ms-lease-duration";
const LEASE_ID: &str = "x-ms-lease-id";
const LEASE_STATE: &str = "x-ms-lease-state";
const LEASE_STATUS: &str = "x-ms-lease-status";
const PROPOSED_LEASE_ID: &str = "x-ms-proposed-lease-id";
const META_PREFIX: &str = "x-ms-meta-";

/// The parts of a storage connection string this client understands.
#[derive(Clone, PartialEq, Eq)]
pub struct BlobConnectionString {
    pub endpoint: Url,
    pub sas: Option<String>,
}

impl BlobConnectionString {
    /// Parses `Key=Value;...` storage connection strings.
    ///
    /// Accepts `BlobEndpoint` or `AccountName` (+ `EndpointSuffix`,
    /// `DefaultEndpointsProtocol`) for the endpoint and
    /// `SharedAccessSignature` for authentication. Shared key credentials are
    /// rejected; request signing is not supported.
    pub fn parse(connection_string: &str) -> LeaseResult<Self> {
        let mut entries: HashMap<String, &str> = HashMap::new();
        for entry in connection_string.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(invalid_connection_string(format!("'{entry}' is not Key=Value")));
            };
            entries.insert(key.trim().to_ascii_lowercase(), value.trim());
        }

        if entries.contains_key("usedevelopmentstorage") {
            return Err(invalid_connection_string(
                "development storage requires shared key signing, which is not supported",
            ));
        }

        let sas = entries
            .get("sharedaccesssignature")
            .map(|sas| sas.trim_start_matches('?').to_string())
            .filter(|sas| !sas.is_empty());

        if sas.is_none() && entries.contains_key("accountkey") {
            return Err(invalid_connection_string(
                "shared key authentication is not supported; use a SharedAccessSignature",
            ));
        }

        let endpoint = match (entries.get("blobendpoint"), entries.get("accountname")) {
            (Some(endpoint), _) => endpoint.to_string(),
            (None, Some(account)) => {
                let protocol = entries.get("defaultendpointsprotocol").unwrap_or(&"https");
                let suffix = entries.get("endpointsuffix").unwrap_or(&"core.windows.net");
                format!("{protocol}://{account}.blob.{suffix}")
            }
            (None, None) => {
                return Err(invalid_connection_string(
                    "neither BlobEndpoint nor AccountName is set",
                ));
            }
        };

        Ok(Self {
            endpoint: parse_endpoint(&endpoint)?,
            sas,
        })
    }
}

impl fmt::Debug for BlobConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobConnectionString")
            .field("endpoint", &self.endpoint.as_str())
            .field("sas", &self.sas.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn invalid_connection_string(message: impl Into<String>) -> LeaseError {
    LeaseError::validation("connection_string", message)
}

fn parse_endpoint(endpoint: &str) -> LeaseResult<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| invalid_connection_string(format!("invalid blob endpoint '{endpoint}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(invalid_connection_string(format!(
            "blob endpoint '{endpoint}' must be an http(s) URL"
        )));
    }
    Ok(url)
}

/// Builder for [`AzureBlobClient`].
pub struct AzureBlobClientBuilder {
    endpoint: Option<String>,
    sas: Option<String>,
    timeout: Duration,
}

impl AzureBlobClientBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            sas: None,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Sets the blob service endpoint, e.g. `https://acct.blob.core.windows.net`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the shared access signature appended to every request.
    pub fn sas(mut self, sas: impl Into<String>) -> Self {
        self.sas = Some(sas.into());
        self
    }

    /// Takes endpoint and signature from a storage connection string.
    pub fn connection_string(mut self, connection_string: &str) -> LeaseResult<Self> {
        let parsed = BlobConnectionString::parse(connection_string)?;
        self.endpoint = Some(parsed.endpoint.to_string());
        self.sas = parsed.sas;
        Ok(self)
    }

    /// Per-request timeout; a timed-out call surfaces as a transport error.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> LeaseResult<AzureBlobClient> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| LeaseError::validation("endpoint", "endpoint not specified"))?;
        let endpoint = parse_endpoint(&endpoint)?;

        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| LeaseError::unknown("failed to build HTTP client", e))?;

        Ok(AzureBlobClient {
            http,
            endpoint,
            sas: self
                .sas
                .map(|sas| sas.trim_start_matches('?').to_string())
                .filter(|sas| !sas.is_empty())
                .map(Into::into),
        })
    }
}

impl Default for AzureBlobClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// [`BlobStore`] over the Azure Blob Storage REST API.
#[derive(Clone)]
pub struct AzureBlobClient {
    http: reqwest::Client,
    endpoint: Url,
    sas: Option<Arc<str>>,
}

impl AzureBlobClient {
    pub fn builder() -> AzureBlobClientBuilder {
        AzureBlobClientBuilder::new()
    }

    pub fn from_connection_string(connection_string: &str) -> LeaseResult<Self> {
        Self::builder().connection_string(connection_string)?.build()
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, container: &str, blob: Option<&str>, query: &[(&str, &str)]) -> Result<Url, StoreError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::invalid("blob endpoint cannot carry a path"))?;
            segments.pop_if_empty().push(container);
            if let Some(blob) = blob {
                segments.extend(blob.split('/'));
            }
        }

        let mut parts: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        if let Some(sas) = &self.sas {
            parts.push(sas.to_string());
        }
        url.set_query((!parts.is_empty()).then(|| parts.join("&")).as_deref());
        Ok(url)
    }

    fn blob_url(&self, path: &BlobPath, query: &[(&str, &str)]) -> Result<Url, StoreError> {
        self.url(&path.container, Some(&path.blob), query)
    }

    async fn send(&self, request: RequestBuilder, operation: &str) -> Result<Response, StoreError> {
        let response = request
            .header(VERSION, API_VERSION)
            .send()
            .await
            .map_err(|e| StoreError::transport(format!("{operation} request failed"), e))?;

        let status = response.status();
        trace!(operation, status = status.as_u16(), "blob service responded");
        if status.is_success() {
            return Ok(response);
        }

        let code = response
            .headers()
            .get(ERROR_CODE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
        Err(StoreError::status(status, code))
    }

    fn lease_request(&self, path: &BlobPath, action: &str) -> Result<RequestBuilder, StoreError> {
        let url = self.blob_url(path, &[("comp", "lease")])?;
        Ok(self
            .http
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, "0")
            .header(LEASE_ACTION, action))
    }
}

impl fmt::Debug for AzureBlobClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureBlobClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("sas", &self.sas.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Whole seconds, rounded up.
fn lease_seconds(period: Duration) -> u64 {
    period.as_secs() + u64::from(period.subsec_nanos() > 0)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

impl BlobStore for AzureBlobClient {
    fn lease_period_range(&self) -> RangeInclusive<Duration> {
        MIN_LEASE_PERIOD..=MAX_LEASE_PERIOD
    }

    async fn acquire_lease(
        &self,
        path: &BlobPath,
        period: Duration,
        proposed_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let mut request = self
            .lease_request(path, "acquire")?
            .header(LEASE_DURATION, lease_seconds(period).to_string());
        if let Some(proposed) = proposed_id {
            request = request.header(PROPOSED_LEASE_ID, proposed);
        }

        let response = self.send(request, "acquire lease").await?;
        header_str(response.headers(), LEASE_ID)
            .map(str::to_string)
            .ok_or_else(|| StoreError::invalid("acquire lease response carried no lease id"))
    }

    async fn renew_lease(&self, path: &BlobPath, lease_id: &str) -> Result<(), StoreError> {
        let request = self.lease_request(path, "renew")?.header(LEASE_ID, lease_id);
        self.send(request, "renew lease").await.map(drop)
    }

    async fn release_lease(&self, path: &BlobPath, lease_id: &str) -> Result<(), StoreError> {
        let request = self.lease_request(path, "release")?.header(LEASE_ID, lease_id);
        self.send(request, "release lease").await.map(drop)
    }

    async fn create_empty_blob(&self, path: &BlobPath) -> Result<(), StoreError> {
        let url = self.blob_url(path, &[])?;
        let request = self
            .http
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, "0")
            .header(BLOB_TYPE, "BlockBlob")
            .header(IF_NONE_MATCH, "*");
        self.send(request, "create blob").await.map(drop)
    }

    async fn create_container_if_not_exists(&self, container: &str) -> Result<bool, StoreError> {
        let url = self.url(container, None, &[("restype", "container")])?;
        let request = self.http.request(Method::PUT, url).header(CONTENT_LENGTH, "0");
        match self.send(request, "create container").await {
            Ok(_) => Ok(true),
            Err(e) if e.is_status(StatusCode::CONFLICT) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn get_properties(&self, path: &BlobPath) -> Result<BlobProperties, StoreError> {
        let url = self.blob_url(path, &[])?;
        let response = self
            .send(self.http.request(Method::HEAD, url), "get blob properties")
            .await?;
        let headers = response.headers();

        let lease_status = header_str(headers, LEASE_STATUS)
            .and_then(LeaseStatus::parse)
            .unwrap_or(LeaseStatus::Unlocked);
        let lease_state = header_str(headers, LEASE_STATE)
            .and_then(LeaseState::parse)
            .unwrap_or(LeaseState::Available);

        let metadata = headers
            .iter()
            .filter_map(|(name, value)| {
                let key = name.as_str().strip_prefix(META_PREFIX)?;
                Some((key.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();

        Ok(BlobProperties {
            lease_status,
            lease_state,
            metadata,
        })
    }

    async fn set_metadata(
        &self,
        path: &BlobPath,
        lease_id: Option<&str>,
        metadata: &HashMap<String, String>,
    ) -> Result<(), StoreError> {
        let mut headers = HeaderMap::new();
        for (key, value) in metadata {
            let name = HeaderName::from_bytes(format!("{META_PREFIX}{key}").as_bytes())
                .map_err(|_| StoreError::invalid(format!("'{key}' cannot be sent as metadata")))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                StoreError::invalid(format!("metadata value of '{key}' is not a valid header"))
            })?;
            headers.insert(name, value);
        }

        let url = self.blob_url(path, &[("comp", "metadata")])?;
        let mut request = self
            .http
            .request(Method::PUT, url)
            .header(CONTENT_LENGTH, "0")
            .headers(headers);
        if let Some(lease_id) = lease_id {
            request = request.header(LEASE_ID, lease_id);
        }
        self.send(request, "set metadata").await.map(drop)
    }
}
