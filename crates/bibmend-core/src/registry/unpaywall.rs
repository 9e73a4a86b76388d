//! Unpaywall client: open-access location lookup by DOI.

use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use super::{ClientError, OaResponse, OpenAccessIndex};

const API: &str = "https://api.unpaywall.org/v2";

/// Address sent when no contact email is configured; Unpaywall requires the
/// parameter but not a registration.
const FALLBACK_EMAIL: &str = "anonymous@bibmend.invalid";

pub struct Unpaywall {
    pub email: Option<String>,
}

impl OpenAccessIndex for Unpaywall {
    fn name(&self) -> &str {
        "Unpaywall"
    }

    fn lookup<'a>(
        &'a self,
        doi: &'a str,
        client: &'a reqwest::Client,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OaResponse>, ClientError>> + Send + 'a>> {
        Box::pin(async move {
            let email = self.email.as_deref().unwrap_or(FALLBACK_EMAIL);
            let url = format!("{}/{}?email={}", API, doi, urlencoding::encode(email));

            debug!(doi = %doi, "unpaywall lookup");
            let resp = client.get(&url).send().await.map_err(ClientError::from)?;

            let status = resp.status();
            if status.as_u16() == 404 {
                return Ok(None);
            }
            if !status.is_success() {
                return Err(ClientError::BadResponse(format!("HTTP {}", status)));
            }

            let data: serde_json::Value = resp.json().await.map_err(ClientError::from)?;
            let best_oa_location =
                serde_json::from_value(data["best_oa_location"].clone()).unwrap_or_default();
            Ok(Some(OaResponse {
                best_oa_location,
                raw: data,
            }))
        })
    }
}
