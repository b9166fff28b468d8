//! BigQuery Reservation API client.
//!
//! Talks to the v1 REST surface (`https://bigqueryreservation.googleapis.com/v1/...`) with
//! `reqwest`. Resource names returned by the API are used as-is to build follow-up URLs, so a
//! name like `projects/p/locations/EU/reservations/r` becomes
//! `{endpoint}/v1/projects/p/locations/EU/reservations/r`.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, de::DeserializeOwned};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{
    Assignment, CapacityCommitment, LocationPath, Reservation, ReservationError, ReservationService, Result,
    credentials::{Credentials, create_credentials},
};
use crate::config::BigQueryConfig;

/// Makes sure a url has a trailing slash.
///
/// `Url::join` replaces the last path segment of a base without one, so
/// `http://host/prefix` joined with `v1/x` would lose `prefix`.
pub(crate) fn with_trailing_slash(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url
}

/// Google API error envelope: `{"error": {"code": 403, "message": "...", "status": "PERMISSION_DENIED"}}`
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// One page of a list call
trait Page: DeserializeOwned {
    type Item;
    fn into_parts(self) -> (Vec<Self::Item>, Option<String>);
}

macro_rules! list_page {
    ($name:ident, $item:ty, $field:literal) => {
        #[derive(Debug, Deserialize)]
        struct $name {
            #[serde(default, rename = $field)]
            items: Vec<$item>,
            #[serde(default, rename = "nextPageToken")]
            next_page_token: Option<String>,
        }

        impl Page for $name {
            type Item = $item;
            fn into_parts(self) -> (Vec<$item>, Option<String>) {
                (self.items, self.next_page_token.filter(|token| !token.is_empty()))
            }
        }
    };
}

list_page!(CommitmentPage, CapacityCommitment, "capacityCommitments");
list_page!(ReservationPage, Reservation, "reservations");
list_page!(AssignmentPage, Assignment, "assignments");

/// REST implementation of [`ReservationService`]
pub struct BigQueryReservationService {
    client: Client,
    base_url: Url,
    page_size: u32,
    credentials: Arc<dyn Credentials>,
}

impl BigQueryReservationService {
    /// Build a client from configuration, including its credentials source
    pub fn new(config: &BigQueryConfig) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        let credentials = create_credentials(&config.credentials, client.clone())?;
        Ok(Self::with_credentials(client, config, credentials))
    }

    pub fn with_credentials(client: Client, config: &BigQueryConfig, credentials: Arc<dyn Credentials>) -> Self {
        Self {
            client,
            base_url: with_trailing_slash(&config.endpoint),
            page_size: config.page_size,
            credentials,
        }
    }

    fn url(&self, resource: &str) -> Result<Url> {
        self.base_url
            .join(&format!("v1/{resource}"))
            .map_err(|e| ReservationError::InvalidResponse(format!("cannot build URL for '{resource}': {e}")))
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let token = self.credentials.access_token().await?;
        Ok(self.client.request(method, url).bearer_auth(token))
    }

    /// Send a request and decode a successful body, or turn the error envelope into an error
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => (envelope.error.status, envelope.error.message),
                Err(_) => (status.canonical_reason().unwrap_or_default().to_string(), body),
            };
            warn!(status = status.as_u16(), code = %code, message = %message, "Reservation API call failed");
            return Err(ReservationError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        // DELETE answers with `{}` (or nothing at all)
        let body = if body.trim().is_empty() { "{}" } else { body.as_str() };
        serde_json::from_str(body).map_err(|e| ReservationError::InvalidResponse(e.to_string()))
    }

    /// Follow `nextPageToken` until the collection is exhausted
    async fn list_all<P: Page>(&self, collection: &str) -> Result<Vec<P::Item>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = self.url(collection)?;
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("pageSize", &self.page_size.to_string());
                if let Some(token) = &page_token {
                    query.append_pair("pageToken", token);
                }
            }

            let page: P = self.send(self.request(Method::GET, url).await?).await?;
            let (page_items, next) = page.into_parts();
            debug!(collection, count = page_items.len(), "Fetched page");
            items.extend(page_items);

            match next {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let url = self.url(name)?;
        let _: serde_json::Value = self.send(self.request(Method::DELETE, url).await?).await?;
        Ok(())
    }
}

#[async_trait]
impl ReservationService for BigQueryReservationService {
    #[instrument(skip(self), fields(parent = %parent), err)]
    async fn list_capacity_commitments(&self, parent: &LocationPath) -> Result<Vec<CapacityCommitment>> {
        self.list_all::<CommitmentPage>(&format!("{parent}/capacityCommitments")).await
    }

    #[instrument(skip(self), fields(parent = %parent), err)]
    async fn list_reservations(&self, parent: &LocationPath) -> Result<Vec<Reservation>> {
        self.list_all::<ReservationPage>(&format!("{parent}/reservations")).await
    }

    #[instrument(skip(self), err)]
    async fn list_assignments(&self, reservation: &str) -> Result<Vec<Assignment>> {
        self.list_all::<AssignmentPage>(&format!("{reservation}/assignments")).await
    }

    #[instrument(skip(self, commitment), fields(parent = %parent, slot_count = commitment.slot_count), err)]
    async fn create_capacity_commitment(
        &self,
        parent: &LocationPath,
        commitment: &CapacityCommitment,
    ) -> Result<CapacityCommitment> {
        let url = self.url(&format!("{parent}/capacityCommitments"))?;
        self.send(self.request(Method::POST, url).await?.json(commitment)).await
    }

    #[instrument(skip(self, reservation), fields(parent = %parent, slot_capacity = reservation.slot_capacity), err)]
    async fn create_reservation(
        &self,
        parent: &LocationPath,
        reservation_id: &str,
        reservation: &Reservation,
    ) -> Result<Reservation> {
        let mut url = self.url(&format!("{parent}/reservations"))?;
        url.query_pairs_mut().append_pair("reservationId", reservation_id);
        self.send(self.request(Method::POST, url).await?.json(reservation)).await
    }

    #[instrument(skip(self, assignment), fields(assignee = %assignment.assignee), err)]
    async fn create_assignment(&self, reservation: &str, assignment: &Assignment) -> Result<Assignment> {
        let url = self.url(&format!("{reservation}/assignments"))?;
        self.send(self.request(Method::POST, url).await?.json(assignment)).await
    }

    #[instrument(skip(self), err)]
    async fn delete_capacity_commitment(&self, name: &str) -> Result<()> {
        self.delete(name).await
    }

    #[instrument(skip(self), err)]
    async fn delete_reservation(&self, name: &str) -> Result<()> {
        self.delete(name).await
    }

    #[instrument(skip(self), err)]
    async fn delete_assignment(&self, name: &str) -> Result<()> {
        self.delete(name).await
    }
}
