//! Thin CRUD forwarders for the backend's REST collections.

use serde::{de::DeserializeOwned, Serialize};

use super::client::{to_value, ApiClient};
use super::pipeline::{ApiRequest, FormField};
use super::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Clients,
    Projects,
    Tags,
    Teams,
    TimeEntries,
}

impl Resource {
    pub fn path(self) -> &'static str {
        match self {
            Resource::Clients => "/clients",
            Resource::Projects => "/projects",
            Resource::Tags => "/tags",
            Resource::Teams => "/teams",
            Resource::TimeEntries => "/time_entries",
        }
    }

    pub fn member_path(self, id: i64) -> String {
        format!("{}/{}", self.path(), id)
    }
}

/// Collection handle borrowed from an [`ApiClient`].
pub struct ResourceApi<'a> {
    client: &'a ApiClient,
    resource: Resource,
}

impl ApiClient {
    pub fn resource(&self, resource: Resource) -> ResourceApi<'_> {
        ResourceApi {
            client: self,
            resource,
        }
    }

    /// Upload a multipart body. Field names are sent verbatim; the response
    /// is decoded like any other.
    pub async fn upload<T: DeserializeOwned>(&self, path: &str, fields: Vec<FormField>) -> Result<T, ApiError> {
        self.fetch(ApiRequest::post(path).multipart(fields)).await
    }
}

impl ResourceApi<'_> {
    pub async fn list<T: DeserializeOwned>(&self) -> Result<Vec<T>, ApiError> {
        self.client.get(self.resource.path()).await
    }

    pub async fn get<T: DeserializeOwned>(&self, id: i64) -> Result<T, ApiError> {
        self.client.get(&self.resource.member_path(id)).await
    }

    pub async fn create<T: DeserializeOwned, B: Serialize>(&self, body: &B) -> Result<T, ApiError> {
        self.client.post(self.resource.path(), body).await
    }

    pub async fn update<T: DeserializeOwned, B: Serialize>(&self, id: i64, body: &B) -> Result<T, ApiError> {
        let request = ApiRequest::new(reqwest::Method::PATCH, self.resource.member_path(id)).json(to_value(body)?);
        self.client.fetch(request).await
    }

    pub async fn delete(&self, id: i64) -> Result<(), ApiError> {
        self.client.delete(&self.resource.member_path(id)).await
    }
}
