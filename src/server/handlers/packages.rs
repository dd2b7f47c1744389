// src/server/handlers/packages.rs
//! Package catalog endpoints
//!
//! Read endpoints are public. Creating and replacing packages, uploading
//! files and deleting files require authorization (enforced by the router).

use super::{ApiResult, multipart_error, read_file_field, read_text_field};
use crate::catalog;
use crate::db::models::{Package, Version};
use crate::ingest::UploadedFile;
use crate::server::ServerState;
use crate::Error;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use std::sync::Arc;

/// Body of `POST /packages` and `PUT /packages/{name}`
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PackageRequest {
    /// Required on create; optional on replace, where it must match the path
    pub name: Option<String>,
    pub description: String,
    pub author: String,
    pub repo_url: String,
    pub company_url: String,
    pub is_system: bool,
    pub is_official: bool,
    pub categories: Vec<String>,
    pub icon: String,
    pub star_rating: i64,
}

impl PackageRequest {
    fn into_package(self, name: String) -> Package {
        let mut package = Package::new(name);
        package.description = self.description;
        package.author = self.author;
        package.repo_url = self.repo_url;
        package.company_url = self.company_url;
        package.is_system = self.is_system;
        package.is_official = self.is_official;
        package.categories = self.categories;
        package.icon = self.icon;
        package.star_rating = self.star_rating;
        package
    }
}

fn validate_package_name(name: &str) -> crate::Result<()> {
    if name.trim().is_empty() {
        return Err(Error::Validation("package name is required".to_string()));
    }
    if name.contains(['/', '\\', '\0']) || name == "." || name == ".." {
        return Err(Error::Validation(format!("invalid package name '{}'", name)));
    }
    Ok(())
}

/// GET /api/v1/packages
pub async fn list_packages(State(state): State<Arc<ServerState>>) -> ApiResult<Json<Vec<Package>>> {
    let catalog = state.catalog.clone();
    let packages = catalog::blocking(move || catalog.list_packages()).await?;
    Ok(Json(packages))
}

/// GET /api/v1/packages/{name}
pub async fn get_package(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Package>> {
    Ok(Json(state.ingestor.require_package(&name).await?))
}

/// POST /api/v1/packages
pub async fn create_package(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<PackageRequest>,
) -> ApiResult<impl IntoResponse> {
    let name = request.name.clone().unwrap_or_default();
    validate_package_name(&name)?;

    let mut package = request.into_package(name);
    let catalog = state.catalog.clone();
    let package = catalog::blocking(move || {
        catalog.create_package(&mut package)?;
        Ok(package)
    })
    .await?;

    Ok((StatusCode::CREATED, Json(package)))
}

/// PUT /api/v1/packages/{name}
pub async fn replace_package(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    Json(request): Json<PackageRequest>,
) -> ApiResult<Json<Package>> {
    if let Some(body_name) = &request.name
        && body_name != &name
    {
        return Err(Error::Validation(format!(
            "package name '{}' does not match '{}'",
            body_name, name
        ))
        .into());
    }

    let package = request.into_package(name);
    let catalog = state.catalog.clone();
    let updated = catalog::blocking(move || catalog.update_package(&package)).await?;
    Ok(Json(updated))
}

/// GET /api/v1/packages/{name}/versions
pub async fn list_versions(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<Version>>> {
    let package = state.ingestor.require_package(&name).await?;
    let package_id = package
        .id
        .ok_or_else(|| Error::Internal(format!("package '{}' has no ID", name)))?;

    let catalog = state.catalog.clone();
    let versions = catalog::blocking(move || catalog.list_versions(package_id)).await?;
    Ok(Json(versions))
}

/// GET /api/v1/packages/{name}/versions/{version}
pub async fn get_version(
    State(state): State<Arc<ServerState>>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<Json<Version>> {
    Ok(Json(state.ingestor.require_version(&name, &version).await?))
}

/// POST /api/v1/packages/{name}/versions/{version}/upload
///
/// Multipart fields: `file` (required), `release_notes`, and
/// `requirements` (JSON array or comma-separated list).
pub async fn upload_file(
    State(state): State<Arc<ServerState>>,
    Path((name, version)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let limit = state.config.max_upload_size;
    let mut upload: Option<UploadedFile> = None;
    let mut release_notes = None;
    let mut requirements = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| multipart_error(e, limit))? {
        match field.name() {
            Some("file") => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content_type = field.content_type().map(str::to_string);
                let content = read_file_field(field, limit).await?;
                let mut file = UploadedFile::new(filename, content);
                file.content_type = content_type.filter(|ct| ct != "application/octet-stream");
                upload = Some(file);
            }
            Some("release_notes") => {
                release_notes = Some(read_text_field(field, limit).await?);
            }
            Some("requirements") => {
                requirements = Some(parse_requirements(&read_text_field(field, limit).await?));
            }
            _ => {}
        }
    }

    let mut upload =
        upload.ok_or_else(|| Error::Validation("multipart field 'file' is required".to_string()))?;
    upload.release_notes = release_notes;
    upload.requirements = requirements;

    let file = state.ingestor.upload_file(&name, &version, upload).await?;
    state.metrics.record_upload();
    Ok((StatusCode::CREATED, Json(file)))
}

/// DELETE /api/v1/packages/{name}/versions/{version}/{filename}
pub async fn delete_file(
    State(state): State<Arc<ServerState>>,
    Path((name, version, filename)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    state.ingestor.delete_file(&name, &version, &filename).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Accept either a JSON array of strings or a comma-separated list
fn parse_requirements(raw: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(raw) {
        return list;
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
