use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::types::{
  ApiErrorBody, DiscoverItem, HealthStatus, ImageCheckStarted, ImageHealthStats, LoginRequest,
  NewPost, Paginated, Post, PostPatch, Reactivation, RegisterUser, UploadedImage, User,
  UsernameAvailability,
};
use crate::identity::IdentityProvider;

/// Header carrying the acting user id.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Extensions the upload endpoint accepts.
pub const ALLOWED_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];

/// Largest file the upload endpoint accepts.
pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

/// Query parameters for `GET /api/posts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListParams {
  pub page: u32,
  pub per_page: u32,
  /// Only posts created after this ISO-8601 instant
  pub min_date: Option<String>,
  /// Only posts owned by this user
  pub user_id: Option<String>,
}

impl ListParams {
  pub fn new(page: u32, per_page: u32) -> Self {
    Self {
      page,
      per_page,
      min_date: None,
      user_id: None,
    }
  }

  pub fn since(mut self, min_date: impl Into<String>) -> Self {
    self.min_date = Some(min_date.into());
    self
  }

  pub fn owned_by(mut self, user_id: impl Into<String>) -> Self {
    self.user_id = Some(user_id.into());
    self
  }

  fn apply(&self, url: &mut Url) {
    let mut query = url.query_pairs_mut();
    query
      .append_pair("page", &self.page.to_string())
      .append_pair("per_page", &self.per_page.to_string());
    if let Some(min_date) = &self.min_date {
      query.append_pair("min_date", min_date);
    }
    if let Some(user_id) = &self.user_id {
      query.append_pair("user_id", user_id);
    }
  }
}

/// The posts endpoints the sync engine and the editor depend on.
#[async_trait]
pub trait PostsApi: Send + Sync + 'static {
  /// List posts, newest first.
  async fn list(&self, params: &ListParams) -> Result<Paginated<Post>>;

  async fn get(&self, id: i64) -> Result<Post>;

  async fn create(&self, post: &NewPost) -> Result<Post>;

  /// Replace every field of a post.
  async fn update(&self, id: i64, post: &NewPost) -> Result<Post>;

  /// Change only the fields set in `patch`.
  async fn partial_update(&self, id: i64, patch: &PostPatch) -> Result<Post>;

  async fn delete(&self, id: i64) -> Result<()>;

  /// Mark a post active again, optionally pointing it at a new image.
  async fn reactivate(&self, id: i64, new_image_url: Option<&str>) -> Result<Reactivation>;
}

/// Visual Board REST client
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: String,
  identity: Arc<dyn IdentityProvider>,
}

impl ApiClient {
  pub fn new(
    base_url: &str,
    timeout: Duration,
    identity: Arc<dyn IdentityProvider>,
  ) -> Result<Self> {
    // Validate early so every later endpoint() call can only fail on the path
    Url::parse(base_url).map_err(|e| eyre!("Invalid API url {}: {}", base_url, e))?;

    let http = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("vboard/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base_url: base_url.trim_end_matches('/').to_string(),
      identity,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
    &self.identity
  }

  /// Build an absolute url for `path`, keeping any path prefix of the base.
  fn endpoint(&self, path: &str) -> Result<Url> {
    let raw = format!("{}{}", self.base_url, path);
    Url::parse(&raw).map_err(|e| eyre!("Invalid endpoint {}: {}", raw, e))
  }

  /// Start a request with the identity header attached.
  /// Writes refuse to go out anonymously.
  fn request(&self, method: Method, url: Url, write: bool) -> Result<RequestBuilder> {
    let user = match self.identity.user_id() {
      Some(user) => user,
      None if write => return Err(eyre!("Not signed in. Run `vboard login` first.")),
      None => self.identity.header_value(),
    };

    debug!(%method, %url, user = %user, "api request");
    Ok(self.http.request(method, url).header(USER_ID_HEADER, user))
  }

  async fn send(&self, builder: RequestBuilder) -> Result<Response> {
    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Request failed: {}", e))?;

    let status = response.status();
    if status.is_success() {
      return Ok(response);
    }

    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorBody>(&body)
      .map(|b| b.message())
      .unwrap_or(body);
    Err(eyre!("{} {}: {}", status, url, detail))
  }

  async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
    let response = self.send(builder).await?;
    response
      .json::<T>()
      .await
      .map_err(|e| eyre!("Failed to parse response: {}", e))
  }

  /// Posts of the signed-in user.
  pub async fn my_posts(&self, page: u32, per_page: u32) -> Result<Paginated<Post>> {
    let user = self
      .identity
      .user_id()
      .ok_or_else(|| eyre!("Not signed in. Run `vboard login` first."))?;
    self.list(&ListParams::new(page, per_page).owned_by(user)).await
  }

  /// Random images from the discover feed.
  pub async fn discover(&self, count: u32) -> Result<Vec<DiscoverItem>> {
    let mut url = self.endpoint("/api/discover")?;
    url
      .query_pairs_mut()
      .append_pair("count", &count.clamp(1, 50).to_string());
    let req = self.request(Method::GET, url, false)?;
    self.send_json(req).await
  }

  pub async fn register(&self, user: &RegisterUser) -> Result<User> {
    let url = self.endpoint("/api/users/register")?;
    let req = self.request(Method::POST, url, false)?.json(user);
    self.send_json(req).await
  }

  pub async fn login(&self, username_or_email: &str, password: &str) -> Result<User> {
    let url = self.endpoint("/api/users/login")?;
    let body = LoginRequest {
      username_or_email: username_or_email.to_string(),
      password: password.to_string(),
    };
    let req = self.request(Method::POST, url, false)?.json(&body);
    self.send_json(req).await
  }

  pub async fn profile(&self, username: &str) -> Result<User> {
    let url = self.endpoint(&format!("/api/users/profile/{}", username))?;
    let req = self.request(Method::GET, url, false)?;
    self.send_json(req).await
  }

  pub async fn check_username(&self, username: &str) -> Result<UsernameAvailability> {
    let url = self.endpoint(&format!("/api/users/check/{}", username))?;
    let req = self.request(Method::GET, url, false)?;
    self.send_json(req).await
  }

  /// Upload an image file and return where the server stored it.
  pub async fn upload_image(&self, path: &Path) -> Result<UploadedImage> {
    let req = self.upload_request(path).await?;
    self.send_json(req).await
  }

  /// Uploads are not tied to a user, so they go out anonymously if needed.
  async fn upload_request(&self, path: &Path) -> Result<RequestBuilder> {
    let (file_name, mime) = check_upload(path)?;

    let size = tokio::fs::metadata(path)
      .await
      .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?
      .len();
    if size > MAX_UPLOAD_BYTES {
      return Err(eyre!(
        "{} is too large ({} bytes, max {} MB)",
        path.display(),
        size,
        MAX_UPLOAD_BYTES / (1024 * 1024)
      ));
    }

    let data = tokio::fs::read(path)
      .await
      .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
    let part = reqwest::multipart::Part::bytes(data)
      .file_name(file_name)
      .mime_str(mime)
      .map_err(|e| eyre!("Invalid mime type {}: {}", mime, e))?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let url = self.endpoint("/api/upload/image")?;
    Ok(self.request(Method::POST, url, false)?.multipart(form))
  }

  /// Image check statistics across all posts.
  pub async fn image_health(&self) -> Result<ImageHealthStats> {
    let url = self.endpoint("/api/image-health/status")?;
    let req = self.request(Method::GET, url, false)?;
    self.send_json(req).await
  }

  /// Start a background check of post images (own posts when signed in).
  pub async fn check_images(&self) -> Result<ImageCheckStarted> {
    let url = self.endpoint("/api/image-health/check")?;
    let req = self.request(Method::POST, url, false)?;
    self.send_json(req).await
  }

  fn reactivate_url(&self, id: i64, new_image_url: Option<&str>) -> Result<Url> {
    let mut url = self.endpoint(&format!("/api/image-health/reactivate/{}", id))?;
    if let Some(image_url) = new_image_url {
      url.query_pairs_mut().append_pair("new_image_url", image_url);
    }
    Ok(url)
  }

  pub async fn health(&self) -> Result<HealthStatus> {
    let url = self.endpoint("/health")?;
    let req = self.request(Method::GET, url, false)?;
    self.send_json(req).await
  }
}

#[async_trait]
impl PostsApi for ApiClient {
  async fn list(&self, params: &ListParams) -> Result<Paginated<Post>> {
    let mut url = self.endpoint("/api/posts")?;
    params.apply(&mut url);
    let req = self.request(Method::GET, url, false)?;
    self.send_json(req).await
  }

  async fn get(&self, id: i64) -> Result<Post> {
    let url = self.endpoint(&format!("/api/posts/{}", id))?;
    let req = self.request(Method::GET, url, false)?;
    self.send_json(req).await
  }

  async fn create(&self, post: &NewPost) -> Result<Post> {
    let url = self.endpoint("/api/posts")?;
    let req = self.request(Method::POST, url, true)?.json(post);
    self.send_json(req).await
  }

  async fn update(&self, id: i64, post: &NewPost) -> Result<Post> {
    let url = self.endpoint(&format!("/api/posts/{}", id))?;
    let req = self.request(Method::PUT, url, true)?.json(post);
    self.send_json(req).await
  }

  async fn partial_update(&self, id: i64, patch: &PostPatch) -> Result<Post> {
    let url = self.endpoint(&format!("/api/posts/{}", id))?;
    let req = self.request(Method::PATCH, url, true)?.json(patch);
    self.send_json(req).await
  }

  async fn delete(&self, id: i64) -> Result<()> {
    let url = self.endpoint(&format!("/api/posts/{}", id))?;
    let req = self.request(Method::DELETE, url, true)?;
    self.send(req).await?;
    Ok(())
  }

  async fn reactivate(&self, id: i64, new_image_url: Option<&str>) -> Result<Reactivation> {
    let url = self.reactivate_url(id, new_image_url)?;
    let req = self.request(Method::POST, url, true)?;
    self.send_json(req).await
  }
}

/// Validate an upload candidate, returning its file name and mime type.
fn check_upload(path: &Path) -> Result<(String, &'static str)> {
  let file_name = path
    .file_name()
    .and_then(|n| n.to_str())
    .ok_or_else(|| eyre!("Not a file: {}", path.display()))?
    .to_string();

  let ext = path
    .extension()
    .and_then(|e| e.to_str())
    .map(str::to_lowercase)
    .unwrap_or_default();

  let mime = match ext.as_str() {
    "jpg" | "jpeg" => "image/jpeg",
    "png" => "image/png",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "svg" => "image/svg+xml",
    _ => {
      return Err(eyre!(
        "File type not allowed: {}. Allowed: {}",
        file_name,
        ALLOWED_IMAGE_EXTENSIONS.join(", ")
      ))
    }
  };

  Ok((file_name, mime))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::identity::StaticIdentity;

  fn client(base: &str, identity: StaticIdentity) -> ApiClient {
    ApiClient::new(base, Duration::from_secs(5), Arc::new(identity)).unwrap()
  }

  #[test]
  fn test_list_params_query() {
    let mut url = Url::parse("http://localhost:8000/api/posts").unwrap();
    ListParams::new(1, 1000)
      .since("2024-01-01T10:00:00.000Z")
      .apply(&mut url);
    assert_eq!(
      url.query(),
      Some("page=1&per_page=1000&min_date=2024-01-01T10%3A00%3A00.000Z")
    );
  }

  #[test]
  fn test_list_params_omit_unset_filters() {
    let mut url = Url::parse("http://localhost:8000/api/posts").unwrap();
    ListParams::new(2, 20).owned_by("ana").apply(&mut url);
    assert_eq!(url.query(), Some("page=2&per_page=20&user_id=ana"));
  }

  #[test]
  fn test_endpoint_keeps_base_prefix() {
    let c = client("https://example.com/board/", StaticIdentity::anonymous());
    assert_eq!(
      c.endpoint("/api/posts/3").unwrap().as_str(),
      "https://example.com/board/api/posts/3"
    );
  }

  #[test]
  fn test_invalid_base_url() {
    let result = ApiClient::new(
      "not a url",
      Duration::from_secs(1),
      Arc::new(StaticIdentity::anonymous()),
    );
    assert!(result.is_err());
  }

  #[test]
  fn test_reads_go_out_anonymous() {
    let c = client("http://localhost:8000", StaticIdentity::anonymous());
    let req = c
      .request(Method::GET, c.endpoint("/api/posts").unwrap(), false)
      .unwrap()
      .build()
      .unwrap();
    assert_eq!(req.headers()[USER_ID_HEADER].to_str().unwrap(), "anonymous");
  }

  #[test]
  fn test_writes_need_identity() {
    let c = client("http://localhost:8000", StaticIdentity::anonymous());
    let url = c.endpoint("/api/posts").unwrap();
    assert!(c.request(Method::POST, url.clone(), true).is_err());

    let c = client("http://localhost:8000", StaticIdentity::new("ana"));
    let req = c.request(Method::POST, url, true).unwrap().build().unwrap();
    assert_eq!(req.headers()[USER_ID_HEADER].to_str().unwrap(), "ana");
  }

  #[test]
  fn test_check_upload() {
    let (name, mime) = check_upload(Path::new("/tmp/Photo.JPG")).unwrap();
    assert_eq!(name, "Photo.JPG");
    assert_eq!(mime, "image/jpeg");

    assert!(check_upload(Path::new("/tmp/notes.txt")).is_err());
    assert!(check_upload(Path::new("/tmp/noext")).is_err());
  }

  #[test]
  fn test_reactivate_url() {
    let c = client("http://localhost:8000", StaticIdentity::new("ana"));
    assert_eq!(
      c.reactivate_url(7, None).unwrap().as_str(),
      "http://localhost:8000/api/image-health/reactivate/7"
    );
    assert_eq!(
      c.reactivate_url(7, Some("https://img.example.com/a b.png"))
        .unwrap()
        .query(),
      Some("new_image_url=https%3A%2F%2Fimg.example.com%2Fa+b.png")
    );
  }

  #[tokio::test]
  async fn test_upload_does_not_need_identity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sunset.png");
    std::fs::write(&path, b"\x89PNG").unwrap();

    let c = client("http://localhost:8000", StaticIdentity::anonymous());
    let req = c.upload_request(&path).await.unwrap().build().unwrap();
    assert_eq!(req.method(), Method::POST);
    assert_eq!(req.url().path(), "/api/upload/image");
    assert_eq!(req.headers()[USER_ID_HEADER].to_str().unwrap(), "anonymous");
  }
}
