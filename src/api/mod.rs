//! Visual Board backend API: typed client and wire types.

mod client;
pub mod types;

pub use client::{
  ApiClient, ListParams, PostsApi, ALLOWED_IMAGE_EXTENSIONS, MAX_UPLOAD_BYTES, USER_ID_HEADER,
};
pub use types::{NewPost, Paginated, Post, PostPatch};
