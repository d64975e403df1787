pub mod auth;
pub mod gcs;
pub mod key;
pub mod local;
pub mod media_server;
pub mod mime_detect;

pub use auth::{MetadataServerToken, StaticToken, METADATA_TOKEN_URL};
pub use gcs::GcsBlobStore;
pub use key::{receipt_blob_key, sanitize_filename};
pub use local::{resolve_key, LocalBlobStore};
pub use media_server::media_router;
pub use mime_detect::{detect_mime_type, is_image, sniff_image_mime, ImageKind};
