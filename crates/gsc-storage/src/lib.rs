//! External collaborators: Search Console API, Sanity API and the Postgres store.

pub mod gsc;
pub mod http;
pub mod postgres;
pub mod sanity;

pub use gsc::GscClient;
pub use http::{ApiClient, ApiError, BackoffPolicy, HttpClientConfig};
pub use postgres::{PgStore, StoreError, SyncRunRecord};
pub use sanity::{SanityClient, SanityConfig};

pub const CRATE_NAME: &str = "gsc-storage";
