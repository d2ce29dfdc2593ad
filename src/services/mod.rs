pub mod blob;
pub mod file;
pub mod quota;
pub mod rate_limit;
pub mod share;

pub use blob::BlobRegistry;
pub use file::FileService;
pub use quota::QuotaService;
pub use rate_limit::RateLimiter;
pub use share::ShareService;
