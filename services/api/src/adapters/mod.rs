pub mod blob_s3;
pub mod collection_source;
pub mod db;
pub mod device_cache;
pub mod extraction_llm;
pub mod sheets;

pub use blob_s3::S3BlobStore;
pub use collection_source::HttpCollectionSource;
pub use db::DbAdapter;
pub use device_cache::JsonFileCache;
pub use extraction_llm::OpenAiExtractionAdapter;
pub use sheets::GoogleSheetsAdapter;
