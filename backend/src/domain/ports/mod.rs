//! Capability interfaces for the hexagonal boundary.
//!
//! Use-cases depend only on these traits; drivers in `outbound` implement
//! them and the bootstrap wires the configured driver in.

mod macros;
pub(crate) use macros::define_port_error;

mod cache;
mod cache_key;
mod crypto;
mod database;
mod hasher;
mod http_client;
mod job_queue;
mod object_storage;
mod pubsub;
mod rate_limit_store;
mod token_issuer;
mod user_repository;

#[cfg(test)]
pub use cache::MockCache;
pub use cache::{Cache, CacheError, CacheExt};
pub use cache_key::{CacheKey, CacheKeyBuilder, CacheKeyValidationError, KEY_SEPARATOR};
#[cfg(test)]
pub use crypto::MockSymmetricCrypto;
pub use crypto::{CryptoError, SymmetricCrypto};
#[cfg(test)]
pub use database::MockDatabase;
pub use database::{
    Database, DatabaseError, DatabaseExt, ExecResult, IsolationLevel, Row, SqlValue, Transaction,
    decode_row, run_in_transaction,
};
#[cfg(test)]
pub use hasher::MockHasher;
pub use hasher::{HashError, Hasher};
#[cfg(test)]
pub use http_client::MockHttpClient;
pub use http_client::{
    HttpClient, HttpClientError, HttpClientExt, HttpMethod, HttpRequest, HttpResponse,
};
#[cfg(test)]
pub use job_queue::{MockJobQueue, MockJobSource};
pub use job_queue::{
    DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRY, DEFAULT_QUEUE, EnqueueOptions, JobInfo, JobQueue,
    JobQueueExt, JobRecord, JobSource, QueueError, Schedule, unique_key,
};
#[cfg(test)]
pub use object_storage::MockObjectStorage;
pub use object_storage::{
    ObjectInfo, ObjectReader, ObjectStorage, StorageError, validate_object_path,
    validate_object_prefix,
};
#[cfg(test)]
pub use pubsub::MockPubSubTransport;
pub use pubsub::{
    Acknowledger, Delivery, PubSubError, PubSubMessage, PubSubTransport, Subscription,
    SubscriptionSpec,
};
#[cfg(test)]
pub use rate_limit_store::MockRateLimitStore;
pub use rate_limit_store::{RateLimitError, RateLimitStore};
#[cfg(test)]
pub use token_issuer::MockTokenIssuer;
pub use token_issuer::{Claims, TokenError, TokenIssuer};
#[cfg(test)]
pub use user_repository::MockUserRepository;
pub use user_repository::{
    FixtureUserRepository, UserRecord, UserRepository, UserRepositoryError,
};
